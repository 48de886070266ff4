// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Agent certificate fingerprint.
//!
//! The fingerprint is the SHA-256 hash of the leaf certificate DER, carried
//! base64-encoded in the `fp=` TXT record. It is the stable identity of an
//! agent: instance names can change on mDNS conflicts, the fingerprint
//! cannot.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// SHA-256 fingerprint of an agent's leaf certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the fingerprint of a DER-encoded leaf certificate.
    pub fn from_leaf_der(cert_der: &[u8]) -> Self {
        let digest = Sha256::digest(cert_der);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Decode the value of an `fp=` TXT record.
    pub fn from_base64(s: &str) -> Result<Self> {
        let decoded = BASE64_STANDARD
            .decode(s)
            .map_err(|_| Error::ParameterInvalid("fingerprint is not valid base64".into()))?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| Error::ParameterInvalid("fingerprint must decode to 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// Encode for an `fp=` TXT record.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip() {
        let fp = Fingerprint::from_bytes([42u8; 32]);
        let encoded = fp.to_base64();
        assert_eq!(Fingerprint::from_base64(&encoded).unwrap(), fp);
    }

    #[test]
    fn rejects_wrong_length() {
        let short = BASE64_STANDARD.encode([1u8; 16]);
        assert!(Fingerprint::from_base64(&short).is_err());
        assert!(Fingerprint::from_base64("!!not-base64!!").is_err());
    }

    #[test]
    fn hashes_the_full_leaf_der() {
        let a = Fingerprint::from_leaf_der(b"certificate-a");
        let b = Fingerprint::from_leaf_der(b"certificate-b");
        assert_ne!(a, b);
        assert_eq!(a, Fingerprint::from_leaf_der(b"certificate-a"));
    }
}
