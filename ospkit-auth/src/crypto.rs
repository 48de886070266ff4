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

//! SPAKE2 key material over NIST P-256.
//!
//! The private scalar is the agent fingerprint's raw SHA-256 bytes; the
//! public value is the standard `scalar * G` point in uncompressed SEC1 form.
//! The shared key is `SHA-512(ECDH(self_private, peer_public) || password)`,
//! 64 bytes.

use ospkit_common::{Error, Fingerprint, Result};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use sha2::{Digest, Sha512};

/// Size in bytes of the derived shared key.
pub const SHARED_KEY_LEN: usize = 64;

/// Derive the private scalar from an agent fingerprint.
///
/// The 32 fingerprint bytes are interpreted as a big-endian scalar; the
/// negligible chance of landing outside the curve order is surfaced as
/// `ParameterInvalid`.
pub fn compute_private_key(fingerprint: &Fingerprint) -> Result<SecretKey> {
    SecretKey::from_slice(fingerprint.as_bytes())
        .map_err(|_| Error::ParameterInvalid("fingerprint is not a valid P-256 scalar".into()))
}

/// Compute `private * G` serialized as an uncompressed SEC1 point.
pub fn compute_public_value(private_key: &SecretKey) -> Vec<u8> {
    private_key
        .public_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec()
}

/// Derive the 64-byte shared key from our scalar, the peer's public value and
/// the out-of-band password.
pub fn compute_shared_key(
    private_key: &SecretKey,
    peer_public_value: &[u8],
    password: &str,
) -> Result<[u8; SHARED_KEY_LEN]> {
    let peer_public = PublicKey::from_sec1_bytes(peer_public_value)
        .map_err(|_| Error::ParameterInvalid("peer public value is not a P-256 point".into()))?;

    let secret =
        p256::ecdh::diffie_hellman(private_key.to_nonzero_scalar(), peer_public.as_affine());

    let mut hasher = Sha512::new();
    hasher.update(secret.raw_secret_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();

    let mut shared_key = [0u8; SHARED_KEY_LEN];
    shared_key.copy_from_slice(&digest);
    Ok(shared_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(fill: u8) -> Fingerprint {
        let mut bytes = [fill; 32];
        // Keep the scalar comfortably below the curve order.
        bytes[0] = 0x01;
        Fingerprint::from_bytes(bytes)
    }

    #[test]
    fn public_value_is_uncompressed_sec1() {
        let private = compute_private_key(&fingerprint(0x42)).unwrap();
        let public = compute_public_value(&private);
        assert_eq!(public.len(), 65);
        assert_eq!(public[0], 0x04);
    }

    #[test]
    fn shared_keys_agree_for_matching_passwords() {
        let priv_a = compute_private_key(&fingerprint(0x11)).unwrap();
        let priv_b = compute_private_key(&fingerprint(0x22)).unwrap();
        let pub_a = compute_public_value(&priv_a);
        let pub_b = compute_public_value(&priv_b);

        let key_a = compute_shared_key(&priv_a, &pub_b, "1234").unwrap();
        let key_b = compute_shared_key(&priv_b, &pub_a, "1234").unwrap();
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn shared_keys_differ_for_mismatched_passwords() {
        let priv_a = compute_private_key(&fingerprint(0x11)).unwrap();
        let priv_b = compute_private_key(&fingerprint(0x22)).unwrap();
        let pub_a = compute_public_value(&priv_a);
        let pub_b = compute_public_value(&priv_b);

        let key_a = compute_shared_key(&priv_a, &pub_b, "1234").unwrap();
        let key_b = compute_shared_key(&priv_b, &pub_a, "4321").unwrap();
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn malformed_peer_public_is_rejected() {
        let private = compute_private_key(&fingerprint(0x11)).unwrap();
        assert!(matches!(
            compute_shared_key(&private, &[0x05; 65], "1234"),
            Err(Error::ParameterInvalid(_))
        ));
    }
}
