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

//! DNS domain names with mDNS comparison semantics.

use std::fmt;
use std::hash::{Hash, Hasher};

use ospkit_common::{Error, Result};

/// Maximum number of octets in a single label.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Maximum wire length of a full domain name, including length octets and the
/// terminating root label.
pub const MAX_NAME_LENGTH: usize = 255;

/// An ordered sequence of DNS labels.
///
/// Labels preserve the case they arrived with, but comparison and hashing are
/// case-insensitive per label (RFC 6762 §16).
#[derive(Debug, Clone, Default)]
pub struct DomainName {
    labels: Vec<String>,
}

impl DomainName {
    /// Build a name from labels, validating length limits.
    pub fn from_labels<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut name = Self::default();
        for label in labels {
            name.push_label(label.into())?;
        }
        Ok(name)
    }

    /// Parse a dotted name like `host.local`.
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_labels(s.split('.').filter(|l| !l.is_empty()))
    }

    /// Append one label, validating label and total wire length.
    pub fn push_label(&mut self, label: String) -> Result<()> {
        if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
            return Err(Error::ParameterInvalid(format!(
                "label length {} outside 1..={MAX_LABEL_LENGTH}",
                label.len()
            )));
        }
        if self.wire_length() + label.len() + 1 > MAX_NAME_LENGTH {
            return Err(Error::ParameterInvalid(format!(
                "domain name exceeds {MAX_NAME_LENGTH} octets"
            )));
        }
        self.labels.push(label);
        Ok(())
    }

    /// Append all labels of `suffix` to this name.
    pub fn append(&mut self, suffix: &DomainName) -> Result<()> {
        for label in &suffix.labels {
            self.push_label(label.clone())?;
        }
        Ok(())
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn first_label(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Length of this name in wire format: one length octet per label plus
    /// the label bytes, plus the terminating root octet.
    pub fn wire_length(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// Case-insensitive suffix test, label-wise.
    pub fn ends_with(&self, suffix: &DomainName) -> bool {
        if suffix.labels.len() > self.labels.len() {
            return false;
        }
        self.labels
            .iter()
            .rev()
            .zip(suffix.labels.iter().rev())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(other.labels.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for DomainName {}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in &self.labels {
            for byte in label.bytes() {
                state.write_u8(byte.to_ascii_lowercase());
            }
            state.write_u8(0);
        }
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.labels.join("."))
    }
}
