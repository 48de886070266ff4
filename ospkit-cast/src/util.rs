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

//! Small helpers for negotiation message fields.

use std::fmt;
use std::str::FromStr;

use ospkit_common::{Error, Result};

/// A positive rational, e.g. a frame rate of `30000/1001` or an RTP timebase
/// of `1/90000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleFraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl SimpleFraction {
    pub fn new(numerator: u32, denominator: u32) -> Result<Self> {
        if denominator == 0 {
            return Err(Error::ParameterInvalid("fraction denominator is zero".into()));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn is_positive(&self) -> bool {
        self.numerator > 0
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.numerator) / f64::from(self.denominator)
    }
}

impl FromStr for SimpleFraction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse_part = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| Error::ParseError(format!("bad fraction component {part:?}")))
        };
        match s.split_once('/') {
            Some((numerator, denominator)) => {
                Self::new(parse_part(numerator)?, parse_part(denominator)?)
            }
            None => Self::new(parse_part(s)?, 1),
        }
    }
}

impl fmt::Display for SimpleFraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

/// Decode a 16-byte hex field (AES key or IV mask).
pub fn parse_aes_bytes(value: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(value)
        .map_err(|_| Error::ParseError(format!("field is not hex: {value:?}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::ParseError("AES field must be 16 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_slash_forms() {
        let timebase: SimpleFraction = "1/48000".parse().unwrap();
        assert_eq!(timebase, SimpleFraction::new(1, 48000).unwrap());

        let rate: SimpleFraction = "30".parse().unwrap();
        assert_eq!(rate.as_f64(), 30.0);
        assert_eq!(rate.to_string(), "30");
        assert_eq!(timebase.to_string(), "1/48000");
    }

    #[test]
    fn rejects_zero_denominator_and_garbage() {
        assert!("1/0".parse::<SimpleFraction>().is_err());
        assert!("x/5".parse::<SimpleFraction>().is_err());
        assert!("".parse::<SimpleFraction>().is_err());
    }

    #[test]
    fn aes_fields_must_be_16_hex_bytes() {
        assert!(parse_aes_bytes("51027e4e2347cbcb49d57ef10177aebc").is_ok());
        assert!(parse_aes_bytes("51027e").is_err());
        assert!(parse_aes_bytes("zz027e4e2347cbcb49d57ef10177aebc").is_err());
    }
}
