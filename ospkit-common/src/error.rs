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

//! Error taxonomy shared across all protocol layers.

use thiserror::Error;

/// Error kinds surfaced by the protocol core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A wire payload could not be parsed.
    #[error("parse error: {0}")]
    ParseError(String),

    /// A caller-supplied parameter was rejected.
    #[error("invalid parameter: {0}")]
    ParameterInvalid(String),

    /// The operation is not valid in the current state.
    #[error("operation invalid: {0}")]
    OperationInvalid(String),

    /// A socket could not be created, bound or used.
    #[error("socket failure: {0}")]
    SocketFailure(String),

    /// CBOR payload was present but malformed.
    #[error("CBOR parse error: {0}")]
    CborParsing(String),

    /// A complete CBOR message has not yet arrived; callers must accumulate
    /// more bytes and retry.
    #[error("incomplete CBOR message")]
    CborIncompleteMessage,

    /// A message was sent or expected while no connection was active.
    #[error("no active connection")]
    NoActiveConnection,

    /// The peer answered with something that fails verification (wrong
    /// initiation token, mismatched shared key, unexpected status).
    #[error("invalid answer: {0}")]
    InvalidAnswer(String),

    /// The peer's certificate fingerprint does not match the one learned
    /// out-of-band.
    #[error("fingerprint mismatch")]
    FingerprintMismatch,

    /// A deadline elapsed before the operation completed.
    #[error("timed out")]
    TimedOut,
}

impl Error {
    /// True for errors that indicate more input is needed rather than a hard
    /// failure.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::CborIncompleteMessage)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_is_not_a_hard_failure() {
        assert!(Error::CborIncompleteMessage.is_incomplete());
        assert!(!Error::CborParsing("bad map".into()).is_incomplete());
    }

    #[test]
    fn display_carries_context() {
        let err = Error::ParseError("truncated SRV rdata".into());
        assert_eq!(err.to_string(), "parse error: truncated SRV rdata");
    }
}
