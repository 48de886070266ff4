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

//! Authentication message schemas.
//!
//! Bodies are CBOR maps with integer keys in schema order; optional entries
//! are omitted and the map length adjusted. The one-byte type tag that
//! precedes each body on the wire lives in [`crate::codec`].

use minicbor::{Decoder, Encoder};
use ospkit_common::{Error, Result};

/// Maximum accepted length for string fields.
pub const MAX_STRING_LEN: usize = 256;

/// Maximum accepted length for byte-string fields (public values, keys).
pub const MAX_BYTES_LEN: usize = 128;

/// Size of a SPAKE2 confirmation value.
pub const CONFIRMATION_LEN: usize = 64;

fn encode_failed<E>(_: minicbor::encode::Error<E>) -> Error {
    Error::ParameterInvalid("CBOR encode failed".into())
}

fn decode_failed(err: minicbor::decode::Error) -> Error {
    if err.is_end_of_input() {
        Error::CborIncompleteMessage
    } else {
        Error::CborParsing(err.to_string())
    }
}

/// One-byte message type tags, in schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    AuthCapabilities = 1,
    AuthSpake2Handshake = 2,
    AuthSpake2Confirmation = 3,
    AuthStatus = 4,
}

impl MsgType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::AuthCapabilities),
            2 => Ok(Self::AuthSpake2Handshake),
            3 => Ok(Self::AuthSpake2Confirmation),
            4 => Ok(Self::AuthStatus),
            other => Err(Error::CborParsing(format!("unknown message type {other}"))),
        }
    }
}

/// SPAKE2 PSK presentation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PskStatus {
    NeedsPresentation = 0,
    Shown = 1,
    Input = 2,
}

impl PskStatus {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::NeedsPresentation),
            1 => Ok(Self::Shown),
            2 => Ok(Self::Input),
            other => Err(Error::CborParsing(format!("unknown psk status {other}"))),
        }
    }
}

/// How easily this agent's user can input a PSK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PskInputEase {
    Unknown = 0,
    Simple = 1,
    Moderate = 2,
    Hard = 3,
}

impl PskInputEase {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Simple),
            2 => Ok(Self::Moderate),
            3 => Ok(Self::Hard),
            other => Err(Error::CborParsing(format!("unknown input ease {other}"))),
        }
    }
}

/// PSK input methods an agent supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PskInputMethod {
    Numeric = 0,
    QrCode = 1,
    Nfc = 2,
}

impl PskInputMethod {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Numeric),
            1 => Ok(Self::QrCode),
            2 => Ok(Self::Nfc),
            other => Err(Error::CborParsing(format!("unknown input method {other}"))),
        }
    }
}

/// Authentication outcome codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthStatusCode {
    Authenticated = 0,
    AuthenticationFailed = 1,
    UnknownError = 2,
    Timeout = 3,
    SecretUnknown = 4,
    ProofInvalid = 5,
}

impl AuthStatusCode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Authenticated),
            1 => Ok(Self::AuthenticationFailed),
            2 => Ok(Self::UnknownError),
            3 => Ok(Self::Timeout),
            4 => Ok(Self::SecretUnknown),
            5 => Ok(Self::ProofInvalid),
            other => Err(Error::CborParsing(format!("unknown status code {other}"))),
        }
    }
}

/// Capabilities advertisement.
///
/// Body: `{ 0: input-ease, ? 1: [* input-method], 2: min-bits-of-entropy }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCapabilities {
    pub psk_input_ease: PskInputEase,
    pub psk_input_methods: Vec<PskInputMethod>,
    pub psk_min_bits_of_entropy: u32,
}

impl AuthCapabilities {
    pub(crate) fn encode_body<W: minicbor::encode::Write>(
        &self,
        encoder: &mut Encoder<W>,
    ) -> Result<()> {
        let entries = if self.psk_input_methods.is_empty() { 2 } else { 3 };
        encoder.map(entries).map_err(encode_failed)?;

        encoder.u8(0).map_err(encode_failed)?;
        encoder
            .u8(self.psk_input_ease as u8)
            .map_err(encode_failed)?;

        if !self.psk_input_methods.is_empty() {
            encoder.u8(1).map_err(encode_failed)?;
            encoder
                .array(self.psk_input_methods.len() as u64)
                .map_err(encode_failed)?;
            for method in &self.psk_input_methods {
                encoder.u8(*method as u8).map_err(encode_failed)?;
            }
        }

        encoder.u8(2).map_err(encode_failed)?;
        encoder
            .u32(self.psk_min_bits_of_entropy)
            .map_err(encode_failed)?;
        Ok(())
    }

    pub(crate) fn decode_body(decoder: &mut Decoder<'_>) -> Result<Self> {
        let entries = decoder
            .map()
            .map_err(decode_failed)?
            .ok_or_else(|| Error::CborParsing("indefinite map".into()))?;
        if entries != 2 && entries != 3 {
            return Err(Error::CborParsing("capabilities map length".into()));
        }

        let mut ease = None;
        let mut methods = Vec::new();
        let mut min_bits = None;
        for _ in 0..entries {
            match decoder.u8().map_err(decode_failed)? {
                0 => ease = Some(PskInputEase::from_u8(decoder.u8().map_err(decode_failed)?)?),
                1 => {
                    let count = decoder
                        .array()
                        .map_err(decode_failed)?
                        .ok_or_else(|| Error::CborParsing("indefinite array".into()))?;
                    for _ in 0..count {
                        methods.push(PskInputMethod::from_u8(
                            decoder.u8().map_err(decode_failed)?,
                        )?);
                    }
                }
                2 => min_bits = Some(decoder.u32().map_err(decode_failed)?),
                other => return Err(Error::CborParsing(format!("unexpected key {other}"))),
            }
        }
        Ok(Self {
            psk_input_ease: ease.ok_or_else(|| Error::CborParsing("missing input ease".into()))?,
            psk_input_methods: methods,
            psk_min_bits_of_entropy: min_bits
                .ok_or_else(|| Error::CborParsing("missing entropy bits".into()))?,
        })
    }
}

/// SPAKE2 handshake carrying the sender's public value.
///
/// Body: `{ 0: { ? 0: text }, 1: psk-status, 2: bytes }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSpake2Handshake {
    pub initiation_token: Option<String>,
    pub psk_status: PskStatus,
    pub public_value: Vec<u8>,
}

impl AuthSpake2Handshake {
    pub(crate) fn encode_body<W: minicbor::encode::Write>(
        &self,
        encoder: &mut Encoder<W>,
    ) -> Result<()> {
        encoder.map(3).map_err(encode_failed)?;

        encoder.u8(0).map_err(encode_failed)?;
        match &self.initiation_token {
            Some(token) => {
                encoder.map(1).map_err(encode_failed)?;
                encoder.u8(0).map_err(encode_failed)?;
                encoder.str(token).map_err(encode_failed)?;
            }
            None => {
                encoder.map(0).map_err(encode_failed)?;
            }
        }

        encoder.u8(1).map_err(encode_failed)?;
        encoder.u8(self.psk_status as u8).map_err(encode_failed)?;

        encoder.u8(2).map_err(encode_failed)?;
        encoder.bytes(&self.public_value).map_err(encode_failed)?;
        Ok(())
    }

    pub(crate) fn decode_body(decoder: &mut Decoder<'_>) -> Result<Self> {
        let entries = decoder
            .map()
            .map_err(decode_failed)?
            .ok_or_else(|| Error::CborParsing("indefinite map".into()))?;
        if entries != 3 {
            return Err(Error::CborParsing("handshake map length".into()));
        }

        let mut token = None;
        let mut status = None;
        let mut public_value = None;
        for _ in 0..entries {
            match decoder.u8().map_err(decode_failed)? {
                0 => {
                    let inner = decoder
                        .map()
                        .map_err(decode_failed)?
                        .ok_or_else(|| Error::CborParsing("indefinite map".into()))?;
                    match inner {
                        0 => {}
                        1 => {
                            if decoder.u8().map_err(decode_failed)? != 0 {
                                return Err(Error::CborParsing("bad token key".into()));
                            }
                            let value = decoder.str().map_err(decode_failed)?;
                            if value.len() > MAX_STRING_LEN {
                                return Err(Error::CborParsing("token too long".into()));
                            }
                            token = Some(value.to_owned());
                        }
                        _ => return Err(Error::CborParsing("token map length".into())),
                    }
                }
                1 => status = Some(PskStatus::from_u8(decoder.u8().map_err(decode_failed)?)?),
                2 => {
                    let value = decoder.bytes().map_err(decode_failed)?;
                    if value.len() > MAX_BYTES_LEN {
                        return Err(Error::CborParsing("public value too long".into()));
                    }
                    public_value = Some(value.to_vec());
                }
                other => return Err(Error::CborParsing(format!("unexpected key {other}"))),
            }
        }
        Ok(Self {
            initiation_token: token,
            psk_status: status
                .ok_or_else(|| Error::CborParsing("missing psk status".into()))?,
            public_value: public_value
                .ok_or_else(|| Error::CborParsing("missing public value".into()))?,
        })
    }
}

/// SPAKE2 confirmation carrying the 64-byte shared key proof.
///
/// Body: `{ 0: bytes }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSpake2Confirmation {
    pub confirmation_value: Vec<u8>,
}

impl AuthSpake2Confirmation {
    pub(crate) fn encode_body<W: minicbor::encode::Write>(
        &self,
        encoder: &mut Encoder<W>,
    ) -> Result<()> {
        encoder.map(1).map_err(encode_failed)?;
        encoder.u8(0).map_err(encode_failed)?;
        encoder
            .bytes(&self.confirmation_value)
            .map_err(encode_failed)?;
        Ok(())
    }

    pub(crate) fn decode_body(decoder: &mut Decoder<'_>) -> Result<Self> {
        let entries = decoder
            .map()
            .map_err(decode_failed)?
            .ok_or_else(|| Error::CborParsing("indefinite map".into()))?;
        if entries != 1 {
            return Err(Error::CborParsing("confirmation map length".into()));
        }
        if decoder.u8().map_err(decode_failed)? != 0 {
            return Err(Error::CborParsing("bad confirmation key".into()));
        }
        let value = decoder.bytes().map_err(decode_failed)?;
        if value.len() > MAX_BYTES_LEN {
            return Err(Error::CborParsing("confirmation too long".into()));
        }
        Ok(Self {
            confirmation_value: value.to_vec(),
        })
    }
}

/// Final authentication status.
///
/// Body: `{ 0: status-code }`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthStatus {
    pub status: AuthStatusCode,
}

impl AuthStatus {
    pub(crate) fn encode_body<W: minicbor::encode::Write>(
        &self,
        encoder: &mut Encoder<W>,
    ) -> Result<()> {
        encoder.map(1).map_err(encode_failed)?;
        encoder.u8(0).map_err(encode_failed)?;
        encoder.u8(self.status as u8).map_err(encode_failed)?;
        Ok(())
    }

    pub(crate) fn decode_body(decoder: &mut Decoder<'_>) -> Result<Self> {
        let entries = decoder
            .map()
            .map_err(decode_failed)?
            .ok_or_else(|| Error::CborParsing("indefinite map".into()))?;
        if entries != 1 {
            return Err(Error::CborParsing("status map length".into()));
        }
        if decoder.u8().map_err(decode_failed)? != 0 {
            return Err(Error::CborParsing("bad status key".into()));
        }
        Ok(Self {
            status: AuthStatusCode::from_u8(decoder.u8().map_err(decode_failed)?)?,
        })
    }
}

/// Umbrella type over every message this stack sends or routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OspMessage {
    AuthCapabilities(AuthCapabilities),
    AuthSpake2Handshake(AuthSpake2Handshake),
    AuthSpake2Confirmation(AuthSpake2Confirmation),
    AuthStatus(AuthStatus),
}

impl OspMessage {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::AuthCapabilities(_) => MsgType::AuthCapabilities,
            Self::AuthSpake2Handshake(_) => MsgType::AuthSpake2Handshake,
            Self::AuthSpake2Confirmation(_) => MsgType::AuthSpake2Confirmation,
            Self::AuthStatus(_) => MsgType::AuthStatus,
        }
    }

    pub(crate) fn encode_body<W: minicbor::encode::Write>(
        &self,
        encoder: &mut Encoder<W>,
    ) -> Result<()> {
        match self {
            Self::AuthCapabilities(msg) => msg.encode_body(encoder),
            Self::AuthSpake2Handshake(msg) => msg.encode_body(encoder),
            Self::AuthSpake2Confirmation(msg) => msg.encode_body(encoder),
            Self::AuthStatus(msg) => msg.encode_body(encoder),
        }
    }

    pub(crate) fn decode_body(msg_type: MsgType, decoder: &mut Decoder<'_>) -> Result<Self> {
        Ok(match msg_type {
            MsgType::AuthCapabilities => {
                Self::AuthCapabilities(AuthCapabilities::decode_body(decoder)?)
            }
            MsgType::AuthSpake2Handshake => {
                Self::AuthSpake2Handshake(AuthSpake2Handshake::decode_body(decoder)?)
            }
            MsgType::AuthSpake2Confirmation => {
                Self::AuthSpake2Confirmation(AuthSpake2Confirmation::decode_body(decoder)?)
            }
            MsgType::AuthStatus => Self::AuthStatus(AuthStatus::decode_body(decoder)?),
        })
    }
}

/// Sink for encoded messages; implemented by protocol connections.
pub trait MessageSender {
    fn send_message(&mut self, message: &OspMessage) -> Result<()>;
}
