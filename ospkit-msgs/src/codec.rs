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

//! Message envelope codec.
//!
//! Wire shape: one leading type-tag byte followed by a CBOR body. Messages
//! are framed by decode-advance: the reader consumes one complete message at
//! a time from an accumulating buffer, and a short read surfaces as
//! [`Error::CborIncompleteMessage`] rather than a hard failure.

use minicbor::encode::Write as _;
use minicbor::{Decoder, Encoder};
use ospkit_common::{Error, Result};

use crate::buffer::MessageBuffer;
use crate::messages::{MsgType, OspMessage};

/// Encode `message` into `buffer`, tag byte first.
///
/// If the buffer's metered capacity is too small, it is grown by the exact
/// shortfall the encoder reports and the encode is retried.
pub fn encode_message(message: &OspMessage, buffer: &mut MessageBuffer) -> Result<()> {
    loop {
        let mut writer = buffer.writer();
        let _ = writer.write_all(&[message.msg_type() as u8]);
        let mut encoder = Encoder::new(writer);
        message.encode_body(&mut encoder)?;
        let shortfall = encoder.writer().overflow();
        if shortfall == 0 {
            return Ok(());
        }
        buffer.grow(shortfall);
    }
}

/// Peek the message type of the next frame without consuming anything.
pub fn peek_type(bytes: &[u8]) -> Result<MsgType> {
    let first = bytes.first().ok_or(Error::CborIncompleteMessage)?;
    MsgType::from_u8(*first)
}

/// Decode one complete message. Returns the message and the total number of
/// bytes consumed (tag byte included).
pub fn decode_message(bytes: &[u8]) -> Result<(OspMessage, usize)> {
    let msg_type = peek_type(bytes)?;
    let (message, body_len) = decode_body(msg_type, &bytes[1..])?;
    Ok((message, body_len + 1))
}

/// Decode one message body of a known type. Returns the message and the
/// number of body bytes consumed.
pub fn decode_body(msg_type: MsgType, body: &[u8]) -> Result<(OspMessage, usize)> {
    let mut decoder = Decoder::new(body);
    let message = OspMessage::decode_body(msg_type, &mut decoder)?;
    Ok((message, decoder.position()))
}
