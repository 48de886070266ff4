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

//! Typed CBOR message envelopes and routing.
//!
//! Wire shape per message: one leading type-tag byte, then a CBOR map whose
//! integer keys follow the message schema. [`codec`] frames and codes
//! envelopes, [`messages`] holds the schemas, [`demux`] routes inbound
//! messages to watchers by type, and [`buffer`] provides the growable encode
//! buffer.

pub mod buffer;
pub mod codec;
pub mod demux;
pub mod messages;

pub use buffer::MessageBuffer;
pub use codec::{decode_body, decode_message, encode_message, peek_type};
pub use demux::{MessageCallback, MessageDemuxer, MessageWatch};
pub use messages::{
    AuthCapabilities, AuthSpake2Confirmation, AuthSpake2Handshake, AuthStatus, AuthStatusCode,
    MessageSender, MsgType, OspMessage, PskInputEase, PskInputMethod, PskStatus, CONFIRMATION_LEN,
};
