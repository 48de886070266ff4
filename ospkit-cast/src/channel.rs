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

//! Cast channel message envelope and well-known constants.

/// Prefix of every internal cast namespace.
pub const CAST_INTERNAL_NAMESPACE_PREFIX: &str = "urn:x-cast:com.google.cast.";

/// Namespaces under this prefix are reserved for the transport itself.
pub const TRANSPORT_NAMESPACE_PREFIX: &str = "urn:x-cast:com.google.cast.tp.";

pub const AUTH_NAMESPACE: &str = "urn:x-cast:com.google.cast.tp.deviceauth";
pub const HEARTBEAT_NAMESPACE: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
pub const CONNECTION_NAMESPACE: &str = "urn:x-cast:com.google.cast.tp.connection";

/// Namespace for OFFER/ANSWER streaming negotiation.
pub const WEBRTC_NAMESPACE: &str = "urn:x-cast:com.google.cast.webrtc";

/// Platform message ids.
pub const PLATFORM_SENDER_ID: &str = "sender-0";
pub const PLATFORM_RECEIVER_ID: &str = "receiver-0";

/// Destination id addressing every connected peer.
pub const BROADCAST_ID: &str = "*";

/// Payload of one cast channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastPayload {
    Utf8(String),
    Binary(Vec<u8>),
}

/// One cast channel message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastMessage {
    pub source_id: String,
    pub destination_id: String,
    pub namespace: String,
    pub payload: CastPayload,
}

impl CastMessage {
    pub fn is_transport_namespace(&self) -> bool {
        self.namespace.starts_with(TRANSPORT_NAMESPACE_PREFIX)
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination_id == BROADCAST_ID
    }
}

/// Generates unique session ids of the form `"<prefix>-<decimal>"`.
///
/// Injected into whoever needs ids rather than living in a global.
#[derive(Debug, Default)]
pub struct SessionIdGenerator {
    next: u64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_unique_session_id(&mut self, prefix: &str) -> String {
        self.next += 1;
        format!("{prefix}-{}", self.next)
    }
}
