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

//! Common identifier types shared across protocol layers.

/// Local handle for a peer after its crypto handshake completed.
///
/// Instance ids are assigned monotonically starting at 1 by the connection
/// manager that owns the peer; 0 is never a valid id.
pub type InstanceId = u64;

/// A unique identifier for a QUIC stream within one connection.
pub type StreamId = u64;

/// Identifier of one protocol connection (one CBOR message stream) within a
/// connection manager.
pub type ProtocolConnectionId = u64;

/// DNS-SD service type under which agents advertise themselves.
pub const SERVICE_TYPE: &str = "_openscreen._udp";

/// DNS-SD domain the service type is scoped to.
pub const SERVICE_DOMAIN: &str = "local";

/// TXT record key carrying the agent certificate fingerprint.
pub const TXT_KEY_FINGERPRINT: &str = "fp";

/// TXT record key carrying the authentication initiation token.
pub const TXT_KEY_AUTH_TOKEN: &str = "at";

/// TXT record key carrying the metadata version.
pub const TXT_KEY_METADATA_VERSION: &str = "mv";
