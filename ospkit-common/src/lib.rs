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

//! Shared leaf types for the ospkit protocol stack.
//!
//! Everything in here is dependency-light on purpose: the protocol crates
//! (`ospkit-mdns`, `ospkit-quic`, ...) all sit on top of this one, so it only
//! contains the error taxonomy, identifier aliases, the agent fingerprint
//! newtype and the clock abstraction the sans-IO cores are driven with.

pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod types;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use types::{InstanceId, ProtocolConnectionId, StreamId};
