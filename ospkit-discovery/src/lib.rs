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

//! Service discovery facade.
//!
//! [`DiscoveryService`] combines the listener role (watch the network for
//! `_openscreen._udp` peers and surface a peer catalog) with the publisher
//! role (advertise the local agent), both backed by the `ospkit-mdns` engine.
//! The engine lives exactly as long as at least one of the two roles runs.

pub mod engine;
pub mod service;
pub mod service_info;

pub use engine::{BoundInterface, MdnsPlatform};
pub use service::{
    DiscoveryService, DiscoveryState, ListenerObserver, PublisherObserver,
};
pub use service_info::{parse_txt_entries, PeerRecord, PublisherConfig, TxtRecords};
