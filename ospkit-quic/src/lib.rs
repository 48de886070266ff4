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

//! QUIC connection management.
//!
//! [`QuicServer`] and [`QuicClient`] own all connection and stream state:
//! pending connections keyed by instance name, established ones by a
//! monotonically assigned instance id, protocol connections as CBOR message
//! streams on top of QUIC streams, and a 500 ms cleanup alarm that defers
//! every destruction one tick so the transport can never re-enter freed
//! state. The managers are sans-IO over the [`transport`] traits; [`adapter`]
//! implements them with quinn.

pub mod adapter;
pub mod client;
pub mod server;
pub mod service;
pub mod testing;
pub mod transport;

pub use client::{ConnectCallback, ConnectRequest, QuicClient, SharedConnectCallback};
pub use server::{QuicServer, ServiceObserver, CLEANUP_INTERVAL};
pub use service::{ConnectionObserver, ProtocolConnection, ServiceState};
pub use transport::{
    ClientTransport, EndpointBinder, PeerEndpoints, QuicConnectionHandle, QuicStreamHandle,
};
