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

//! Transport boundary.
//!
//! The connection managers are written against these traits rather than a
//! concrete QUIC library: the quinn adapter implements them for real
//! networking, and the in-crate fakes drive the managers deterministically in
//! tests. Handles are owned exclusively by the manager that created them;
//! everything else sees them through `Rc`/`Weak` references.

use std::net::SocketAddr;

use ospkit_common::{Error, Fingerprint, Result, StreamId};

/// Write half of one QUIC stream.
pub trait QuicStreamHandle {
    fn stream_id(&self) -> StreamId;

    /// Enqueue bytes; strict FIFO within this stream.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Half-close: the peer sees EOF, the reverse direction stays usable.
    fn close_write(&mut self) -> Result<()>;
}

/// One QUIC connection as seen by a manager.
pub trait QuicConnectionHandle {
    /// Open a new outgoing stream.
    fn open_stream(&mut self) -> Result<Box<dyn QuicStreamHandle>>;

    /// Close the connection; stream handles become dead afterwards.
    fn close(&mut self);
}

/// Binds server UDP sockets, one per configured endpoint.
pub trait EndpointBinder {
    fn bind(&mut self, endpoint: SocketAddr) -> Result<()>;
}

/// Launches outgoing QUIC handshakes for the client role.
pub trait ClientTransport {
    /// Start a handshake toward `endpoint`, pinned to the peer's certificate
    /// `fingerprint` learned from discovery.
    fn start_connect(
        &mut self,
        instance_name: &str,
        endpoint: SocketAddr,
        fingerprint: &Fingerprint,
    ) -> Result<()>;
}

/// Discovery-provided connection material for one peer.
#[derive(Debug, Clone)]
pub struct PeerEndpoints {
    pub fingerprint: Fingerprint,
    pub v4: Option<SocketAddr>,
    pub v6: Option<SocketAddr>,
}

impl PeerEndpoints {
    /// Endpoint selection: v4 preferred over v6.
    pub fn preferred(&self) -> Result<SocketAddr> {
        self.v4
            .or(self.v6)
            .ok_or_else(|| Error::ParameterInvalid("peer has no known endpoints".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ospkit_common::Fingerprint;

    #[test]
    fn v4_is_preferred_over_v6() {
        let peer = PeerEndpoints {
            fingerprint: Fingerprint::from_bytes([0u8; 32]),
            v4: Some("192.168.0.2:4433".parse().unwrap()),
            v6: Some("[fe80::1]:4433".parse().unwrap()),
        };
        assert!(peer.preferred().unwrap().is_ipv4());

        let v6_only = PeerEndpoints {
            v4: None,
            ..peer.clone()
        };
        assert!(v6_only.preferred().unwrap().is_ipv6());

        let none = PeerEndpoints {
            v4: None,
            v6: None,
            ..peer
        };
        assert!(none.preferred().is_err());
    }
}
