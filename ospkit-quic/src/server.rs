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

//! Server role of the QUIC connection manager.
//!
//! Owns one socket per configured endpoint. Inbound connections sit in a
//! pending map keyed by instance name until their crypto handshake completes;
//! promotion assigns `instance_id = next_instance_id++` (starting at 1) and
//! moves them into the established map. A 500 ms cleanup alarm reaps closed
//! streams and connections one tick after their close event.

use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ospkit_common::{Error, InstanceId, Result, StreamId};
use ospkit_msgs::MessageDemuxer;
use tracing::{debug, info, warn};

use crate::service::{
    ConnectionTable, ProtocolConnection, ServiceConnectionData, ServiceState,
};
use crate::transport::{EndpointBinder, QuicConnectionHandle, QuicStreamHandle};

/// Cleanup cadence for deferred stream/connection destruction.
pub const CLEANUP_INTERVAL: Duration = Duration::from_millis(500);

/// Upward events from a connection manager.
///
/// Default methods are empty so observers implement only what they need.
pub trait ServiceObserver {
    fn on_running(&mut self) {}
    fn on_stopped(&mut self) {}
    fn on_suspended(&mut self) {}
    /// A single endpoint failed to bind; peers that did bind keep running.
    fn on_endpoint_error(&mut self, _endpoint: SocketAddr, _error: &Error) {}
    /// Unrecoverable failure; the service has entered a terminal state.
    fn on_error(&mut self, _error: &Error) {}
    /// The peer opened a new stream on an established connection.
    fn on_incoming_connection(&mut self, _connection: ProtocolConnection) {}
    fn on_connection_closed(&mut self, _instance_id: InstanceId) {}
}

pub struct QuicServer {
    state: ServiceState,
    connection_endpoints: Vec<SocketAddr>,
    demuxer: Rc<MessageDemuxer>,
    observer: Box<dyn ServiceObserver>,
    table: ConnectionTable,
    next_cleanup: Option<Instant>,
}

impl QuicServer {
    pub fn new(
        connection_endpoints: Vec<SocketAddr>,
        demuxer: Rc<MessageDemuxer>,
        observer: Box<dyn ServiceObserver>,
    ) -> Self {
        Self {
            state: ServiceState::Stopped,
            connection_endpoints,
            demuxer,
            observer,
            table: ConnectionTable::new(),
            next_cleanup: None,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Bind all configured endpoints and go Running.
    ///
    /// Bind errors are surfaced per endpoint; the server starts as long as at
    /// least one endpoint bound. With none, it reports `SocketFailure` and
    /// stays Stopped.
    pub fn start(&mut self, binder: &mut dyn EndpointBinder, now: Instant) -> bool {
        if self.state != ServiceState::Stopped {
            return false;
        }
        self.state = ServiceState::Starting;

        let mut bound = 0usize;
        for endpoint in &self.connection_endpoints {
            match binder.bind(*endpoint) {
                Ok(()) => bound += 1,
                Err(err) => {
                    warn!(%endpoint, %err, "failed to bind server endpoint");
                    self.observer.on_endpoint_error(*endpoint, &err);
                }
            }
        }
        if bound == 0 {
            let err = Error::SocketFailure("no server endpoint could be bound".into());
            self.state = ServiceState::Stopped;
            self.observer.on_error(&err);
            return false;
        }

        self.state = ServiceState::Running;
        self.next_cleanup = Some(now + CLEANUP_INTERVAL);
        info!(endpoints = bound, "QUIC server running");
        self.observer.on_running();
        true
    }

    /// Close all connections (pending and established), clear the maps and
    /// reset the instance id counter.
    pub fn stop(&mut self) -> bool {
        if self.state == ServiceState::Stopped {
            return false;
        }
        self.state = ServiceState::Stopping;
        self.table.close_all();
        self.next_cleanup = None;
        self.state = ServiceState::Stopped;
        self.observer.on_stopped();
        true
    }

    /// Reject new streams but keep existing connections alive.
    pub fn suspend(&mut self) -> bool {
        if self.state != ServiceState::Running {
            return false;
        }
        self.state = ServiceState::Suspended;
        self.observer.on_suspended();
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.state != ServiceState::Suspended {
            return false;
        }
        self.state = ServiceState::Running;
        self.observer.on_running();
        true
    }

    /// Open a new protocol connection to an established peer.
    pub fn create_protocol_connection(
        &mut self,
        instance_id: InstanceId,
    ) -> Result<ProtocolConnection> {
        if self.state != ServiceState::Running {
            return Err(Error::OperationInvalid(
                "server is not accepting new streams".into(),
            ));
        }
        self.table.open_protocol_connection(instance_id)
    }

    pub fn instance_id(&self, instance_name: &str) -> Option<InstanceId> {
        self.table.instance_id(instance_name)
    }

    pub fn connection_count(&self) -> usize {
        self.table.connections.len()
    }

    // --- transport-driven inputs -------------------------------------------

    /// A new connection arrived from `instance_name`; its crypto handshake is
    /// still in flight.
    pub fn on_incoming_connection(
        &mut self,
        instance_name: String,
        mut connection: Box<dyn QuicConnectionHandle>,
    ) {
        if self.state != ServiceState::Running {
            connection.close();
            return;
        }
        debug!(instance_name, "pending connection");
        let data = ServiceConnectionData::new(connection, instance_name.clone());
        self.table.insert_pending(instance_name, data);
    }

    /// Crypto handshake completed: promote and assign the instance id.
    pub fn on_crypto_handshake_complete(&mut self, instance_name: &str) -> Option<InstanceId> {
        self.table.promote(instance_name)
    }

    /// Crypto handshake failed: forget the pending connection.
    pub fn on_handshake_failed(&mut self, instance_name: &str) {
        if self.table.drop_pending(instance_name) {
            debug!(instance_name, "handshake failed; pending connection dropped");
        }
    }

    /// The peer opened a stream on an established connection.
    pub fn on_incoming_stream(
        &mut self,
        instance_id: InstanceId,
        stream: Box<dyn QuicStreamHandle>,
    ) {
        if self.state != ServiceState::Running {
            // Suspended: new streams are rejected, existing ones keep going.
            return;
        }
        match self.table.accept_stream(instance_id, stream) {
            Ok(connection) => self.observer.on_incoming_connection(connection),
            Err(err) => debug!(instance_id, %err, "stream for unknown connection"),
        }
    }

    /// Bytes arrived on a stream; route them through the demuxer.
    pub fn on_stream_data(
        &mut self,
        instance_id: InstanceId,
        stream_id: StreamId,
        bytes: &[u8],
        now: Instant,
    ) {
        self.demuxer.on_stream_data(instance_id, stream_id, bytes, now);
    }

    /// The peer finished or reset one stream.
    pub fn on_stream_closed(&mut self, instance_id: InstanceId, stream_id: StreamId) {
        self.table.stream_closed(instance_id, stream_id);
        self.demuxer.on_stream_closed(instance_id, stream_id);
    }

    /// The connection itself closed. Destruction is deferred to the next
    /// cleanup tick.
    pub fn on_connection_closed(&mut self, instance_id: InstanceId) {
        self.table.connection_closed(instance_id);
        self.observer.on_connection_closed(instance_id);
    }

    // --- alarms -------------------------------------------------------------

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.next_cleanup
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        let Some(next_cleanup) = self.next_cleanup else {
            return;
        };
        if now < next_cleanup {
            return;
        }
        self.table.cleanup();
        self.next_cleanup = Some(now + CLEANUP_INTERVAL);
    }
}
