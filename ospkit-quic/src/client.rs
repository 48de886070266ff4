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

//! Client role of the QUIC connection manager.
//!
//! `connect` resolves a peer's fingerprint and endpoints from discovery (v4
//! preferred), then launches one fingerprint-pinned handshake per instance no
//! matter how many callers ask: concurrent connects to the same instance
//! coalesce and all their callbacks fire together on success or failure.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use ospkit_common::{Error, InstanceId, Result, StreamId};
use ospkit_msgs::MessageDemuxer;
use tracing::{debug, info};

use crate::server::{ServiceObserver, CLEANUP_INTERVAL};
use crate::service::{
    ConnectionTable, ProtocolConnection, ServiceConnectionData, ServiceState,
};
use crate::transport::{ClientTransport, PeerEndpoints, QuicConnectionHandle, QuicStreamHandle};

/// Completion callback for one `connect` call.
pub trait ConnectCallback {
    fn on_connect_succeeded(&mut self, request_id: u64, instance_id: InstanceId);
    fn on_connect_failed(&mut self, request_id: u64);
}

pub type SharedConnectCallback = Rc<RefCell<dyn ConnectCallback>>;

/// Cancellation handle for one coalesced connect caller. Dropping it stops
/// that caller's callback from firing; the shared handshake keeps going for
/// the remaining callers.
pub struct ConnectRequest {
    request_id: u64,
    cancelled: Rc<RefCell<HashSet<u64>>>,
}

impl ConnectRequest {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }
}

impl Drop for ConnectRequest {
    fn drop(&mut self) {
        self.cancelled.borrow_mut().insert(self.request_id);
    }
}

struct PendingConnect {
    callbacks: Vec<(u64, SharedConnectCallback)>,
}

pub struct QuicClient {
    state: ServiceState,
    demuxer: Rc<MessageDemuxer>,
    observer: Box<dyn ServiceObserver>,
    table: ConnectionTable,
    pending_connects: HashMap<String, PendingConnect>,
    cancelled: Rc<RefCell<HashSet<u64>>>,
    next_request_id: u64,
    next_cleanup: Option<Instant>,
}

impl QuicClient {
    pub fn new(demuxer: Rc<MessageDemuxer>, observer: Box<dyn ServiceObserver>) -> Self {
        Self {
            state: ServiceState::Stopped,
            demuxer,
            observer,
            table: ConnectionTable::new(),
            pending_connects: HashMap::new(),
            cancelled: Rc::new(RefCell::new(HashSet::new())),
            next_request_id: 1,
            next_cleanup: None,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn start(&mut self, now: Instant) -> bool {
        if self.state != ServiceState::Stopped {
            return false;
        }
        self.state = ServiceState::Running;
        self.next_cleanup = Some(now + CLEANUP_INTERVAL);
        self.observer.on_running();
        true
    }

    pub fn stop(&mut self) -> bool {
        if self.state == ServiceState::Stopped {
            return false;
        }
        self.state = ServiceState::Stopping;
        // Every coalesced caller of an in-flight handshake fails together.
        let pending: Vec<String> = self.pending_connects.keys().cloned().collect();
        for instance_name in pending {
            self.on_connect_failed(&instance_name);
        }
        self.table.close_all();
        self.next_cleanup = None;
        self.state = ServiceState::Stopped;
        self.observer.on_stopped();
        true
    }

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

    /// Connect to a discovered peer.
    ///
    /// If a handshake toward the same instance is already in flight, no new
    /// transport work starts; the callback joins the pending set.
    pub fn connect(
        &mut self,
        instance_name: &str,
        peer: &PeerEndpoints,
        transport: &mut dyn ClientTransport,
        callback: SharedConnectCallback,
    ) -> Result<ConnectRequest> {
        if self.state != ServiceState::Running {
            return Err(Error::OperationInvalid("client is not running".into()));
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let request = ConnectRequest {
            request_id,
            cancelled: self.cancelled.clone(),
        };

        // Already established: complete immediately.
        if let Some(instance_id) = self.table.instance_id(instance_name) {
            if self.table.is_connected(instance_id) {
                callback
                    .borrow_mut()
                    .on_connect_succeeded(request_id, instance_id);
                return Ok(request);
            }
        }

        if let Some(pending) = self.pending_connects.get_mut(instance_name) {
            debug!(instance_name, request_id, "coalescing connect");
            pending.callbacks.push((request_id, callback));
            return Ok(request);
        }

        let endpoint = peer.preferred()?;
        transport.start_connect(instance_name, endpoint, &peer.fingerprint)?;
        info!(instance_name, %endpoint, "connecting");
        self.pending_connects.insert(
            instance_name.to_owned(),
            PendingConnect {
                callbacks: vec![(request_id, callback)],
            },
        );
        Ok(request)
    }

    /// Open a new protocol connection to an established peer.
    pub fn create_protocol_connection(
        &mut self,
        instance_id: InstanceId,
    ) -> Result<ProtocolConnection> {
        if self.state != ServiceState::Running {
            return Err(Error::OperationInvalid(
                "client is not accepting new streams".into(),
            ));
        }
        self.table.open_protocol_connection(instance_id)
    }

    pub fn instance_id(&self, instance_name: &str) -> Option<InstanceId> {
        self.table.instance_id(instance_name)
    }

    // --- transport-driven inputs -------------------------------------------

    /// The transport handshake toward `instance_name` completed.
    pub fn on_connect_established(
        &mut self,
        instance_name: &str,
        connection: Box<dyn QuicConnectionHandle>,
    ) -> Option<InstanceId> {
        let data = ServiceConnectionData::new(connection, instance_name.to_owned());
        self.table.insert_pending(instance_name.to_owned(), data);
        let instance_id = self.table.promote(instance_name)?;

        if let Some(pending) = self.pending_connects.remove(instance_name) {
            let cancelled = self.cancelled.borrow();
            for (request_id, callback) in pending.callbacks {
                if cancelled.contains(&request_id) {
                    continue;
                }
                callback
                    .borrow_mut()
                    .on_connect_succeeded(request_id, instance_id);
            }
        }
        Some(instance_id)
    }

    /// The transport handshake failed; every coalesced caller learns at once.
    pub fn on_connect_failed(&mut self, instance_name: &str) {
        let Some(pending) = self.pending_connects.remove(instance_name) else {
            return;
        };
        debug!(instance_name, "connect failed");
        let cancelled = self.cancelled.borrow();
        for (request_id, callback) in pending.callbacks {
            if cancelled.contains(&request_id) {
                continue;
            }
            callback.borrow_mut().on_connect_failed(request_id);
        }
    }

    /// The peer opened a stream toward us.
    pub fn on_incoming_stream(
        &mut self,
        instance_id: InstanceId,
        stream: Box<dyn QuicStreamHandle>,
    ) {
        if self.state != ServiceState::Running {
            return;
        }
        match self.table.accept_stream(instance_id, stream) {
            Ok(connection) => self.observer.on_incoming_connection(connection),
            Err(err) => debug!(instance_id, %err, "stream for unknown connection"),
        }
    }

    pub fn on_stream_data(
        &mut self,
        instance_id: InstanceId,
        stream_id: StreamId,
        bytes: &[u8],
        now: Instant,
    ) {
        self.demuxer.on_stream_data(instance_id, stream_id, bytes, now);
    }

    pub fn on_stream_closed(&mut self, instance_id: InstanceId, stream_id: StreamId) {
        self.table.stream_closed(instance_id, stream_id);
        self.demuxer.on_stream_closed(instance_id, stream_id);
    }

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
