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

//! Protocol connections and the shared connection table.
//!
//! A [`ProtocolConnection`] is one bidirectional CBOR message stream on top
//! of a QUIC stream. Stream table entries are owned by the manager; protocol
//! connection handles reference their stream weakly and must half-close
//! before the stream is reaped. Destroyed handles post to the manager's
//! inbox, which is drained on the next cleanup tick, never synchronously.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use ospkit_common::{Error, InstanceId, ProtocolConnectionId, Result, StreamId};
use ospkit_msgs::{encode_message, MessageBuffer, MessageSender, OspMessage};
use tracing::{debug, trace};

use crate::transport::{QuicConnectionHandle, QuicStreamHandle};

/// Lifecycle states shared by the server and client managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Suspended,
    Stopping,
}

/// Observer of one protocol connection.
pub trait ConnectionObserver {
    /// Fired exactly once, on either local close or peer FIN.
    fn on_close(&mut self);
}

pub(crate) type SharedStream = Rc<RefCell<Box<dyn QuicStreamHandle>>>;

pub(crate) struct ProtocolConnectionState {
    pub instance_id: InstanceId,
    pub id: ProtocolConnectionId,
    pub stream: Option<Weak<RefCell<Box<dyn QuicStreamHandle>>>>,
    pub observer: Option<Box<dyn ConnectionObserver>>,
    pub close_notified: bool,
}

impl ProtocolConnectionState {
    /// Fire the observer; subsequent calls are no-ops.
    pub fn notify_closed(&mut self) {
        if self.close_notified {
            return;
        }
        self.close_notified = true;
        self.stream = None;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_close();
        }
    }
}

/// Messages posted back to the owning manager.
#[derive(Default)]
pub(crate) struct ServiceInbox {
    /// Protocol connections destroyed since the last cleanup tick.
    pub destroyed: Vec<(InstanceId, ProtocolConnectionId)>,
}

/// One CBOR message stream over a QUIC stream.
pub struct ProtocolConnection {
    state: Rc<RefCell<ProtocolConnectionState>>,
    inbox: Rc<RefCell<ServiceInbox>>,
}

impl ProtocolConnection {
    pub(crate) fn new(
        state: Rc<RefCell<ProtocolConnectionState>>,
        inbox: Rc<RefCell<ServiceInbox>>,
    ) -> Self {
        Self { state, inbox }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.state.borrow().instance_id
    }

    pub fn id(&self) -> ProtocolConnectionId {
        self.state.borrow().id
    }

    pub fn set_observer(&mut self, observer: Box<dyn ConnectionObserver>) {
        self.state.borrow_mut().observer = Some(observer);
    }

    /// Enqueue bytes on the underlying stream; FIFO within this connection.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let state = self.state.borrow();
        let stream = state
            .stream
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(Error::NoActiveConnection)?;
        let result = stream.borrow_mut().write(bytes);
        result
    }

    /// Half-close the write side; the peer receives EOF and the reverse
    /// direction stays usable.
    pub fn close_write_end(&mut self) -> Result<()> {
        let state = self.state.borrow();
        let stream = state
            .stream
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(Error::NoActiveConnection)?;
        let result = stream.borrow_mut().close_write();
        result
    }
}

impl MessageSender for ProtocolConnection {
    fn send_message(&mut self, message: &OspMessage) -> Result<()> {
        let mut buffer = MessageBuffer::new();
        encode_message(message, &mut buffer)?;
        self.write(buffer.bytes())
    }
}

impl Drop for ProtocolConnection {
    fn drop(&mut self) {
        // Half-close before dropping the stream reference, then tell the
        // manager so the stream entry is reaped on the next cleanup tick.
        let (instance_id, id) = {
            let mut state = self.state.borrow_mut();
            if let Some(stream) = state.stream.take().and_then(|weak| weak.upgrade()) {
                let _ = stream.borrow_mut().close_write();
            }
            (state.instance_id, state.id)
        };
        self.inbox.borrow_mut().destroyed.push((instance_id, id));
    }
}

/// Register `stream` in `data`'s stream table and hand back the protocol
/// connection for it.
fn install_stream(
    data: &mut ServiceConnectionData,
    inbox: Rc<RefCell<ServiceInbox>>,
    instance_id: InstanceId,
    id: ProtocolConnectionId,
    stream: Box<dyn QuicStreamHandle>,
) -> ProtocolConnection {
    let stream_id = stream.stream_id();
    let shared: SharedStream = Rc::new(RefCell::new(stream));
    let state = Rc::new(RefCell::new(ProtocolConnectionState {
        instance_id,
        id,
        stream: Some(Rc::downgrade(&shared)),
        observer: None,
        close_notified: false,
    }));
    data.streams.insert(
        stream_id,
        StreamEntry {
            stream: shared,
            protocol_connection_id: id,
            protocol_connection: Rc::downgrade(&state),
        },
    );
    ProtocolConnection::new(state, inbox)
}

/// One stream table entry, owned by the connection data.
pub(crate) struct StreamEntry {
    pub stream: SharedStream,
    pub protocol_connection_id: ProtocolConnectionId,
    pub protocol_connection: Weak<RefCell<ProtocolConnectionState>>,
}

/// Per-connection bookkeeping.
pub(crate) struct ServiceConnectionData {
    pub connection: Box<dyn QuicConnectionHandle>,
    pub instance_name: String,
    pub streams: HashMap<StreamId, StreamEntry>,
    /// Streams closed by either side, kept alive until the next cleanup tick
    /// because the transport may still reference them from its own stack.
    pub closed_streams: Vec<StreamEntry>,
}

impl ServiceConnectionData {
    pub fn new(connection: Box<dyn QuicConnectionHandle>, instance_name: String) -> Self {
        Self {
            connection,
            instance_name,
            streams: HashMap::new(),
            closed_streams: Vec::new(),
        }
    }
}

/// Connection state shared by the server and client roles: pending
/// connections keyed by instance name, established ones keyed by the
/// monotonically assigned instance id.
pub(crate) struct ConnectionTable {
    pub instance_map: HashMap<String, InstanceId>,
    pub next_instance_id: InstanceId,
    next_protocol_connection_id: ProtocolConnectionId,
    pub pending: HashMap<String, ServiceConnectionData>,
    pub connections: HashMap<InstanceId, ServiceConnectionData>,
    pub delete_connections: Vec<InstanceId>,
    pub inbox: Rc<RefCell<ServiceInbox>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            instance_map: HashMap::new(),
            next_instance_id: 1,
            next_protocol_connection_id: 1,
            pending: HashMap::new(),
            connections: HashMap::new(),
            delete_connections: Vec::new(),
            inbox: Rc::new(RefCell::new(ServiceInbox::default())),
        }
    }

    /// Record a connection whose crypto handshake has not completed yet.
    pub fn insert_pending(&mut self, instance_name: String, data: ServiceConnectionData) {
        self.pending.insert(instance_name, data);
    }

    /// Promote a pending connection once its handshake completed, assigning
    /// the next instance id.
    pub fn promote(&mut self, instance_name: &str) -> Option<InstanceId> {
        let data = self.pending.remove(instance_name)?;
        let instance_id = self.next_instance_id;
        self.next_instance_id += 1;
        self.instance_map.insert(instance_name.to_owned(), instance_id);
        self.connections.insert(instance_id, data);
        debug!(instance_name, instance_id, "connection established");
        Some(instance_id)
    }

    pub fn drop_pending(&mut self, instance_name: &str) -> bool {
        self.pending.remove(instance_name).is_some()
    }

    pub fn instance_id(&self, instance_name: &str) -> Option<InstanceId> {
        self.instance_map.get(instance_name).copied()
    }

    pub fn is_connected(&self, instance_id: InstanceId) -> bool {
        self.connections.contains_key(&instance_id)
    }

    fn next_protocol_connection_id(&mut self) -> ProtocolConnectionId {
        let id = self.next_protocol_connection_id;
        self.next_protocol_connection_id += 1;
        id
    }

    /// Open a new stream on an established connection.
    pub fn open_protocol_connection(
        &mut self,
        instance_id: InstanceId,
    ) -> Result<ProtocolConnection> {
        let id = self.next_protocol_connection_id();
        let inbox = self.inbox.clone();
        let data = self
            .connections
            .get_mut(&instance_id)
            .ok_or(Error::NoActiveConnection)?;
        let stream = data.connection.open_stream()?;
        Ok(install_stream(data, inbox, instance_id, id, stream))
    }

    /// Wrap a peer-opened stream.
    pub fn accept_stream(
        &mut self,
        instance_id: InstanceId,
        stream: Box<dyn QuicStreamHandle>,
    ) -> Result<ProtocolConnection> {
        let id = self.next_protocol_connection_id();
        let inbox = self.inbox.clone();
        let data = self
            .connections
            .get_mut(&instance_id)
            .ok_or(Error::NoActiveConnection)?;
        Ok(install_stream(data, inbox, instance_id, id, stream))
    }

    /// Peer FIN or reset on one stream: notify its protocol connection and
    /// park the entry until the next cleanup tick.
    pub fn stream_closed(&mut self, instance_id: InstanceId, stream_id: StreamId) {
        let Some(data) = self.connections.get_mut(&instance_id) else {
            return;
        };
        let Some(entry) = data.streams.remove(&stream_id) else {
            return;
        };
        if let Some(state) = entry.protocol_connection.upgrade() {
            state.borrow_mut().notify_closed();
        }
        data.closed_streams.push(entry);
    }

    /// Connection closed by the peer or the transport: notify every stream
    /// and mark the connection for deferred deletion.
    pub fn connection_closed(&mut self, instance_id: InstanceId) {
        let Some(data) = self.connections.get_mut(&instance_id) else {
            return;
        };
        for (_, entry) in data.streams.drain() {
            if let Some(state) = entry.protocol_connection.upgrade() {
                state.borrow_mut().notify_closed();
            }
            data.closed_streams.push(entry);
        }
        self.delete_connections.push(instance_id);
    }

    /// One cleanup tick: reap destroyed protocol connections, drop closed
    /// streams and delete connections marked on earlier events.
    pub fn cleanup(&mut self) {
        let destroyed = std::mem::take(&mut self.inbox.borrow_mut().destroyed);
        for (instance_id, protocol_connection_id) in destroyed {
            if let Some(data) = self.connections.get_mut(&instance_id) {
                let closed: Vec<StreamId> = data
                    .streams
                    .iter()
                    .filter(|(_, entry)| entry.protocol_connection_id == protocol_connection_id)
                    .map(|(stream_id, _)| *stream_id)
                    .collect();
                for stream_id in closed {
                    if let Some(entry) = data.streams.remove(&stream_id) {
                        data.closed_streams.push(entry);
                    }
                }
            }
        }

        for data in self.connections.values_mut() {
            if !data.closed_streams.is_empty() {
                trace!(
                    instance_name = %data.instance_name,
                    count = data.closed_streams.len(),
                    "destroying closed streams"
                );
                data.closed_streams.clear();
            }
        }

        for instance_id in std::mem::take(&mut self.delete_connections) {
            if let Some(mut data) = self.connections.remove(&instance_id) {
                data.connection.close();
            }
        }
    }

    /// Stop: close everything, clear all maps and reset the id counter.
    pub fn close_all(&mut self) {
        for (_, mut data) in self.pending.drain() {
            data.connection.close();
        }
        let ids: Vec<InstanceId> = self.connections.keys().copied().collect();
        for instance_id in ids {
            self.connection_closed(instance_id);
        }
        for (_, mut data) in self.connections.drain() {
            data.connection.close();
        }
        self.instance_map.clear();
        self.delete_connections.clear();
        self.inbox.borrow_mut().destroyed.clear();
        self.next_instance_id = 1;
    }
}
