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

//! Connection manager behavior driven by the fake transport.

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ospkit_common::{Error, Fingerprint, InstanceId};
use ospkit_msgs::MessageDemuxer;
use ospkit_quic::testing::{FakeBinder, FakeClientTransport, FakeConnection, FakeStream};
use ospkit_quic::{
    ConnectCallback, ConnectionObserver, PeerEndpoints, ProtocolConnection, QuicClient,
    QuicServer, ServiceObserver, ServiceState, CLEANUP_INTERVAL,
};

#[derive(Default)]
struct ObserverState {
    running: u32,
    stopped: u32,
    suspended: u32,
    endpoint_errors: Vec<SocketAddr>,
    errors: Vec<Error>,
    incoming: Vec<ProtocolConnection>,
    closed: Vec<InstanceId>,
}

struct RecordingObserver(Rc<RefCell<ObserverState>>);

impl ServiceObserver for RecordingObserver {
    fn on_running(&mut self) {
        self.0.borrow_mut().running += 1;
    }
    fn on_stopped(&mut self) {
        self.0.borrow_mut().stopped += 1;
    }
    fn on_suspended(&mut self) {
        self.0.borrow_mut().suspended += 1;
    }
    fn on_endpoint_error(&mut self, endpoint: SocketAddr, _error: &Error) {
        self.0.borrow_mut().endpoint_errors.push(endpoint);
    }
    fn on_error(&mut self, error: &Error) {
        self.0.borrow_mut().errors.push(error.clone());
    }
    fn on_incoming_connection(&mut self, connection: ProtocolConnection) {
        self.0.borrow_mut().incoming.push(connection);
    }
    fn on_connection_closed(&mut self, instance_id: InstanceId) {
        self.0.borrow_mut().closed.push(instance_id);
    }
}

fn server_with(endpoints: Vec<SocketAddr>) -> (QuicServer, Rc<RefCell<ObserverState>>) {
    let state = Rc::new(RefCell::new(ObserverState::default()));
    let server = QuicServer::new(
        endpoints,
        Rc::new(MessageDemuxer::new()),
        Box::new(RecordingObserver(state.clone())),
    );
    (server, state)
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

#[test]
fn partial_bind_failures_do_not_abort_start() {
    let (mut server, state) = server_with(vec![addr(4433), addr(4434)]);
    let mut binder = FakeBinder::default();
    binder.fail.insert(addr(4434));

    assert!(server.start(&mut binder, Instant::now()));
    assert_eq!(server.state(), ServiceState::Running);
    assert_eq!(state.borrow().endpoint_errors, vec![addr(4434)]);
    assert_eq!(binder.bound, vec![addr(4433)]);
    assert_eq!(state.borrow().running, 1);
}

#[test]
fn start_fails_when_no_endpoint_binds() {
    let (mut server, state) = server_with(vec![addr(4433)]);
    let mut binder = FakeBinder::default();
    binder.fail.insert(addr(4433));

    assert!(!server.start(&mut binder, Instant::now()));
    assert_eq!(server.state(), ServiceState::Stopped);
    assert!(matches!(
        state.borrow().errors.as_slice(),
        [Error::SocketFailure(_)]
    ));
}

#[test]
fn instance_ids_are_monotonic_and_reset_on_stop() {
    let (mut server, _state) = server_with(vec![addr(4433)]);
    server.start(&mut FakeBinder::default(), Instant::now());

    server.on_incoming_connection("peer-a".into(), Box::new(FakeConnection::new()));
    server.on_incoming_connection("peer-b".into(), Box::new(FakeConnection::new()));
    let id_a = server.on_crypto_handshake_complete("peer-a").unwrap();
    let id_b = server.on_crypto_handshake_complete("peer-b").unwrap();
    assert_eq!(id_a, 1);
    assert_eq!(id_b, 2);
    assert_eq!(server.instance_id("peer-a"), Some(1));

    // Completing a handshake twice for the same peer does nothing.
    assert!(server.on_crypto_handshake_complete("peer-a").is_none());

    assert!(server.stop());
    assert_eq!(server.connection_count(), 0);

    // After stop the counter restarts at 1.
    server.start(&mut FakeBinder::default(), Instant::now());
    server.on_incoming_connection("peer-c".into(), Box::new(FakeConnection::new()));
    assert_eq!(server.on_crypto_handshake_complete("peer-c"), Some(1));
}

#[test]
fn handshake_failure_drops_the_pending_connection() {
    let (mut server, _state) = server_with(vec![addr(4433)]);
    server.start(&mut FakeBinder::default(), Instant::now());

    server.on_incoming_connection("peer-a".into(), Box::new(FakeConnection::new()));
    server.on_handshake_failed("peer-a");
    assert!(server.on_crypto_handshake_complete("peer-a").is_none());
}

#[test]
fn protocol_connection_writes_are_fifo_and_drop_half_closes() {
    let (mut server, _state) = server_with(vec![addr(4433)]);
    let now = Instant::now();
    server.start(&mut FakeBinder::default(), now);

    let connection = FakeConnection::new();
    let stream_logs = connection.stream_logs.clone();
    server.on_incoming_connection("peer-a".into(), Box::new(connection));
    let id = server.on_crypto_handshake_complete("peer-a").unwrap();

    let mut pc = server.create_protocol_connection(id).unwrap();
    pc.write(b"first").unwrap();
    pc.write(b"second").unwrap();

    {
        let logs = stream_logs.borrow();
        assert_eq!(logs.len(), 1);
        let log = logs[0].borrow();
        assert_eq!(log.written, vec![b"first".to_vec(), b"second".to_vec()]);
        assert!(!log.write_closed);
    }

    drop(pc);
    // Destruction half-closes the write end immediately...
    assert!(stream_logs.borrow()[0].borrow().write_closed);
    // ...and the stream entry itself is reaped on the next cleanup tick.
    server.handle_timeout(now + CLEANUP_INTERVAL);
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn close_write_end_keeps_the_connection_usable() {
    let (mut server, _state) = server_with(vec![addr(4433)]);
    server.start(&mut FakeBinder::default(), Instant::now());

    let connection = FakeConnection::new();
    let stream_logs = connection.stream_logs.clone();
    server.on_incoming_connection("peer-a".into(), Box::new(connection));
    let id = server.on_crypto_handshake_complete("peer-a").unwrap();

    let mut pc = server.create_protocol_connection(id).unwrap();
    pc.write(b"payload").unwrap();
    pc.close_write_end().unwrap();
    assert!(stream_logs.borrow()[0].borrow().write_closed);
    assert!(pc.write(b"more").is_err());
}

struct CloseCounter(Rc<Cell<u32>>);

impl ConnectionObserver for CloseCounter {
    fn on_close(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

#[test]
fn on_close_fires_exactly_once() {
    let (mut server, state) = server_with(vec![addr(4433)]);
    server.start(&mut FakeBinder::default(), Instant::now());

    server.on_incoming_connection("peer-a".into(), Box::new(FakeConnection::new()));
    let id = server.on_crypto_handshake_complete("peer-a").unwrap();

    server.on_incoming_stream(id, Box::new(FakeStream::new(8)));
    let closes = Rc::new(Cell::new(0u32));
    {
        let mut observers = state.borrow_mut();
        let pc = observers.incoming.last_mut().unwrap();
        pc.set_observer(Box::new(CloseCounter(closes.clone())));
    }

    server.on_stream_closed(id, 8);
    assert_eq!(closes.get(), 1);
    // A second close event for the same stream is a no-op.
    server.on_stream_closed(id, 8);
    assert_eq!(closes.get(), 1);
}

#[test]
fn suspend_rejects_new_streams_but_keeps_connections() {
    let (mut server, state) = server_with(vec![addr(4433)]);
    server.start(&mut FakeBinder::default(), Instant::now());

    server.on_incoming_connection("peer-a".into(), Box::new(FakeConnection::new()));
    let id = server.on_crypto_handshake_complete("peer-a").unwrap();

    assert!(server.suspend());
    assert_eq!(state.borrow().suspended, 1);
    assert!(matches!(
        server.create_protocol_connection(id),
        Err(Error::OperationInvalid(_))
    ));
    assert_eq!(server.connection_count(), 1);

    assert!(server.resume());
    assert!(server.create_protocol_connection(id).is_ok());
}

#[test]
fn connection_deletion_is_deferred_one_cleanup_tick() {
    let (mut server, state) = server_with(vec![addr(4433)]);
    let now = Instant::now();
    server.start(&mut FakeBinder::default(), now);

    let connection = FakeConnection::new();
    let log = connection.log.clone();
    server.on_incoming_connection("peer-a".into(), Box::new(connection));
    let id = server.on_crypto_handshake_complete("peer-a").unwrap();

    server.on_connection_closed(id);
    assert_eq!(state.borrow().closed, vec![id]);
    // Still present until the cleanup alarm fires.
    assert_eq!(server.connection_count(), 1);
    assert!(!log.borrow().closed);

    let cleanup_at = server.poll_timeout().unwrap();
    assert_eq!(cleanup_at, now + CLEANUP_INTERVAL);
    server.handle_timeout(cleanup_at);
    assert_eq!(server.connection_count(), 0);
    assert!(log.borrow().closed);
}

// --- client role -----------------------------------------------------------

#[derive(Default)]
struct ConnectLog {
    succeeded: Vec<(u64, InstanceId)>,
    failed: Vec<u64>,
}

struct RecordingCallback(Rc<RefCell<ConnectLog>>);

impl ConnectCallback for RecordingCallback {
    fn on_connect_succeeded(&mut self, request_id: u64, instance_id: InstanceId) {
        self.0.borrow_mut().succeeded.push((request_id, instance_id));
    }
    fn on_connect_failed(&mut self, request_id: u64) {
        self.0.borrow_mut().failed.push(request_id);
    }
}

fn client() -> (QuicClient, Rc<RefCell<ObserverState>>) {
    let state = Rc::new(RefCell::new(ObserverState::default()));
    let client = QuicClient::new(
        Rc::new(MessageDemuxer::new()),
        Box::new(RecordingObserver(state.clone())),
    );
    (client, state)
}

fn peer() -> PeerEndpoints {
    PeerEndpoints {
        fingerprint: Fingerprint::from_bytes([9u8; 32]),
        v4: Some(addr(8009)),
        v6: Some("[fe80::2]:8009".parse().unwrap()),
    }
}

#[test]
fn concurrent_connects_coalesce_into_one_handshake() {
    let (mut client, _state) = client();
    client.start(Instant::now());
    let mut transport = FakeClientTransport::default();
    let log = Rc::new(RefCell::new(ConnectLog::default()));
    let callback = Rc::new(RefCell::new(RecordingCallback(log.clone())));

    let _request_a = client
        .connect("peer-a", &peer(), &mut transport, callback.clone())
        .unwrap();
    let _request_b = client
        .connect("peer-a", &peer(), &mut transport, callback.clone())
        .unwrap();

    // Only one transport handshake was launched, v4 preferred.
    assert_eq!(transport.started.len(), 1);
    assert_eq!(transport.started[0].1, addr(8009));

    let id = client
        .on_connect_established("peer-a", Box::new(FakeConnection::new()))
        .unwrap();
    let log = log.borrow();
    assert_eq!(log.succeeded.len(), 2);
    assert!(log.succeeded.iter().all(|(_, got)| *got == id));
}

#[test]
fn handshake_failure_fails_every_coalesced_caller() {
    let (mut client, _state) = client();
    client.start(Instant::now());
    let mut transport = FakeClientTransport::default();
    let log = Rc::new(RefCell::new(ConnectLog::default()));
    let callback = Rc::new(RefCell::new(RecordingCallback(log.clone())));

    let _request_a = client
        .connect("peer-a", &peer(), &mut transport, callback.clone())
        .unwrap();
    let _request_b = client
        .connect("peer-a", &peer(), &mut transport, callback.clone())
        .unwrap();

    client.on_connect_failed("peer-a");
    assert_eq!(log.borrow().failed.len(), 2);
    assert!(log.borrow().succeeded.is_empty());
}

#[test]
fn dropped_connect_request_cancels_its_callback() {
    let (mut client, _state) = client();
    client.start(Instant::now());
    let mut transport = FakeClientTransport::default();
    let log = Rc::new(RefCell::new(ConnectLog::default()));
    let callback = Rc::new(RefCell::new(RecordingCallback(log.clone())));

    let request_a = client
        .connect("peer-a", &peer(), &mut transport, callback.clone())
        .unwrap();
    let _request_b = client
        .connect("peer-a", &peer(), &mut transport, callback.clone())
        .unwrap();
    drop(request_a);

    client.on_connect_established("peer-a", Box::new(FakeConnection::new()));
    // Only the surviving caller hears back.
    assert_eq!(log.borrow().succeeded.len(), 1);
}

#[test]
fn connect_to_established_peer_completes_immediately() {
    let (mut client, _state) = client();
    client.start(Instant::now());
    let mut transport = FakeClientTransport::default();
    let log = Rc::new(RefCell::new(ConnectLog::default()));
    let callback = Rc::new(RefCell::new(RecordingCallback(log.clone())));

    let _request = client
        .connect("peer-a", &peer(), &mut transport, callback.clone())
        .unwrap();
    let id = client
        .on_connect_established("peer-a", Box::new(FakeConnection::new()))
        .unwrap();

    let _again = client
        .connect("peer-a", &peer(), &mut transport, callback.clone())
        .unwrap();
    assert_eq!(transport.started.len(), 1);
    assert_eq!(log.borrow().succeeded.last().unwrap().1, id);
}

#[test]
fn stop_fails_pending_connects_and_resets_state() {
    let (mut client, state) = client();
    client.start(Instant::now());
    let mut transport = FakeClientTransport::default();
    let log = Rc::new(RefCell::new(ConnectLog::default()));
    let callback = Rc::new(RefCell::new(RecordingCallback(log.clone())));

    let _request = client
        .connect("peer-a", &peer(), &mut transport, callback.clone())
        .unwrap();
    assert!(client.stop());
    assert_eq!(log.borrow().failed.len(), 1);
    assert_eq!(client.state(), ServiceState::Stopped);
    assert_eq!(state.borrow().stopped, 1);
}
