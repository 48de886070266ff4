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

//! Full client↔server path: protocol connections over the fake transport,
//! demuxer routing and the SPAKE2 exchange on top.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use ospkit_auth::{AuthDelegate, AuthenticationConsumer, AuthenticationPresenter};
use ospkit_common::{Error, Fingerprint, InstanceId};
use ospkit_msgs::MessageDemuxer;
use ospkit_quic::testing::{FakeBinder, FakeClientTransport, FakeConnection};
use ospkit_quic::{
    ConnectCallback, PeerEndpoints, ProtocolConnection, QuicClient, QuicServer, ServiceObserver,
};

#[derive(Default)]
struct NullObserver;
impl ServiceObserver for NullObserver {}

struct StreamGrabber(Rc<RefCell<Vec<ProtocolConnection>>>);
impl ServiceObserver for StreamGrabber {
    fn on_incoming_connection(&mut self, connection: ProtocolConnection) {
        self.0.borrow_mut().push(connection);
    }
}

#[derive(Default)]
struct IgnoredCallback;
impl ConnectCallback for IgnoredCallback {
    fn on_connect_succeeded(&mut self, _request_id: u64, _instance_id: InstanceId) {}
    fn on_connect_failed(&mut self, _request_id: u64) {}
}

#[derive(Default)]
struct AuthLog {
    succeeded: Vec<InstanceId>,
    failed: Vec<(InstanceId, Error)>,
}

struct RecordingDelegate(Rc<RefCell<AuthLog>>);
impl AuthDelegate for RecordingDelegate {
    fn on_authentication_succeed(&mut self, instance_id: InstanceId) {
        self.0.borrow_mut().succeeded.push(instance_id);
    }
    fn on_authentication_failed(&mut self, instance_id: InstanceId, error: &Error) {
        self.0.borrow_mut().failed.push((instance_id, error.clone()));
    }
}

fn fingerprint(fill: u8) -> Fingerprint {
    let mut bytes = [fill; 32];
    bytes[0] = 0x01;
    Fingerprint::from_bytes(bytes)
}

/// Move bytes written to one side's outgoing fake streams into the other
/// side's stream-data input until nothing moves.
struct Shuttle {
    client_streams: Rc<RefCell<Vec<Rc<RefCell<ospkit_quic::testing::StreamLog>>>>>,
    server_streams: Rc<RefCell<Vec<Rc<RefCell<ospkit_quic::testing::StreamLog>>>>>,
}

impl Shuttle {
    fn pump(&self, client: &mut QuicClient, server: &mut QuicServer, now: Instant) {
        loop {
            let mut moved = false;
            for (stream_id, log) in self.client_streams.borrow().iter().enumerate() {
                let written: Vec<Vec<u8>> = log.borrow_mut().written.drain(..).collect();
                for bytes in written {
                    moved = true;
                    server.on_stream_data(1, stream_id as u64 * 4, &bytes, now);
                }
            }
            for (stream_id, log) in self.server_streams.borrow().iter().enumerate() {
                let written: Vec<Vec<u8>> = log.borrow_mut().written.drain(..).collect();
                for bytes in written {
                    moved = true;
                    client.on_stream_data(1, stream_id as u64 * 4, &bytes, now);
                }
            }
            if !moved {
                break;
            }
        }
    }
}

#[test_log::test]
fn spake2_succeeds_over_protocol_connections() {
    let now = Instant::now();

    // Client side: the presenter's agent.
    let client_demuxer = Rc::new(MessageDemuxer::new());
    let mut client = QuicClient::new(client_demuxer.clone(), Box::new(NullObserver));
    client.start(now);

    // Server side: the consumer's agent.
    let server_demuxer = Rc::new(MessageDemuxer::new());
    let incoming = Rc::new(RefCell::new(Vec::new()));
    let mut server = QuicServer::new(
        vec!["127.0.0.1:4433".parse().unwrap()],
        server_demuxer.clone(),
        Box::new(StreamGrabber(incoming.clone())),
    );
    server.start(&mut FakeBinder::default(), now);

    // Transport handshakes on both roles.
    let mut transport = FakeClientTransport::default();
    let peer = PeerEndpoints {
        fingerprint: fingerprint(0x22),
        v4: Some("192.168.0.9:4433".parse().unwrap()),
        v6: None,
    };
    let callback = Rc::new(RefCell::new(IgnoredCallback));
    let _request = client
        .connect("consumer-agent", &peer, &mut transport, callback)
        .unwrap();

    let client_connection = FakeConnection::new();
    let client_streams = client_connection.stream_logs.clone();
    let client_instance = client
        .on_connect_established("consumer-agent", Box::new(client_connection))
        .unwrap();

    let server_connection = FakeConnection::new();
    let server_streams = server_connection.stream_logs.clone();
    server.on_incoming_connection("presenter-agent".into(), Box::new(server_connection));
    let server_instance = server.on_crypto_handshake_complete("presenter-agent").unwrap();
    assert_eq!(client_instance, 1);
    assert_eq!(server_instance, 1);

    // Presenter over the client's outgoing protocol connection.
    let presenter_log = Rc::new(RefCell::new(AuthLog::default()));
    let presenter = Rc::new(RefCell::new(AuthenticationPresenter::new(
        client_instance,
        fingerprint(0x11),
        "token-1",
        "1234",
        Rc::new(RefCell::new(RecordingDelegate(presenter_log.clone()))),
    )));
    AuthenticationPresenter::register(&presenter, &client_demuxer);
    let client_pc = client.create_protocol_connection(client_instance).unwrap();
    presenter.borrow_mut().set_sender(Box::new(client_pc));

    // Consumer over the server's outgoing protocol connection.
    let consumer_log = Rc::new(RefCell::new(AuthLog::default()));
    let consumer = Rc::new(RefCell::new(AuthenticationConsumer::new(
        server_instance,
        fingerprint(0x22),
        "token-1",
        Rc::new(RefCell::new(RecordingDelegate(consumer_log.clone()))),
    )));
    AuthenticationConsumer::register(&consumer, &server_demuxer);
    let server_pc = server.create_protocol_connection(server_instance).unwrap();
    consumer.borrow_mut().set_sender(Box::new(server_pc));
    consumer.borrow_mut().set_password("1234");

    presenter.borrow_mut().start_authentication();
    let shuttle = Shuttle {
        client_streams,
        server_streams,
    };
    shuttle.pump(&mut client, &mut server, now);

    assert_eq!(presenter_log.borrow().succeeded, vec![1]);
    assert_eq!(consumer_log.borrow().succeeded, vec![1]);
    assert!(presenter_log.borrow().failed.is_empty());
    assert!(consumer_log.borrow().failed.is_empty());
    assert!(incoming.borrow().is_empty());
}
