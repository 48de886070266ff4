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

//! End-to-end SPAKE2 exchanges between a presenter and a consumer, with the
//! wire replaced by in-memory queues drained between turns.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use ospkit_auth::{AuthDelegate, AuthenticationConsumer, AuthenticationPresenter};
use ospkit_common::{Error, Fingerprint, InstanceId};
use ospkit_msgs::{encode_message, MessageBuffer, MessageDemuxer, MessageSender, OspMessage};

type Queue = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// Sender that encodes onto an in-memory queue.
struct Outbox {
    queue: Queue,
}

impl MessageSender for Outbox {
    fn send_message(&mut self, message: &OspMessage) -> ospkit_common::Result<()> {
        let mut buffer = MessageBuffer::new();
        encode_message(message, &mut buffer)?;
        self.queue.borrow_mut().push_back(buffer.bytes().to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDelegate {
    succeeded: Vec<InstanceId>,
    failed: Vec<(InstanceId, Error)>,
}

impl AuthDelegate for RecordingDelegate {
    fn on_authentication_succeed(&mut self, instance_id: InstanceId) {
        self.succeeded.push(instance_id);
    }

    fn on_authentication_failed(&mut self, instance_id: InstanceId, error: &Error) {
        self.failed.push((instance_id, error.clone()));
    }
}

struct Exchange {
    presenter: Rc<RefCell<AuthenticationPresenter>>,
    presenter_demuxer: MessageDemuxer,
    presenter_delegate: Rc<RefCell<RecordingDelegate>>,
    consumer: Rc<RefCell<AuthenticationConsumer>>,
    consumer_demuxer: MessageDemuxer,
    consumer_delegate: Rc<RefCell<RecordingDelegate>>,
    presenter_to_consumer: Queue,
    consumer_to_presenter: Queue,
}

fn fingerprint(fill: u8) -> Fingerprint {
    let mut bytes = [fill; 32];
    bytes[0] = 0x01;
    Fingerprint::from_bytes(bytes)
}

fn build_exchange(presenter_password: &str, consumer_password: &str, tokens: (&str, &str)) -> Exchange {
    let instance_id = 1;
    let presenter_to_consumer: Queue = Rc::new(RefCell::new(VecDeque::new()));
    let consumer_to_presenter: Queue = Rc::new(RefCell::new(VecDeque::new()));

    let presenter_delegate = Rc::new(RefCell::new(RecordingDelegate::default()));
    let presenter = Rc::new(RefCell::new(AuthenticationPresenter::new(
        instance_id,
        fingerprint(0x11),
        tokens.0,
        presenter_password,
        presenter_delegate.clone(),
    )));
    let presenter_demuxer = MessageDemuxer::new();
    AuthenticationPresenter::register(&presenter, &presenter_demuxer);
    presenter.borrow_mut().set_sender(Box::new(Outbox {
        queue: presenter_to_consumer.clone(),
    }));

    let consumer_delegate = Rc::new(RefCell::new(RecordingDelegate::default()));
    let consumer = Rc::new(RefCell::new(AuthenticationConsumer::new(
        instance_id,
        fingerprint(0x22),
        tokens.1,
        consumer_delegate.clone(),
    )));
    let consumer_demuxer = MessageDemuxer::new();
    AuthenticationConsumer::register(&consumer, &consumer_demuxer);
    consumer.borrow_mut().set_sender(Box::new(Outbox {
        queue: consumer_to_presenter.clone(),
    }));
    consumer.borrow_mut().set_password(consumer_password);

    Exchange {
        presenter,
        presenter_demuxer,
        presenter_delegate,
        consumer,
        consumer_demuxer,
        consumer_delegate,
        presenter_to_consumer,
        consumer_to_presenter,
    }
}

impl Exchange {
    /// Deliver queued messages until both directions go quiet.
    fn pump(&self) {
        let now = Instant::now();
        loop {
            let to_consumer = self.presenter_to_consumer.borrow_mut().pop_front();
            if let Some(bytes) = to_consumer {
                self.consumer_demuxer.on_stream_data(1, 0, &bytes, now);
                continue;
            }
            let to_presenter = self.consumer_to_presenter.borrow_mut().pop_front();
            if let Some(bytes) = to_presenter {
                self.presenter_demuxer.on_stream_data(1, 0, &bytes, now);
                continue;
            }
            break;
        }
    }
}

#[test_log::test]
fn matching_pin_authenticates_both_sides() {
    let exchange = build_exchange("1234", "1234", ("token-1", "token-1"));
    exchange.presenter.borrow_mut().start_authentication();
    exchange.pump();

    assert_eq!(exchange.presenter_delegate.borrow().succeeded, vec![1]);
    assert_eq!(exchange.consumer_delegate.borrow().succeeded, vec![1]);
    assert!(exchange.presenter_delegate.borrow().failed.is_empty());
    assert!(exchange.consumer_delegate.borrow().failed.is_empty());
    let _ = &exchange.consumer;
}

#[test_log::test]
fn wrong_pin_yields_proof_invalid_on_both_sides() {
    let exchange = build_exchange("1234", "9999", ("token-1", "token-1"));
    exchange.presenter.borrow_mut().start_authentication();
    exchange.pump();

    assert!(exchange.presenter_delegate.borrow().succeeded.is_empty());
    assert!(exchange.consumer_delegate.borrow().succeeded.is_empty());

    // The consumer detects the mismatch directly; the presenter learns it
    // from the ProofInvalid status message.
    let consumer_failures = exchange.consumer_delegate.borrow();
    assert!(matches!(
        consumer_failures.failed.as_slice(),
        [(1, Error::InvalidAnswer(_))]
    ));
    let presenter_failures = exchange.presenter_delegate.borrow();
    assert!(matches!(
        presenter_failures.failed.as_slice(),
        [(1, Error::InvalidAnswer(_))]
    ));
}

#[test]
fn initiation_token_mismatch_stops_the_exchange() {
    let exchange = build_exchange("1234", "1234", ("token-good", "token-bad"));
    exchange.presenter.borrow_mut().start_authentication();
    exchange.pump();

    assert!(exchange.consumer_delegate.borrow().succeeded.is_empty());
    let consumer_failures = exchange.consumer_delegate.borrow();
    assert!(matches!(
        consumer_failures.failed.as_slice(),
        [(1, Error::InvalidAnswer(_))]
    ));
    // The consumer never answered, so the presenter is still waiting.
    assert!(exchange.presenter_delegate.borrow().succeeded.is_empty());
    assert!(exchange.presenter_delegate.borrow().failed.is_empty());
}

#[test]
fn missing_outbound_connection_fails_immediately() {
    let delegate = Rc::new(RefCell::new(RecordingDelegate::default()));
    let mut presenter = AuthenticationPresenter::new(
        7,
        fingerprint(0x33),
        "token",
        "1234",
        delegate.clone(),
    );
    presenter.start_authentication();
    assert!(matches!(
        delegate.borrow().failed.as_slice(),
        [(7, Error::NoActiveConnection)]
    ));
}
