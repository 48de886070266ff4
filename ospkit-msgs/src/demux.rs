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

//! Message demuxer.
//!
//! Routes inbound CBOR messages to watchers by type. Bytes accumulate per
//! (instance, stream); the demuxer repeatedly decodes a type tag, consults
//! the watch table and delivers the body to the watcher, which returns the
//! number of body bytes it consumed. Incomplete frames leave the buffer
//! intact for the next data event.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;

use ospkit_common::{Error, InstanceId, Result, StreamId};
use tracing::{debug, trace};

use crate::codec::peek_type;
use crate::messages::MsgType;

/// A watcher for one message type.
///
/// `bytes` is the message body (type tag stripped); the return value is the
/// number of body bytes consumed, or an error. `CborIncompleteMessage` asks
/// the demuxer to wait for more data.
pub trait MessageCallback {
    fn on_stream_message(
        &mut self,
        instance_id: InstanceId,
        stream_id: StreamId,
        msg_type: MsgType,
        bytes: &[u8],
        now: Instant,
    ) -> Result<usize>;
}

type SharedCallback = Rc<RefCell<dyn MessageCallback>>;

#[derive(Default)]
struct DemuxState {
    watches: HashMap<u8, SharedCallback>,
    buffers: HashMap<(InstanceId, StreamId), Vec<u8>>,
}

/// RAII subscription handle; dropping it unsubscribes the watcher.
pub struct MessageWatch {
    state: Weak<RefCell<DemuxState>>,
    msg_type: MsgType,
}

impl Drop for MessageWatch {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.borrow_mut().watches.remove(&(self.msg_type as u8));
        }
    }
}

/// Routes inbound stream bytes to the watcher registered for each message
/// type.
#[derive(Default)]
pub struct MessageDemuxer {
    state: Rc<RefCell<DemuxState>>,
}

impl MessageDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for all messages of `msg_type`, replacing any
    /// previous watcher. The watch lasts until the returned handle is
    /// dropped.
    pub fn set_default_message_type_watch(
        &self,
        msg_type: MsgType,
        callback: SharedCallback,
    ) -> MessageWatch {
        self.state
            .borrow_mut()
            .watches
            .insert(msg_type as u8, callback);
        MessageWatch {
            state: Rc::downgrade(&self.state),
            msg_type,
        }
    }

    /// Feed bytes received on one stream and deliver complete messages.
    pub fn on_stream_data(
        &self,
        instance_id: InstanceId,
        stream_id: StreamId,
        bytes: &[u8],
        now: Instant,
    ) {
        // The buffer is taken out of the table while watchers run so a
        // watcher may re-enter the demuxer (e.g. to register a new watch).
        let mut buffer = {
            let mut state = self.state.borrow_mut();
            let mut buffer = state
                .buffers
                .remove(&(instance_id, stream_id))
                .unwrap_or_default();
            buffer.extend_from_slice(bytes);
            buffer
        };

        loop {
            if buffer.is_empty() {
                return;
            }
            let msg_type = match peek_type(&buffer) {
                Ok(msg_type) => msg_type,
                Err(err) => {
                    debug!(instance_id, stream_id, %err, "dropping stream buffer");
                    return;
                }
            };

            let callback = self.state.borrow().watches.get(&(msg_type as u8)).cloned();
            let Some(callback) = callback else {
                // No watcher yet; keep the bytes until one is registered.
                break;
            };

            let result = callback.borrow_mut().on_stream_message(
                instance_id,
                stream_id,
                msg_type,
                &buffer[1..],
                now,
            );
            match result {
                Ok(consumed) => {
                    trace!(instance_id, stream_id, ?msg_type, consumed, "delivered");
                    buffer.drain(..consumed + 1);
                }
                Err(Error::CborIncompleteMessage) => break,
                Err(err) => {
                    debug!(instance_id, stream_id, %err, "watcher failed; dropping buffer");
                    return;
                }
            }
        }

        if !buffer.is_empty() {
            self.state
                .borrow_mut()
                .buffers
                .insert((instance_id, stream_id), buffer);
        }
    }

    /// Discard buffered bytes for a closed stream.
    pub fn on_stream_closed(&self, instance_id: InstanceId, stream_id: StreamId) {
        self.state
            .borrow_mut()
            .buffers
            .remove(&(instance_id, stream_id));
    }

    pub fn has_watch(&self, msg_type: MsgType) -> bool {
        self.state
            .borrow()
            .watches
            .contains_key(&(msg_type as u8))
    }

    pub fn buffered_len(&self, instance_id: InstanceId, stream_id: StreamId) -> usize {
        self.state
            .borrow()
            .buffers
            .get(&(instance_id, stream_id))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MessageBuffer;
    use crate::codec::{decode_body, encode_message};
    use crate::messages::{AuthStatus, AuthStatusCode, OspMessage};

    /// Watcher that decodes and records status messages.
    #[derive(Default)]
    struct StatusWatcher {
        received: Vec<(InstanceId, StreamId, AuthStatusCode)>,
    }

    impl MessageCallback for StatusWatcher {
        fn on_stream_message(
            &mut self,
            instance_id: InstanceId,
            stream_id: StreamId,
            msg_type: MsgType,
            bytes: &[u8],
            _now: Instant,
        ) -> Result<usize> {
            let (message, consumed) = decode_body(msg_type, bytes)?;
            if let OspMessage::AuthStatus(status) = message {
                self.received.push((instance_id, stream_id, status.status));
            }
            Ok(consumed)
        }
    }

    fn status_bytes(status: AuthStatusCode) -> Vec<u8> {
        let mut buffer = MessageBuffer::new();
        encode_message(&OspMessage::AuthStatus(AuthStatus { status }), &mut buffer).unwrap();
        buffer.bytes().to_vec()
    }

    #[test]
    fn delivers_complete_messages() {
        let demuxer = MessageDemuxer::new();
        let watcher = Rc::new(RefCell::new(StatusWatcher::default()));
        let _watch = demuxer.set_default_message_type_watch(MsgType::AuthStatus, watcher.clone());

        demuxer.on_stream_data(3, 9, &status_bytes(AuthStatusCode::Authenticated), Instant::now());
        assert_eq!(
            watcher.borrow().received,
            vec![(3, 9, AuthStatusCode::Authenticated)]
        );
        assert_eq!(demuxer.buffered_len(3, 9), 0);
    }

    #[test]
    fn partial_frames_stay_buffered() {
        let demuxer = MessageDemuxer::new();
        let watcher = Rc::new(RefCell::new(StatusWatcher::default()));
        let _watch = demuxer.set_default_message_type_watch(MsgType::AuthStatus, watcher.clone());

        let bytes = status_bytes(AuthStatusCode::ProofInvalid);
        let (head, tail) = bytes.split_at(2);

        let now = Instant::now();
        demuxer.on_stream_data(1, 1, head, now);
        assert!(watcher.borrow().received.is_empty());
        assert_eq!(demuxer.buffered_len(1, 1), head.len());

        demuxer.on_stream_data(1, 1, tail, now);
        assert_eq!(
            watcher.borrow().received,
            vec![(1, 1, AuthStatusCode::ProofInvalid)]
        );
        assert_eq!(demuxer.buffered_len(1, 1), 0);
    }

    #[test]
    fn multiple_messages_in_one_datagram() {
        let demuxer = MessageDemuxer::new();
        let watcher = Rc::new(RefCell::new(StatusWatcher::default()));
        let _watch = demuxer.set_default_message_type_watch(MsgType::AuthStatus, watcher.clone());

        let mut bytes = status_bytes(AuthStatusCode::Authenticated);
        bytes.extend(status_bytes(AuthStatusCode::Timeout));
        demuxer.on_stream_data(5, 2, &bytes, Instant::now());
        assert_eq!(watcher.borrow().received.len(), 2);
    }

    #[test]
    fn dropping_the_watch_unsubscribes() {
        let demuxer = MessageDemuxer::new();
        let watcher = Rc::new(RefCell::new(StatusWatcher::default()));
        let watch = demuxer.set_default_message_type_watch(MsgType::AuthStatus, watcher.clone());
        assert!(demuxer.has_watch(MsgType::AuthStatus));

        drop(watch);
        assert!(!demuxer.has_watch(MsgType::AuthStatus));

        // Without a watcher the bytes stay buffered for a later subscriber.
        demuxer.on_stream_data(1, 1, &status_bytes(AuthStatusCode::Authenticated), Instant::now());
        assert!(watcher.borrow().received.is_empty());
        assert!(demuxer.buffered_len(1, 1) > 0);
    }

    #[test]
    fn closed_streams_drop_their_buffer() {
        let demuxer = MessageDemuxer::new();
        let bytes = status_bytes(AuthStatusCode::Authenticated);
        demuxer.on_stream_data(1, 1, &bytes[..1], Instant::now());
        assert!(demuxer.buffered_len(1, 1) > 0);
        demuxer.on_stream_closed(1, 1);
        assert_eq!(demuxer.buffered_len(1, 1), 0);
    }
}
