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

//! Presenter role: creates the PSK and presents it to the user.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use ospkit_common::{Error, Fingerprint, InstanceId, Result, StreamId};
use ospkit_msgs::{
    decode_body, AuthSpake2Confirmation, AuthSpake2Handshake, AuthStatusCode, MessageCallback,
    MessageDemuxer, MessageSender, MessageWatch, MsgType, OspMessage, PskStatus,
};
use tracing::{debug, trace};

use crate::base::{AuthBase, SharedDelegate};
use crate::crypto::{compute_private_key, compute_public_value, compute_shared_key};

/// The PSK-presenting side of the SPAKE2 exchange.
///
/// Sends the opening handshake, answers the consumer's `Input` handshake with
/// the shared-key confirmation and reports the final status to its delegate.
pub struct AuthenticationPresenter {
    base: AuthBase,
    _watches: Vec<MessageWatch>,
}

impl AuthenticationPresenter {
    pub fn new(
        instance_id: InstanceId,
        fingerprint: Fingerprint,
        auth_token: &str,
        password: &str,
        delegate: SharedDelegate,
    ) -> Self {
        Self {
            base: AuthBase::new(instance_id, fingerprint, auth_token, password, delegate),
            _watches: Vec::new(),
        }
    }

    /// Subscribe to the authentication message types on `demuxer`. The
    /// watches live until the presenter is dropped.
    pub fn register(this: &Rc<RefCell<Self>>, demuxer: &MessageDemuxer) {
        let callback: Rc<RefCell<dyn MessageCallback>> = this.clone();
        let watches = vec![
            demuxer.set_default_message_type_watch(MsgType::AuthSpake2Handshake, callback.clone()),
            demuxer
                .set_default_message_type_watch(MsgType::AuthSpake2Confirmation, callback.clone()),
            demuxer.set_default_message_type_watch(MsgType::AuthStatus, callback),
        ];
        this.borrow_mut()._watches = watches;
    }

    pub fn set_sender(&mut self, sender: Box<dyn MessageSender>) {
        self.base.set_sender(sender);
    }

    pub fn set_receiver(&mut self, receiver: Box<dyn MessageSender>) {
        self.base.set_receiver(receiver);
    }

    /// Open the exchange: handshake with `NeedsPresentation` and our public
    /// value.
    pub fn start_authentication(&mut self) {
        let private_key = match compute_private_key(&self.base.fingerprint) {
            Ok(key) => key,
            Err(err) => {
                self.base.fail(&err);
                return;
            }
        };
        let message = OspMessage::AuthSpake2Handshake(AuthSpake2Handshake {
            initiation_token: Some(self.base.data.auth_token.clone()),
            psk_status: PskStatus::NeedsPresentation,
            public_value: compute_public_value(&private_key),
        });
        if let Err(err) = self.base.send(&message) {
            self.base.fail(&err);
        }
    }

    fn on_handshake(&mut self, handshake: &AuthSpake2Handshake) {
        if let Err(err) = self
            .base
            .verify_token(handshake.initiation_token.as_deref())
        {
            self.base.fail(&err);
            return;
        }

        if handshake.psk_status != PskStatus::Input {
            let err = Error::InvalidAnswer("received wrong PSK status".into());
            self.base.fail(&err);
            return;
        }

        // The consumer has entered the PIN; derive the key and prove it.
        let shared_key = compute_private_key(&self.base.fingerprint).and_then(|private_key| {
            compute_shared_key(
                &private_key,
                &handshake.public_value,
                &self.base.data.password,
            )
        });
        let shared_key = match shared_key {
            Ok(key) => key,
            Err(err) => {
                self.base.fail(&err);
                return;
            }
        };
        self.base.data.shared_key = shared_key;

        let message = OspMessage::AuthSpake2Confirmation(AuthSpake2Confirmation {
            confirmation_value: shared_key.to_vec(),
        });
        if let Err(err) = self.base.send(&message) {
            self.base.fail(&err);
        }
    }

    fn on_status(&mut self, status: AuthStatusCode) {
        if status == AuthStatusCode::Authenticated {
            self.base.succeed();
        } else {
            self.base
                .fail(&Error::InvalidAnswer(format!("authentication failed: {status:?}")));
        }
    }
}

impl MessageCallback for AuthenticationPresenter {
    fn on_stream_message(
        &mut self,
        instance_id: InstanceId,
        _stream_id: StreamId,
        msg_type: MsgType,
        bytes: &[u8],
        _now: Instant,
    ) -> Result<usize> {
        trace!(instance_id, ?msg_type, "presenter message");
        if self.base.data.sender.is_none() {
            self.base.fail(&Error::NoActiveConnection);
            return Err(Error::NoActiveConnection);
        }

        let (message, consumed) = match decode_body(msg_type, bytes) {
            Ok(decoded) => decoded,
            Err(Error::CborIncompleteMessage) => return Err(Error::CborIncompleteMessage),
            Err(err) => {
                debug!(instance_id, %err, "presenter failed to parse message");
                self.base.fail(&err);
                return Err(err);
            }
        };

        match message {
            OspMessage::AuthSpake2Handshake(handshake) => self.on_handshake(&handshake),
            OspMessage::AuthStatus(status) => self.on_status(status.status),
            OspMessage::AuthSpake2Confirmation(_) | OspMessage::AuthCapabilities(_) => {
                self.base
                    .fail(&Error::InvalidAnswer("unexpected message for presenter".into()));
            }
        }
        Ok(consumed)
    }
}
