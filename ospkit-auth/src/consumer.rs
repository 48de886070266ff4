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

//! Consumer role: the user reads the PIN off the presenter and enters it
//! here.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use ospkit_common::{Error, Fingerprint, InstanceId, Result, StreamId};
use ospkit_msgs::{
    decode_body, AuthSpake2Confirmation, AuthSpake2Handshake, AuthStatus, AuthStatusCode,
    MessageCallback, MessageDemuxer, MessageSender, MessageWatch, MsgType, OspMessage, PskStatus,
    CONFIRMATION_LEN,
};
use subtle::ConstantTimeEq;
use tracing::{debug, trace};

use crate::base::{AuthBase, SharedDelegate};
use crate::crypto::{compute_private_key, compute_public_value, compute_shared_key};

/// The PSK-entering side of the SPAKE2 exchange.
///
/// Answers the presenter's opening handshake once the user-entered password
/// is set, then verifies the presenter's confirmation value byte-wise against
/// its own shared key.
pub struct AuthenticationConsumer {
    base: AuthBase,
    _watches: Vec<MessageWatch>,
}

impl AuthenticationConsumer {
    pub fn new(
        instance_id: InstanceId,
        fingerprint: Fingerprint,
        auth_token: &str,
        delegate: SharedDelegate,
    ) -> Self {
        Self {
            base: AuthBase::new(instance_id, fingerprint, auth_token, "", delegate),
            _watches: Vec::new(),
        }
    }

    /// Subscribe to the authentication message types on `demuxer`.
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

    /// Record the PIN the user entered.
    pub fn set_password(&mut self, password: &str) {
        self.base.data.password = password.to_owned();
    }

    fn on_handshake(&mut self, handshake: &AuthSpake2Handshake) {
        if let Err(err) = self
            .base
            .verify_token(handshake.initiation_token.as_deref())
        {
            self.base.fail(&err);
            return;
        }

        match handshake.psk_status {
            // The presenter is showing (or about to show) the PIN. Compute
            // our side of the key and answer with our public value.
            PskStatus::NeedsPresentation | PskStatus::Shown => {
                let result = compute_private_key(&self.base.fingerprint).and_then(|private_key| {
                    let shared_key = compute_shared_key(
                        &private_key,
                        &handshake.public_value,
                        &self.base.data.password,
                    )?;
                    Ok((private_key, shared_key))
                });
                let (private_key, shared_key) = match result {
                    Ok(pair) => pair,
                    Err(err) => {
                        self.base.fail(&err);
                        return;
                    }
                };
                self.base.data.shared_key = shared_key;

                let message = OspMessage::AuthSpake2Handshake(AuthSpake2Handshake {
                    initiation_token: handshake.initiation_token.clone(),
                    psk_status: PskStatus::Input,
                    public_value: compute_public_value(&private_key),
                });
                if let Err(err) = self.base.send(&message) {
                    self.base.fail(&err);
                }
            }
            PskStatus::Input => {
                self.base
                    .fail(&Error::InvalidAnswer("received wrong PSK status".into()));
            }
        }
    }

    fn on_confirmation(&mut self, confirmation: &AuthSpake2Confirmation) {
        let matches = confirmation.confirmation_value.len() == CONFIRMATION_LEN
            && bool::from(
                confirmation
                    .confirmation_value
                    .as_slice()
                    .ct_eq(&self.base.data.shared_key),
            );

        let status = if matches {
            AuthStatusCode::Authenticated
        } else {
            AuthStatusCode::ProofInvalid
        };
        let reply = OspMessage::AuthStatus(AuthStatus { status });
        if let Err(err) = self.base.send(&reply) {
            self.base.fail(&err);
            return;
        }

        if matches {
            self.base.succeed();
        } else {
            self.base
                .fail(&Error::InvalidAnswer("shared key mismatch".into()));
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

impl MessageCallback for AuthenticationConsumer {
    fn on_stream_message(
        &mut self,
        instance_id: InstanceId,
        _stream_id: StreamId,
        msg_type: MsgType,
        bytes: &[u8],
        _now: Instant,
    ) -> Result<usize> {
        trace!(instance_id, ?msg_type, "consumer message");
        if self.base.data.sender.is_none() {
            self.base.fail(&Error::NoActiveConnection);
            return Err(Error::NoActiveConnection);
        }

        let (message, consumed) = match decode_body(msg_type, bytes) {
            Ok(decoded) => decoded,
            Err(Error::CborIncompleteMessage) => return Err(Error::CborIncompleteMessage),
            Err(err) => {
                debug!(instance_id, %err, "consumer failed to parse message");
                self.base.fail(&err);
                return Err(err);
            }
        };

        match message {
            OspMessage::AuthSpake2Handshake(handshake) => self.on_handshake(&handshake),
            OspMessage::AuthSpake2Confirmation(confirmation) => self.on_confirmation(&confirmation),
            OspMessage::AuthStatus(status) => self.on_status(status.status),
            OspMessage::AuthCapabilities(_) => {
                self.base
                    .fail(&Error::InvalidAnswer("unexpected message for consumer".into()));
            }
        }
        Ok(consumed)
    }
}
