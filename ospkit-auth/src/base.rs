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

//! Shared state and plumbing for the two authentication roles.

use std::cell::RefCell;
use std::rc::Rc;

use ospkit_common::{Error, Fingerprint, InstanceId, Result};
use ospkit_msgs::{MessageSender, OspMessage};

use crate::crypto::SHARED_KEY_LEN;

/// Upward notifications from an authentication exchange.
pub trait AuthDelegate {
    fn on_authentication_succeed(&mut self, instance_id: InstanceId);
    fn on_authentication_failed(&mut self, instance_id: InstanceId, error: &Error);
}

pub type SharedDelegate = Rc<RefCell<dyn AuthDelegate>>;

/// Connections and secrets one authentication exchange works with.
pub struct AuthenticationData {
    /// Outbound protocol connection messages are written to.
    pub sender: Option<Box<dyn MessageSender>>,
    /// Inbound protocol connection, held to keep the reverse stream alive.
    pub receiver: Option<Box<dyn MessageSender>>,
    pub auth_token: String,
    pub password: String,
    pub shared_key: [u8; SHARED_KEY_LEN],
}

impl AuthenticationData {
    fn new(auth_token: String, password: String) -> Self {
        Self {
            sender: None,
            receiver: None,
            auth_token,
            password,
            shared_key: [0; SHARED_KEY_LEN],
        }
    }
}

/// State common to presenter and consumer.
pub(crate) struct AuthBase {
    pub instance_id: InstanceId,
    /// Fingerprint this role derives its private scalar from, learned
    /// out-of-band from the peer's `fp=` TXT record.
    pub fingerprint: Fingerprint,
    pub data: AuthenticationData,
    pub delegate: SharedDelegate,
}

impl AuthBase {
    pub fn new(
        instance_id: InstanceId,
        fingerprint: Fingerprint,
        auth_token: &str,
        password: &str,
        delegate: SharedDelegate,
    ) -> Self {
        Self {
            instance_id,
            fingerprint,
            data: AuthenticationData::new(auth_token.to_owned(), password.to_owned()),
            delegate,
        }
    }

    pub fn set_sender(&mut self, sender: Box<dyn MessageSender>) {
        self.data.sender = Some(sender);
    }

    pub fn set_receiver(&mut self, receiver: Box<dyn MessageSender>) {
        self.data.receiver = Some(receiver);
    }

    /// Send on the outbound connection; `NoActiveConnection` without one.
    pub fn send(&mut self, message: &OspMessage) -> Result<()> {
        match self.data.sender.as_mut() {
            Some(sender) => sender.send_message(message),
            None => Err(Error::NoActiveConnection),
        }
    }

    pub fn fail(&self, error: &Error) {
        self.delegate
            .borrow_mut()
            .on_authentication_failed(self.instance_id, error);
    }

    pub fn succeed(&self) {
        self.delegate
            .borrow_mut()
            .on_authentication_succeed(self.instance_id);
    }

    /// Initiation token check on the first handshake of an exchange.
    pub fn verify_token(&self, token: Option<&str>) -> Result<()> {
        match token {
            Some(token) if token == self.data.auth_token => Ok(()),
            _ => Err(Error::InvalidAnswer("initiation token mismatch".into())),
        }
    }
}
