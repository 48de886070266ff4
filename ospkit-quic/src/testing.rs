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

//! Deterministic transport fakes for driving the connection managers in
//! tests.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::rc::Rc;

use ospkit_common::{Error, Fingerprint, Result, StreamId};

use crate::transport::{
    ClientTransport, EndpointBinder, QuicConnectionHandle, QuicStreamHandle,
};

/// Everything written to one fake stream.
#[derive(Debug, Default)]
pub struct StreamLog {
    pub written: Vec<Vec<u8>>,
    pub write_closed: bool,
}

pub struct FakeStream {
    stream_id: StreamId,
    pub log: Rc<RefCell<StreamLog>>,
}

impl FakeStream {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            log: Rc::new(RefCell::new(StreamLog::default())),
        }
    }
}

impl QuicStreamHandle for FakeStream {
    fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut log = self.log.borrow_mut();
        if log.write_closed {
            return Err(Error::NoActiveConnection);
        }
        log.written.push(bytes.to_vec());
        Ok(())
    }

    fn close_write(&mut self) -> Result<()> {
        self.log.borrow_mut().write_closed = true;
        Ok(())
    }
}

/// Shared view of a fake connection for assertions after the handle has been
/// moved into a manager.
#[derive(Debug, Default)]
pub struct ConnectionLog {
    pub closed: bool,
    pub opened_streams: Vec<StreamId>,
}

pub struct FakeConnection {
    pub log: Rc<RefCell<ConnectionLog>>,
    next_stream_id: Rc<Cell<StreamId>>,
    pub stream_logs: Rc<RefCell<Vec<Rc<RefCell<StreamLog>>>>>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(ConnectionLog::default())),
            next_stream_id: Rc::new(Cell::new(0)),
            stream_logs: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl Default for FakeConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl QuicConnectionHandle for FakeConnection {
    fn open_stream(&mut self) -> Result<Box<dyn QuicStreamHandle>> {
        if self.log.borrow().closed {
            return Err(Error::NoActiveConnection);
        }
        let stream_id = self.next_stream_id.get();
        self.next_stream_id.set(stream_id + 4);
        let stream = FakeStream::new(stream_id);
        self.log.borrow_mut().opened_streams.push(stream_id);
        self.stream_logs.borrow_mut().push(stream.log.clone());
        Ok(Box::new(stream))
    }

    fn close(&mut self) {
        self.log.borrow_mut().closed = true;
    }
}

/// Binder that fails for a chosen set of endpoints.
#[derive(Debug, Default)]
pub struct FakeBinder {
    pub fail: HashSet<SocketAddr>,
    pub bound: Vec<SocketAddr>,
}

impl EndpointBinder for FakeBinder {
    fn bind(&mut self, endpoint: SocketAddr) -> Result<()> {
        if self.fail.contains(&endpoint) {
            return Err(Error::SocketFailure(format!("cannot bind {endpoint}")));
        }
        self.bound.push(endpoint);
        Ok(())
    }
}

/// Client transport that records handshake launches.
#[derive(Debug, Default)]
pub struct FakeClientTransport {
    pub started: Vec<(String, SocketAddr, Fingerprint)>,
    pub fail_next: bool,
}

impl ClientTransport for FakeClientTransport {
    fn start_connect(
        &mut self,
        instance_name: &str,
        endpoint: SocketAddr,
        fingerprint: &Fingerprint,
    ) -> Result<()> {
        if self.fail_next {
            return Err(Error::SocketFailure("cannot create client socket".into()));
        }
        self.started
            .push((instance_name.to_owned(), endpoint, *fingerprint));
        Ok(())
    }
}
