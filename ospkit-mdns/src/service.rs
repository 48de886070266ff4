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

//! The mDNS engine: per-socket question trackers, cache events and a minimal
//! responder for locally published records.
//!
//! The engine is sans-IO. The embedder owns the multicast sockets, feeds
//! inbound packets into [`MdnsService::handle_packet`], drives deadlines via
//! [`MdnsService::poll_timeout`] / [`MdnsService::handle_timeout`], and sends
//! whatever the [`MdnsSender`] is handed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ospkit_common::Result;
use tracing::{debug, trace};

use crate::dnssd::CacheUpdate;
use crate::records::{MdnsQuestion, MdnsRecord, QuestionKey, SocketId};
use crate::trackers::{JitterSource, QuestionTracker, TrackerConfig};
use crate::wire::{parse_message, serialize_message, MdnsMessage};

/// Engine configuration. `tracker` carries the RFC 6762 scheduling knobs,
/// including the goodbye grace window.
#[derive(Debug, Clone, Default)]
pub struct MdnsConfig {
    pub tracker: TrackerConfig,
}

/// Outgoing packet sink. One engine can span several sockets (one per
/// registered interface), so every send names its socket.
pub trait MdnsSender {
    fn send(&mut self, socket: SocketId, message: &MdnsMessage);
}

impl<T: MdnsSender + ?Sized> MdnsSender for Box<T> {
    fn send(&mut self, socket: SocketId, message: &MdnsMessage) {
        (**self).send(socket, message)
    }
}

pub struct MdnsService<S: MdnsSender, J: JitterSource> {
    config: MdnsConfig,
    sender: S,
    jitter: J,
    sockets: Vec<SocketId>,
    questions: HashMap<(SocketId, QuestionKey), QuestionTracker>,
    publications: HashMap<SocketId, Vec<MdnsRecord>>,
}

impl<S: MdnsSender, J: JitterSource> MdnsService<S, J> {
    pub fn new(config: MdnsConfig, sender: S, jitter: J) -> Self {
        Self {
            config,
            sender,
            jitter,
            sockets: Vec::new(),
            questions: HashMap::new(),
            publications: HashMap::new(),
        }
    }

    pub fn sender_mut(&mut self) -> &mut S {
        &mut self.sender
    }

    pub fn register_socket(&mut self, socket: SocketId) {
        if !self.sockets.contains(&socket) {
            self.sockets.push(socket);
        }
    }

    /// Drop a socket along with its queries and publications. Goodbyes for
    /// published records are sent first.
    pub fn deregister_socket(&mut self, socket: SocketId) {
        self.deregister_publication(socket);
        self.questions.retain(|(s, _), _| *s != socket);
        self.sockets.retain(|s| *s != socket);
    }

    pub fn sockets(&self) -> &[SocketId] {
        &self.sockets
    }

    /// Begin a continuous query on one socket. Starting an already-running
    /// query is `OperationInvalid`, per the tracker contract.
    pub fn start_query(
        &mut self,
        socket: SocketId,
        question: MdnsQuestion,
        now: Instant,
    ) -> Result<()> {
        let key = (socket, question.key());
        let tracker = self
            .questions
            .entry(key)
            .or_insert_with(|| QuestionTracker::new(self.config.tracker.clone()));
        tracker.start(question, now, &mut self.jitter)
    }

    /// Stop a continuous query and drop its cached answers.
    pub fn stop_query(&mut self, socket: SocketId, key: &QuestionKey) {
        self.questions.remove(&(socket, key.clone()));
    }

    pub fn is_query_running(&self, socket: SocketId, key: &QuestionKey) -> bool {
        self.questions
            .get(&(socket, key.clone()))
            .map(QuestionTracker::is_started)
            .unwrap_or(false)
    }

    /// Answers currently cached for a query.
    pub fn known_records(
        &self,
        socket: SocketId,
        key: &QuestionKey,
    ) -> impl Iterator<Item = &MdnsRecord> {
        self.questions
            .get(&(socket, key.clone()))
            .into_iter()
            .flat_map(QuestionTracker::known_records)
    }

    /// Reset every query's backoff and search again now.
    pub fn search_now(&mut self, now: Instant) {
        for tracker in self.questions.values_mut() {
            tracker.search_now(now);
        }
    }

    /// Publish records on a socket and announce them unsolicited.
    pub fn register_publication(&mut self, socket: SocketId, records: Vec<MdnsRecord>) {
        if !records.is_empty() {
            self.sender
                .send(socket, &MdnsMessage::response(records.clone()));
        }
        self.publications.insert(socket, records);
    }

    /// Retract a publication with goodbye records (TTL 0).
    pub fn deregister_publication(&mut self, socket: SocketId) {
        let Some(records) = self.publications.remove(&socket) else {
            return;
        };
        if records.is_empty() {
            return;
        }
        let goodbyes = records
            .into_iter()
            .map(|mut record| {
                record.ttl = Duration::ZERO;
                record
            })
            .collect();
        self.sender.send(socket, &MdnsMessage::response(goodbyes));
    }

    /// Feed one inbound packet. Malformed packets are discarded. Returns the
    /// cache events the packet produced.
    pub fn handle_packet(
        &mut self,
        socket: SocketId,
        bytes: &[u8],
        now: Instant,
    ) -> Vec<CacheUpdate> {
        let message = match parse_message(bytes) {
            Ok(message) => message,
            Err(err) => {
                debug!(%err, "discarding malformed mDNS packet");
                return Vec::new();
            }
        };
        self.handle_message(socket, &message, now)
    }

    /// Feed one parsed message. Callers that start new queries in response to
    /// the message's records may feed it again so the new queries see answers
    /// carried in the same packet.
    pub fn handle_message(
        &mut self,
        socket: SocketId,
        message: &MdnsMessage,
        now: Instant,
    ) -> Vec<CacheUpdate> {
        if message.is_response {
            let mut updates = Vec::new();
            for record in message.records() {
                for ((s, _), tracker) in self.questions.iter_mut() {
                    if *s != socket {
                        continue;
                    }
                    if let Some((record, event)) =
                        tracker.on_record_received(record, now, &mut self.jitter)
                    {
                        updates.push(CacheUpdate {
                            socket,
                            record,
                            event,
                        });
                    }
                }
            }
            updates
        } else {
            self.answer_query(socket, message);
            Vec::new()
        }
    }

    /// Respond to an inbound query from our publications.
    fn answer_query(&mut self, socket: SocketId, query: &MdnsMessage) {
        let Some(records) = self.publications.get(&socket) else {
            return;
        };
        let answers: Vec<MdnsRecord> = records
            .iter()
            .filter(|record| query.questions.iter().any(|q| q.matches(record)))
            .cloned()
            .collect();
        if answers.is_empty() {
            return;
        }
        trace!(socket = socket.0, answers = answers.len(), "answering query");
        self.sender.send(socket, &MdnsMessage::response(answers));
    }

    /// Process deadlines: continuous-query sends, refresh queries, record
    /// expirations. Returns the expiry events.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<CacheUpdate> {
        let mut updates = Vec::new();
        let mut per_socket: HashMap<SocketId, Vec<MdnsQuestion>> = HashMap::new();

        for ((socket, _), tracker) in self.questions.iter_mut() {
            let mut queries = Vec::new();
            let mut events = Vec::new();
            tracker.handle_timeout(now, &mut self.jitter, &mut queries, &mut events);
            per_socket.entry(*socket).or_default().extend(queries);
            updates.extend(events.into_iter().map(|(record, event)| CacheUpdate {
                socket: *socket,
                record,
                event,
            }));
        }

        for (socket, questions) in per_socket {
            if questions.is_empty() {
                continue;
            }
            self.sender.send(socket, &MdnsMessage::query(questions));
        }
        updates
    }

    /// Earliest deadline across all trackers.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.questions
            .values()
            .filter_map(QuestionTracker::next_wakeup)
            .min()
    }

    /// Stop every continuous query and drop cached answers, leaving
    /// publications and sockets in place.
    pub fn stop_all_queries(&mut self) {
        self.questions.clear();
    }

    /// Drop all queries, cached answers and publications without sending
    /// goodbyes; used when the whole engine is being torn down.
    pub fn clear(&mut self) {
        self.questions.clear();
        self.publications.clear();
        self.sockets.clear();
    }
}

/// Test double capturing everything the engine sends.
#[derive(Debug, Default)]
pub struct CapturingSender {
    pub sent: Vec<(SocketId, MdnsMessage)>,
}

impl MdnsSender for CapturingSender {
    fn send(&mut self, socket: SocketId, message: &MdnsMessage) {
        self.sent.push((socket, message.clone()));
    }
}

/// Serialize-on-send sink for embedders backed by a real UDP socket: the
/// embedder supplies the closure that hands bytes to the platform.
pub struct FnSender<F: FnMut(SocketId, Vec<u8>)>(pub F);

impl<F: FnMut(SocketId, Vec<u8>)> MdnsSender for FnSender<F> {
    fn send(&mut self, socket: SocketId, message: &MdnsMessage) {
        (self.0)(socket, serialize_message(message));
    }
}
