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

//! The shared discovery engine: one mDNS cache plus one DNS-SD tracker,
//! used by both the listener and the publisher. The engine (and its
//! registered interfaces) survives for as long as either side is running.

use std::time::Instant;

use ospkit_mdns::{
    apply_batch, DnssdTracker, InstanceKey, MdnsConfig, MdnsSender, MdnsService, QueryCommand,
    ResolvedInstance, SocketId,
};
use ospkit_mdns::{JitterSource, MdnsQuestion, MdnsRecord};
use tracing::trace;

/// One interface the platform bound a multicast socket on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundInterface {
    pub index: u32,
    pub socket: SocketId,
}

/// Platform hooks for interface/socket lifetime. The embedder owns the real
/// UDP sockets; the engine only tracks their handles.
pub trait MdnsPlatform {
    /// Bind multicast sockets on the interfaces in `whitelist` (all
    /// interfaces when empty).
    fn register_interfaces(&mut self, whitelist: &[u32]) -> Vec<BoundInterface>;
    fn deregister_interfaces(&mut self, interfaces: &[BoundInterface]);
}

type BoxedSender = Box<dyn MdnsSender>;
type BoxedJitter = Box<dyn JitterSource>;

pub(crate) struct DiscoveryEngine {
    pub mdns: MdnsService<BoxedSender, BoxedJitter>,
    pub dnssd: DnssdTracker,
    pub bound: Vec<BoundInterface>,
    platform: Box<dyn MdnsPlatform>,
}

impl DiscoveryEngine {
    pub fn new(
        config: MdnsConfig,
        sender: BoxedSender,
        jitter: BoxedJitter,
        platform: Box<dyn MdnsPlatform>,
    ) -> Self {
        Self {
            mdns: MdnsService::new(config, sender, jitter),
            dnssd: DnssdTracker::new(),
            bound: Vec::new(),
            platform,
        }
    }

    /// Bind interfaces on first use; later callers share the same set.
    pub fn ensure_interfaces(&mut self, whitelist: &[u32]) {
        if !self.bound.is_empty() {
            return;
        }
        self.bound = self.platform.register_interfaces(whitelist);
        for interface in &self.bound {
            self.mdns.register_socket(interface.socket);
        }
    }

    pub fn interface_index(&self, socket: SocketId) -> u32 {
        self.bound
            .iter()
            .find(|interface| interface.socket == socket)
            .map(|interface| interface.index)
            .unwrap_or(u32::MAX)
    }

    /// Release everything once neither the listener nor the publisher needs
    /// the engine any more.
    pub fn teardown(&mut self) {
        self.mdns.clear();
        self.dnssd.clear();
        self.platform.deregister_interfaces(&self.bound);
        self.bound.clear();
    }

    pub fn start_ptr_queries(&mut self, service_type: &ospkit_mdns::DomainName, now: Instant) {
        for interface in self.bound.clone() {
            let question = MdnsQuestion::new(service_type.clone(), ospkit_mdns::DnsType::Ptr);
            // A query may already be running when the listener resumes.
            let _ = self.mdns.start_query(interface.socket, question, now);
        }
    }

    pub fn publish(&mut self, records_per_socket: Vec<(SocketId, Vec<MdnsRecord>)>) {
        for (socket, records) in records_per_socket {
            self.mdns.register_publication(socket, records);
        }
    }

    pub fn unpublish(&mut self) {
        for interface in self.bound.clone() {
            self.mdns.deregister_publication(interface.socket);
        }
    }

    /// Feed one inbound packet and resolve the touched instances.
    ///
    /// A single response often carries PTR, SRV, TXT and address records
    /// together. Starting the SRV query as a reaction to the PTR would miss
    /// the SRV answer in the same packet, so the message is re-fed to the
    /// cache until a pass starts no further queries. All passes accumulate
    /// into one batch, so the instance still gets exactly one notification.
    pub fn handle_packet(
        &mut self,
        socket: SocketId,
        bytes: &[u8],
        now: Instant,
    ) -> Vec<(InstanceKey, Option<ResolvedInstance>)> {
        let message = match ospkit_mdns::parse_message(bytes) {
            Ok(message) => message,
            Err(err) => {
                trace!(%err, "discarding malformed mDNS packet");
                return Vec::new();
            }
        };

        let mut batch = ospkit_mdns::Batch::default();
        let mut updates = self.mdns.handle_message(socket, &message, now);
        loop {
            let mut commands = Vec::new();
            for update in &updates {
                self.dnssd.handle_update(update, &mut batch, &mut commands);
            }
            let mut started = false;
            for command in commands {
                match command {
                    QueryCommand::Start { socket, question } => {
                        if self.mdns.start_query(socket, question, now).is_ok() {
                            started = true;
                        }
                    }
                    QueryCommand::Stop { socket, key } => {
                        self.mdns.stop_query(socket, &key);
                    }
                }
            }
            if !started {
                break;
            }
            updates = self.mdns.handle_message(socket, &message, now);
        }
        self.dnssd.finish_batch(batch)
    }

    /// Drive deadlines and resolve instances touched by expirations.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<(InstanceKey, Option<ResolvedInstance>)> {
        let updates = self.mdns.handle_timeout(now);
        self.process_updates(&updates, now)
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.mdns.poll_timeout()
    }

    fn process_updates(
        &mut self,
        updates: &[ospkit_mdns::CacheUpdate],
        now: Instant,
    ) -> Vec<(InstanceKey, Option<ResolvedInstance>)> {
        if updates.is_empty() {
            return Vec::new();
        }
        let mut commands = Vec::new();
        let results = apply_batch(&mut self.dnssd, updates, &mut commands);
        for command in commands {
            match command {
                QueryCommand::Start { socket, question } => {
                    trace!(%question.name, ?question.dns_type, "start query");
                    let _ = self.mdns.start_query(socket, question, now);
                }
                QueryCommand::Stop { socket, key } => {
                    trace!(%key.name, ?key.dns_type, "stop query");
                    self.mdns.stop_query(socket, &key);
                }
            }
        }
        results
    }
}
