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

//! DNS-SD layer: maps record changes onto service instances and hosts.
//!
//! Instances are keyed by their PTR target name, hosts by (socket, SRV
//! target). Hosts reference their dependent instances as a set of value keys
//! rather than parent pointers, so the bidirectional graph cannot dangle. One
//! batch of record events collapses into one notification per instance,
//! emitted at end-of-batch in insertion order.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::{debug, trace};

use crate::name::DomainName;
use crate::records::{DnsType, MdnsQuestion, MdnsRecord, QuestionKey, Rdata, SocketId};
use crate::trackers::RecordEvent;

/// Identity of a service instance: (instance, service, domain), compared
/// label-wise case-insensitively via the underlying name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    name: DomainName,
}

impl InstanceKey {
    pub fn new(name: DomainName) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &DomainName {
        &self.name
    }

    /// The user-visible instance label.
    pub fn instance(&self) -> &str {
        self.name.first_label().unwrap_or_default()
    }

    pub fn service_key(&self) -> ServiceKey {
        let labels = self.name.labels();
        let service = labels.get(1..).unwrap_or_default();
        ServiceKey {
            name: DomainName::from_labels(service.iter().cloned()).unwrap_or_default(),
        }
    }
}

/// Identity of a service type: (service, domain).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ServiceKey {
    name: DomainName,
}

impl ServiceKey {
    pub fn new(name: DomainName) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &DomainName {
        &self.name
    }
}

/// One record change scoped to the socket it was observed on.
#[derive(Debug, Clone)]
pub struct CacheUpdate {
    pub socket: SocketId,
    pub record: MdnsRecord,
    pub event: RecordEvent,
}

/// Query lifecycle commands the DNS-SD layer issues back to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCommand {
    Start {
        socket: SocketId,
        question: MdnsQuestion,
    },
    Stop {
        socket: SocketId,
        key: QuestionKey,
    },
}

/// Mutable per-instance state accumulated from PTR/SRV/TXT records.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub socket: SocketId,
    /// SRV target; `Some` means the SRV record is present.
    pub domain_name: Option<DomainName>,
    pub port: u16,
    pub txt: Vec<String>,
    pub has_ptr: bool,
}

impl ServiceInstance {
    fn new(socket: SocketId) -> Self {
        Self {
            socket,
            domain_name: None,
            port: 0,
            txt: Vec::new(),
            has_ptr: false,
        }
    }

    pub fn has_srv(&self) -> bool {
        self.domain_name.is_some()
    }
}

/// Addresses of one SRV target host plus the instances depending on it.
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub v4: Option<Ipv4Addr>,
    pub v6: Option<Ipv6Addr>,
    pub dependents: HashSet<InstanceKey>,
}

impl HostInfo {
    pub fn has_address(&self) -> bool {
        self.v4.is_some() || self.v6.is_some()
    }
}

/// Fully resolved, ready-to-announce view of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstance {
    pub key: InstanceKey,
    pub friendly_name: String,
    pub socket: SocketId,
    pub port: u16,
    pub v4: Option<Ipv4Addr>,
    pub v6: Option<Ipv6Addr>,
    pub txt: Vec<String>,
}

/// Batch of instances touched by one run of record events, insertion-ordered
/// and deduplicated.
#[derive(Debug, Default)]
pub struct Batch {
    modified: Vec<InstanceKey>,
}

impl Batch {
    fn mark(&mut self, key: InstanceKey) {
        if !self.modified.contains(&key) {
            self.modified.push(key);
        }
    }
}

/// The DNS-SD state machine.
#[derive(Debug, Default)]
pub struct DnssdTracker {
    instances: HashMap<InstanceKey, ServiceInstance>,
    hosts: HashMap<(SocketId, DomainName), HostInfo>,
}

impl DnssdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(&self, key: &InstanceKey) -> Option<&ServiceInstance> {
        self.instances.get(key)
    }

    pub fn instances(&self) -> impl Iterator<Item = (&InstanceKey, &ServiceInstance)> {
        self.instances.iter()
    }

    pub fn host(&self, socket: SocketId, name: &DomainName) -> Option<&HostInfo> {
        self.hosts.get(&(socket, name.clone()))
    }

    pub fn hosts(&self) -> impl Iterator<Item = (&(SocketId, DomainName), &HostInfo)> {
        self.hosts.iter()
    }

    /// Drop all state, e.g. on listener stop. No notifications are produced;
    /// the facade is responsible for reporting removal upward.
    pub fn clear(&mut self) {
        self.instances.clear();
        self.hosts.clear();
    }

    /// Apply one record change, accumulating touched instances into `batch`
    /// and query lifecycle changes into `commands`.
    pub fn handle_update(
        &mut self,
        update: &CacheUpdate,
        batch: &mut Batch,
        commands: &mut Vec<QueryCommand>,
    ) {
        let added = match update.event {
            RecordEvent::Created | RecordEvent::Updated => true,
            RecordEvent::Expired => false,
        };
        match (&update.record.rdata, added) {
            (Rdata::Ptr(target), true) => {
                self.on_ptr_added(update.socket, target.clone(), batch, commands);
            }
            (Rdata::Ptr(target), false) => {
                self.on_ptr_removed(update.socket, target.clone(), batch, commands);
            }
            (Rdata::Srv { port, target, .. }, true) => {
                self.on_srv_added(
                    update.socket,
                    &update.record.name,
                    target.clone(),
                    *port,
                    batch,
                    commands,
                );
            }
            (Rdata::Srv { target, .. }, false) => {
                self.on_srv_removed(update.socket, &update.record.name, target, batch, commands);
            }
            (Rdata::Txt(entries), true) => {
                self.on_txt(&update.record.name, Some(entries.clone()), batch);
            }
            (Rdata::Txt(_), false) => {
                self.on_txt(&update.record.name, None, batch);
            }
            (Rdata::A(addr), true) => {
                self.on_address(update.socket, &update.record.name, Some(*addr), None, batch);
            }
            (Rdata::A(_), false) => {
                self.on_v4_cleared(update.socket, &update.record.name, batch);
            }
            (Rdata::Aaaa(addr), true) => {
                self.on_address(update.socket, &update.record.name, None, Some(*addr), batch);
            }
            (Rdata::Aaaa(_), false) => {
                self.on_v6_cleared(update.socket, &update.record.name, batch);
            }
        }
    }

    /// End one batch: resolve every touched instance and drop the ones that
    /// lost both their PTR and SRV records.
    pub fn finish_batch(&mut self, batch: Batch) -> Vec<(InstanceKey, Option<ResolvedInstance>)> {
        let mut results = Vec::with_capacity(batch.modified.len());
        for key in batch.modified {
            let resolved = self.resolve(&key);
            if resolved.is_none() {
                if let Some(instance) = self.instances.get(&key) {
                    if !instance.has_ptr && !instance.has_srv() {
                        debug!(instance = %key.name(), "retiring service instance");
                        self.instances.remove(&key);
                    }
                }
            }
            results.push((key, resolved));
        }
        results
    }

    /// Ready iff PTR and SRV are present, TXT is non-empty and at least one
    /// address of the SRV target is known.
    fn resolve(&self, key: &InstanceKey) -> Option<ResolvedInstance> {
        let instance = self.instances.get(key)?;
        let target = instance.domain_name.as_ref()?;
        if !instance.has_ptr || instance.txt.is_empty() {
            return None;
        }
        let host = self.hosts.get(&(instance.socket, target.clone()))?;
        if !host.has_address() {
            return None;
        }
        Some(ResolvedInstance {
            key: key.clone(),
            friendly_name: key.instance().to_owned(),
            socket: instance.socket,
            port: instance.port,
            v4: host.v4,
            v6: host.v6,
            txt: instance.txt.clone(),
        })
    }

    fn on_ptr_added(
        &mut self,
        socket: SocketId,
        target: DomainName,
        batch: &mut Batch,
        commands: &mut Vec<QueryCommand>,
    ) {
        let key = InstanceKey::new(target.clone());
        let instance = self.instances.entry(key.clone()).or_insert_with(|| {
            trace!(instance = %target, "new service instance from PTR");
            commands.push(QueryCommand::Start {
                socket,
                question: MdnsQuestion::new(target.clone(), DnsType::Srv),
            });
            commands.push(QueryCommand::Start {
                socket,
                question: MdnsQuestion::new(target.clone(), DnsType::Txt),
            });
            ServiceInstance::new(socket)
        });
        instance.has_ptr = true;
        batch.mark(key);
    }

    fn on_ptr_removed(
        &mut self,
        socket: SocketId,
        target: DomainName,
        batch: &mut Batch,
        commands: &mut Vec<QueryCommand>,
    ) {
        let key = InstanceKey::new(target.clone());
        let Some(instance) = self.instances.get_mut(&key) else {
            return;
        };
        if instance.socket != socket {
            return;
        }
        instance.has_ptr = false;
        // PTR refreshes are lossy in the wild; the instance is only retired
        // once the SRV record is gone as well.
        if !instance.has_srv() {
            commands.push(QueryCommand::Stop {
                socket,
                key: QuestionKey {
                    name: target.clone(),
                    dns_type: DnsType::Srv,
                },
            });
            commands.push(QueryCommand::Stop {
                socket,
                key: QuestionKey {
                    name: target,
                    dns_type: DnsType::Txt,
                },
            });
        }
        batch.mark(key);
    }

    fn on_srv_added(
        &mut self,
        socket: SocketId,
        instance_name: &DomainName,
        target: DomainName,
        port: u16,
        batch: &mut Batch,
        commands: &mut Vec<QueryCommand>,
    ) {
        let key = InstanceKey::new(instance_name.clone());
        let instance = self
            .instances
            .entry(key.clone())
            .or_insert_with(|| ServiceInstance::new(socket));

        // Re-target: drop the dependency on the previous host first.
        let previous = instance.domain_name.take();
        instance.domain_name = Some(target.clone());
        instance.port = port;
        if let Some(previous) = previous {
            if previous != target {
                Self::drop_dependent(&mut self.hosts, socket, &previous, &key, commands);
            }
        }

        let host = self
            .hosts
            .entry((socket, target.clone()))
            .or_insert_with(|| {
                trace!(host = %target, "new host from SRV");
                commands.push(QueryCommand::Start {
                    socket,
                    question: MdnsQuestion::new(target.clone(), DnsType::A),
                });
                commands.push(QueryCommand::Start {
                    socket,
                    question: MdnsQuestion::new(target.clone(), DnsType::Aaaa),
                });
                HostInfo::default()
            });
        host.dependents.insert(key.clone());
        batch.mark(key);
    }

    fn on_srv_removed(
        &mut self,
        socket: SocketId,
        instance_name: &DomainName,
        target: &DomainName,
        batch: &mut Batch,
        commands: &mut Vec<QueryCommand>,
    ) {
        let key = InstanceKey::new(instance_name.clone());
        let Some(instance) = self.instances.get_mut(&key) else {
            return;
        };

        Self::drop_dependent(&mut self.hosts, socket, target, &key, commands);
        instance.domain_name = None;
        instance.port = 0;
        if !instance.has_ptr {
            commands.push(QueryCommand::Stop {
                socket,
                key: QuestionKey {
                    name: instance_name.clone(),
                    dns_type: DnsType::Srv,
                },
            });
            commands.push(QueryCommand::Stop {
                socket,
                key: QuestionKey {
                    name: instance_name.clone(),
                    dns_type: DnsType::Txt,
                },
            });
        }
        batch.mark(key);
    }

    /// Remove `dependent` from the host at (socket, target); when the
    /// dependent set empties, the host's address queries stop and the host is
    /// dropped.
    fn drop_dependent(
        hosts: &mut HashMap<(SocketId, DomainName), HostInfo>,
        socket: SocketId,
        target: &DomainName,
        dependent: &InstanceKey,
        commands: &mut Vec<QueryCommand>,
    ) {
        let Some(host) = hosts.get_mut(&(socket, target.clone())) else {
            return;
        };
        host.dependents.remove(dependent);
        if host.dependents.is_empty() {
            commands.push(QueryCommand::Stop {
                socket,
                key: QuestionKey {
                    name: target.clone(),
                    dns_type: DnsType::A,
                },
            });
            commands.push(QueryCommand::Stop {
                socket,
                key: QuestionKey {
                    name: target.clone(),
                    dns_type: DnsType::Aaaa,
                },
            });
            hosts.remove(&(socket, target.clone()));
        }
    }

    fn on_txt(&mut self, instance_name: &DomainName, txt: Option<Vec<String>>, batch: &mut Batch) {
        let key = InstanceKey::new(instance_name.clone());
        let Some(instance) = self.instances.get_mut(&key) else {
            return;
        };
        instance.txt = txt.unwrap_or_default();
        batch.mark(key);
    }

    fn on_address(
        &mut self,
        socket: SocketId,
        host_name: &DomainName,
        v4: Option<Ipv4Addr>,
        v6: Option<Ipv6Addr>,
        batch: &mut Batch,
    ) {
        let Some(host) = self.hosts.get_mut(&(socket, host_name.clone())) else {
            // Address record for a host no instance depends on; nothing to do.
            return;
        };
        if let Some(addr) = v4 {
            host.v4 = Some(addr);
        }
        if let Some(addr) = v6 {
            host.v6 = Some(addr);
        }
        for dependent in &host.dependents {
            batch.mark(dependent.clone());
        }
    }

    fn on_v4_cleared(&mut self, socket: SocketId, host_name: &DomainName, batch: &mut Batch) {
        if let Some(host) = self.hosts.get_mut(&(socket, host_name.clone())) {
            host.v4 = None;
            for dependent in &host.dependents {
                batch.mark(dependent.clone());
            }
        }
    }

    fn on_v6_cleared(&mut self, socket: SocketId, host_name: &DomainName, batch: &mut Batch) {
        if let Some(host) = self.hosts.get_mut(&(socket, host_name.clone())) {
            host.v6 = None;
            for dependent in &host.dependents {
                batch.mark(dependent.clone());
            }
        }
    }
}

/// Convenience driver: apply a whole batch of updates and resolve it.
pub fn apply_batch(
    tracker: &mut DnssdTracker,
    updates: &[CacheUpdate],
    commands: &mut Vec<QueryCommand>,
) -> Vec<(InstanceKey, Option<ResolvedInstance>)> {
    let mut batch = Batch::default();
    for update in updates {
        tracker.handle_update(update, &mut batch, commands);
    }
    tracker.finish_batch(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SOCKET: SocketId = SocketId(7);

    fn update(record: MdnsRecord, event: RecordEvent) -> CacheUpdate {
        CacheUpdate {
            socket: SOCKET,
            record,
            event,
        }
    }

    fn ptr() -> MdnsRecord {
        MdnsRecord::new(
            DomainName::parse("_openscreen._udp.local").unwrap(),
            Duration::from_secs(120),
            Rdata::Ptr(DomainName::parse("Friendly._openscreen._udp.local").unwrap()),
        )
    }

    fn srv() -> MdnsRecord {
        MdnsRecord::new(
            DomainName::parse("Friendly._openscreen._udp.local").unwrap(),
            Duration::from_secs(120),
            Rdata::Srv {
                priority: 0,
                weight: 0,
                port: 8009,
                target: DomainName::parse("host.local").unwrap(),
            },
        )
    }

    fn txt() -> MdnsRecord {
        MdnsRecord::new(
            DomainName::parse("Friendly._openscreen._udp.local").unwrap(),
            Duration::from_secs(120),
            Rdata::Txt(vec!["fp=AAA".into()]),
        )
    }

    fn a() -> MdnsRecord {
        MdnsRecord::new(
            DomainName::parse("host.local").unwrap(),
            Duration::from_secs(120),
            Rdata::A("192.168.0.2".parse().unwrap()),
        )
    }

    #[test]
    fn instance_becomes_ready_once_all_records_arrive() {
        let mut tracker = DnssdTracker::new();
        let mut commands = Vec::new();

        let results = apply_batch(
            &mut tracker,
            &[update(ptr(), RecordEvent::Created)],
            &mut commands,
        );
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_none());
        // PTR starts SRV + TXT queries.
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, QueryCommand::Start { .. }))
                .count(),
            2
        );

        commands.clear();
        let results = apply_batch(
            &mut tracker,
            &[
                update(srv(), RecordEvent::Created),
                update(txt(), RecordEvent::Created),
                update(a(), RecordEvent::Created),
            ],
            &mut commands,
        );
        // One collapsed notification for the single touched instance.
        assert_eq!(results.len(), 1);
        let resolved = results[0].1.as_ref().expect("instance should be ready");
        assert_eq!(resolved.friendly_name, "Friendly");
        assert_eq!(resolved.port, 8009);
        assert_eq!(resolved.v4, Some("192.168.0.2".parse().unwrap()));
        // SRV starts A + AAAA queries for the new host.
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, QueryCommand::Start { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn ptr_loss_alone_keeps_the_instance() {
        let mut tracker = DnssdTracker::new();
        let mut commands = Vec::new();
        apply_batch(
            &mut tracker,
            &[
                update(ptr(), RecordEvent::Created),
                update(srv(), RecordEvent::Created),
                update(txt(), RecordEvent::Created),
                update(a(), RecordEvent::Created),
            ],
            &mut commands,
        );

        commands.clear();
        let results = apply_batch(
            &mut tracker,
            &[update(ptr(), RecordEvent::Expired)],
            &mut commands,
        );
        // Not ready any more, but the instance survives while SRV is present
        // and no queries are stopped.
        assert!(results[0].1.is_none());
        assert!(tracker
            .instance(&InstanceKey::new(
                DomainName::parse("Friendly._openscreen._udp.local").unwrap()
            ))
            .is_some());
        assert!(commands.is_empty());
    }

    #[test]
    fn losing_ptr_and_srv_retires_instance_and_host() {
        let mut tracker = DnssdTracker::new();
        let mut commands = Vec::new();
        apply_batch(
            &mut tracker,
            &[
                update(ptr(), RecordEvent::Created),
                update(srv(), RecordEvent::Created),
                update(txt(), RecordEvent::Created),
                update(a(), RecordEvent::Created),
            ],
            &mut commands,
        );

        commands.clear();
        let results = apply_batch(
            &mut tracker,
            &[
                update(ptr(), RecordEvent::Expired),
                update(srv(), RecordEvent::Expired),
            ],
            &mut commands,
        );
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_none());
        assert!(tracker
            .instance(&InstanceKey::new(
                DomainName::parse("Friendly._openscreen._udp.local").unwrap()
            ))
            .is_none());
        assert!(tracker
            .host(SOCKET, &DomainName::parse("host.local").unwrap())
            .is_none());

        // A + AAAA for the host and SRV + TXT for the instance all stop.
        let stops: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                QueryCommand::Stop { key, .. } => Some(key.dns_type),
                QueryCommand::Start { .. } => None,
            })
            .collect();
        assert!(stops.contains(&DnsType::A));
        assert!(stops.contains(&DnsType::Aaaa));
        assert!(stops.contains(&DnsType::Srv));
        assert!(stops.contains(&DnsType::Txt));
    }

    #[test]
    fn address_loss_marks_dependents_but_keeps_host() {
        let mut tracker = DnssdTracker::new();
        let mut commands = Vec::new();
        apply_batch(
            &mut tracker,
            &[
                update(ptr(), RecordEvent::Created),
                update(srv(), RecordEvent::Created),
                update(txt(), RecordEvent::Created),
                update(a(), RecordEvent::Created),
            ],
            &mut commands,
        );

        let results = apply_batch(
            &mut tracker,
            &[update(a(), RecordEvent::Expired)],
            &mut commands,
        );
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_none());
        // The host survives while its dependent set is non-empty.
        let host = tracker
            .host(SOCKET, &DomainName::parse("host.local").unwrap())
            .unwrap();
        assert!(!host.has_address());
        assert_eq!(host.dependents.len(), 1);
    }

    #[test]
    fn host_invariant_dependents_never_empty() {
        let mut tracker = DnssdTracker::new();
        let mut commands = Vec::new();
        apply_batch(
            &mut tracker,
            &[
                update(ptr(), RecordEvent::Created),
                update(srv(), RecordEvent::Created),
                update(srv(), RecordEvent::Expired),
            ],
            &mut commands,
        );
        for (_, host) in tracker.hosts() {
            assert!(!host.dependents.is_empty());
        }
        assert_eq!(tracker.hosts().count(), 0);
    }

    #[test]
    fn service_key_splits_instance_name() {
        let key = InstanceKey::new(DomainName::parse("TV._openscreen._udp.local").unwrap());
        assert_eq!(key.instance(), "TV");
        assert_eq!(
            key.service_key().name(),
            &DomainName::parse("_openscreen._udp.local").unwrap()
        );
    }
}
