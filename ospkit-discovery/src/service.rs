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

//! Service discovery facade: listener and publisher over one shared engine.
//!
//! The listener surfaces added/changed/removed peers from the DNS-SD layer;
//! the publisher advertises the local agent. Both drive the same mDNS engine,
//! which is torn down only when neither side needs it.

use std::collections::HashMap;
use std::net::{SocketAddrV4, SocketAddrV6};
use std::time::{Duration, Instant};

use ospkit_common::types::{TXT_KEY_AUTH_TOKEN, TXT_KEY_FINGERPRINT, TXT_KEY_METADATA_VERSION};
use ospkit_common::{Error, Fingerprint};
use ospkit_mdns::{
    DnsClass, DomainName, InstanceKey, JitterSource, MdnsConfig, MdnsRecord, MdnsSender, Rdata,
    ResolvedInstance, SocketId,
};
use tracing::{debug, info};

use crate::engine::{DiscoveryEngine, MdnsPlatform};
use crate::service_info::{parse_txt_entries, PeerRecord, PublisherConfig};

/// Default TTL for our advertised PTR record.
const PTR_TTL: Duration = Duration::from_secs(4500);

/// Default TTL for our advertised SRV/TXT/A/AAAA records.
const RECORD_TTL: Duration = Duration::from_secs(120);

/// Listener / publisher lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Stopped,
    Starting,
    Running,
    Suspended,
}

/// Upward events from the listener side.
pub trait ListenerObserver {
    fn on_started(&mut self) {}
    fn on_stopped(&mut self) {}
    fn on_suspended(&mut self) {}
    fn on_searching(&mut self) {}
    fn on_peer_added(&mut self, _peer: &PeerRecord) {}
    fn on_peer_changed(&mut self, _peer: &PeerRecord) {}
    fn on_peer_removed(&mut self, _peer: &PeerRecord) {}
    fn on_all_peers_removed(&mut self) {}
    fn on_error(&mut self, _error: &Error) {}
}

/// Upward events from the publisher side.
pub trait PublisherObserver {
    fn on_started(&mut self) {}
    fn on_stopped(&mut self) {}
    fn on_suspended(&mut self) {}
    fn on_error(&mut self, _error: &Error) {}
}

/// The discovery service: listener and publisher roles over one engine.
pub struct DiscoveryService {
    engine: DiscoveryEngine,
    service_type: DomainName,
    listener_state: DiscoveryState,
    publisher_state: DiscoveryState,
    listener_observer: Box<dyn ListenerObserver>,
    publisher_observer: Box<dyn PublisherObserver>,
    listener_whitelist: Vec<u32>,
    publisher_config: Option<PublisherConfig>,
    peers: HashMap<String, PeerRecord>,
}

impl DiscoveryService {
    pub fn new(
        config: MdnsConfig,
        sender: Box<dyn MdnsSender>,
        jitter: Box<dyn JitterSource>,
        platform: Box<dyn MdnsPlatform>,
        listener_observer: Box<dyn ListenerObserver>,
        publisher_observer: Box<dyn PublisherObserver>,
    ) -> Self {
        let service_type = DomainName::parse("_openscreen._udp.local")
            .expect("well-known service type is valid");
        Self {
            engine: DiscoveryEngine::new(config, sender, jitter, platform),
            service_type,
            listener_state: DiscoveryState::Stopped,
            publisher_state: DiscoveryState::Stopped,
            listener_observer,
            publisher_observer,
            listener_whitelist: Vec::new(),
            publisher_config: None,
            peers: HashMap::new(),
        }
    }

    pub fn listener_state(&self) -> DiscoveryState {
        self.listener_state
    }

    pub fn publisher_state(&self) -> DiscoveryState {
        self.publisher_state
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    // --- listener ------------------------------------------------------------

    /// Register interfaces (optionally whitelisted by index) and begin PTR
    /// queries for the service type.
    pub fn start_listener(&mut self, whitelist: Vec<u32>, now: Instant) -> bool {
        if self.listener_state != DiscoveryState::Stopped {
            return false;
        }
        self.listener_state = DiscoveryState::Starting;
        self.listener_whitelist = whitelist;
        self.engine.ensure_interfaces(&self.listener_whitelist);
        self.engine.start_ptr_queries(&self.service_type, now);
        self.listener_state = DiscoveryState::Running;
        info!("service listener running");
        self.listener_observer.on_started();
        true
    }

    /// Stop listening: clear all caches and report `AllRemoved` if any peers
    /// were present. The engine survives while the publisher runs.
    pub fn stop_listener(&mut self) -> bool {
        if self.listener_state == DiscoveryState::Stopped {
            return false;
        }
        self.engine.mdns.stop_all_queries();
        self.engine.dnssd.clear();
        let had_peers = !self.peers.is_empty();
        self.peers.clear();
        if had_peers {
            self.listener_observer.on_all_peers_removed();
        }
        self.listener_state = DiscoveryState::Stopped;
        self.teardown_engine_if_idle();
        self.listener_observer.on_stopped();
        true
    }

    pub fn suspend_listener(&mut self) -> bool {
        if self.listener_state != DiscoveryState::Running {
            return false;
        }
        self.engine.mdns.stop_all_queries();
        self.engine.dnssd.clear();
        let had_peers = !self.peers.is_empty();
        self.peers.clear();
        if had_peers {
            self.listener_observer.on_all_peers_removed();
        }
        self.listener_state = DiscoveryState::Suspended;
        self.listener_observer.on_suspended();
        true
    }

    pub fn resume_listener(&mut self, now: Instant) -> bool {
        if self.listener_state != DiscoveryState::Suspended {
            return false;
        }
        self.engine.start_ptr_queries(&self.service_type, now);
        self.listener_state = DiscoveryState::Running;
        self.listener_observer.on_started();
        true
    }

    /// Reset query backoff and search immediately.
    pub fn search_now(&mut self, now: Instant) {
        if self.listener_state != DiscoveryState::Running {
            return;
        }
        self.listener_observer.on_searching();
        self.engine.mdns.search_now(now);
    }

    // --- publisher -----------------------------------------------------------

    /// Advertise the local service.
    pub fn start_publisher(&mut self, config: PublisherConfig) -> bool {
        if self.publisher_state != DiscoveryState::Stopped {
            return false;
        }
        if config.hostname.is_empty() || config.instance_name.is_empty() || config.port == 0 {
            self.publisher_observer
                .on_error(&Error::ParameterInvalid("incomplete publisher config".into()));
            return false;
        }
        self.publisher_state = DiscoveryState::Starting;
        self.engine.ensure_interfaces(&config.interface_whitelist);

        let records = match build_publication_records(&self.service_type, &config) {
            Ok(records) => records,
            Err(err) => {
                self.publisher_state = DiscoveryState::Stopped;
                self.publisher_observer.on_error(&err);
                return false;
            }
        };
        let per_socket = self
            .engine
            .bound
            .iter()
            .filter(|interface| {
                config.interface_whitelist.is_empty()
                    || config.interface_whitelist.contains(&interface.index)
            })
            .map(|interface| (interface.socket, records.clone()))
            .collect();
        self.engine.publish(per_socket);
        self.publisher_config = Some(config);
        self.publisher_state = DiscoveryState::Running;
        info!("service publisher running");
        self.publisher_observer.on_started();
        true
    }

    /// Retract the advertisement with goodbye records.
    pub fn stop_publisher(&mut self) -> bool {
        if self.publisher_state == DiscoveryState::Stopped {
            return false;
        }
        self.engine.unpublish();
        self.publisher_config = None;
        self.publisher_state = DiscoveryState::Stopped;
        self.teardown_engine_if_idle();
        self.publisher_observer.on_stopped();
        true
    }

    pub fn suspend_publisher(&mut self) -> bool {
        if self.publisher_state != DiscoveryState::Running {
            return false;
        }
        self.engine.unpublish();
        self.publisher_state = DiscoveryState::Suspended;
        self.publisher_observer.on_suspended();
        true
    }

    pub fn resume_publisher(&mut self) -> bool {
        if self.publisher_state != DiscoveryState::Suspended {
            return false;
        }
        let Some(config) = self.publisher_config.clone() else {
            return false;
        };
        self.publisher_state = DiscoveryState::Stopped;
        self.start_publisher(config)
    }

    // --- event-loop inputs ----------------------------------------------------

    /// Feed one inbound mDNS packet.
    pub fn handle_packet(&mut self, socket: SocketId, bytes: &[u8], now: Instant) {
        let results = self.engine.handle_packet(socket, bytes, now);
        self.dispatch(results);
    }

    /// Drive scheduled queries and record expirations.
    pub fn handle_timeout(&mut self, now: Instant) {
        let results = self.engine.handle_timeout(now);
        self.dispatch(results);
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.engine.poll_timeout()
    }

    // --- internals -------------------------------------------------------------

    fn teardown_engine_if_idle(&mut self) {
        if self.listener_state == DiscoveryState::Stopped
            && self.publisher_state == DiscoveryState::Stopped
        {
            self.engine.teardown();
        }
    }

    /// Collapse batch results into one peer notification per instance.
    fn dispatch(&mut self, results: Vec<(InstanceKey, Option<ResolvedInstance>)>) {
        for (key, resolved) in results {
            let screen_id = key.name().to_string();
            match resolved {
                Some(instance) => {
                    let record = self.to_peer_record(&key, &instance);
                    match self.peers.get_mut(&screen_id) {
                        None => {
                            debug!(screen_id, "peer added");
                            self.listener_observer.on_peer_added(&record);
                            self.peers.insert(screen_id, record);
                        }
                        Some(existing) if *existing != record => {
                            debug!(screen_id, "peer changed");
                            *existing = record.clone();
                            self.listener_observer.on_peer_changed(&record);
                        }
                        Some(_) => {}
                    }
                }
                None => {
                    if let Some(record) = self.peers.remove(&screen_id) {
                        debug!(screen_id, "peer removed");
                        self.listener_observer.on_peer_removed(&record);
                    }
                }
            }
        }
    }

    fn to_peer_record(&self, key: &InstanceKey, instance: &ResolvedInstance) -> PeerRecord {
        let txt = parse_txt_entries(&instance.txt);
        PeerRecord {
            screen_id: key.name().to_string(),
            friendly_name: instance.friendly_name.clone(),
            interface_index: self.engine.interface_index(instance.socket),
            v4: instance
                .v4
                .map(|addr| SocketAddrV4::new(addr, instance.port)),
            v6: instance
                .v6
                .map(|addr| SocketAddrV6::new(addr, instance.port, 0, 0)),
            fingerprint: txt
                .get(TXT_KEY_FINGERPRINT)
                .and_then(|fp| Fingerprint::from_base64(fp).ok()),
            auth_token: txt.get(TXT_KEY_AUTH_TOKEN).cloned(),
            metadata_version: txt
                .get(TXT_KEY_METADATA_VERSION)
                .and_then(|mv| mv.parse().ok()),
        }
    }
}

/// Records advertising the local service: PTR + SRV + TXT plus A/AAAA when
/// the host addresses are known.
fn build_publication_records(
    service_type: &DomainName,
    config: &PublisherConfig,
) -> ospkit_common::Result<Vec<MdnsRecord>> {
    let mut instance_name = DomainName::from_labels([config.instance_name.clone()])?;
    instance_name.append(service_type)?;
    let mut host_name = DomainName::from_labels([config.hostname.clone()])?;
    host_name.append(&DomainName::parse("local")?)?;

    let mut records = vec![
        MdnsRecord::new(
            service_type.clone(),
            PTR_TTL,
            Rdata::Ptr(instance_name.clone()),
        ),
        MdnsRecord {
            name: instance_name.clone(),
            dns_class: DnsClass::In,
            cache_flush: true,
            ttl: RECORD_TTL,
            rdata: Rdata::Srv {
                priority: 0,
                weight: 0,
                port: config.port,
                target: host_name.clone(),
            },
        },
        MdnsRecord {
            name: instance_name,
            dns_class: DnsClass::In,
            cache_flush: true,
            ttl: RECORD_TTL,
            rdata: Rdata::Txt(config.txt.clone()),
        },
    ];
    if let Some(v4) = config.v4 {
        records.push(MdnsRecord {
            name: host_name.clone(),
            dns_class: DnsClass::In,
            cache_flush: true,
            ttl: RECORD_TTL,
            rdata: Rdata::A(v4),
        });
    }
    if let Some(v6) = config.v6 {
        records.push(MdnsRecord {
            name: host_name,
            dns_class: DnsClass::In,
            cache_flush: true,
            ttl: RECORD_TTL,
            rdata: Rdata::Aaaa(v6),
        });
    }
    Ok(records)
}
