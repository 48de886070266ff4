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

//! mDNS discovery engine: wire codec, record cache with RFC 6762 refresh and
//! backoff scheduling, and the DNS-SD layer that materializes service
//! instances from PTR/SRV/TXT/A/AAAA records.
//!
//! All components are sans-IO: the embedder owns sockets and the event loop,
//! feeds packets and deadlines in, and receives queries and record/instance
//! events out.

pub mod dnssd;
pub mod name;
pub mod records;
pub mod service;
pub mod trackers;
pub mod wire;

pub use dnssd::{
    apply_batch, Batch, CacheUpdate, DnssdTracker, HostInfo, InstanceKey, QueryCommand,
    ResolvedInstance, ServiceInstance, ServiceKey,
};
pub use name::DomainName;
pub use records::{
    DnsClass, DnsType, MdnsQuestion, MdnsRecord, QuestionKey, Rdata, RecordKey, SocketId,
};
pub use service::{CapturingSender, FnSender, MdnsConfig, MdnsSender, MdnsService};
pub use trackers::{
    JitterSource, QuestionTracker, RandomJitter, RecordEvent, RecordTracker, TrackerConfig,
};
pub use wire::{parse_message, serialize_message, MdnsMessage};
