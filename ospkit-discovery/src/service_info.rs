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

//! Peer records and the TXT record schema.

use std::collections::BTreeMap;
use std::net::{SocketAddrV4, SocketAddrV6};

use ospkit_common::types::{TXT_KEY_AUTH_TOKEN, TXT_KEY_FINGERPRINT, TXT_KEY_METADATA_VERSION};
use ospkit_common::Fingerprint;

/// A discovered peer, as surfaced to the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Stable identity derived from the service instance name.
    pub screen_id: String,
    /// User-visible name (the instance label).
    pub friendly_name: String,
    /// OS interface index the peer was discovered on.
    pub interface_index: u32,
    pub v4: Option<SocketAddrV4>,
    pub v6: Option<SocketAddrV6>,
    /// Agent certificate fingerprint from the `fp=` TXT entry.
    pub fingerprint: Option<Fingerprint>,
    /// Authentication initiation token from the `at=` TXT entry.
    pub auth_token: Option<String>,
    /// Metadata version from the `mv=` TXT entry.
    pub metadata_version: Option<u32>,
}

/// The well-known TXT keys of an advertised agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecords {
    pub fp: String,
    pub mv: u32,
    pub at: String,
}

impl TxtRecords {
    /// Format as `key=value` TXT entries.
    pub fn to_entries(&self) -> Vec<String> {
        vec![
            format!("{TXT_KEY_FINGERPRINT}={}", self.fp),
            format!("{TXT_KEY_METADATA_VERSION}={}", self.mv),
            format!("{TXT_KEY_AUTH_TOKEN}={}", self.at),
        ]
    }
}

/// Parse TXT entries (`key=value` or bare flags) into a lookup map.
pub fn parse_txt_entries(entries: &[String]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (entry.clone(), String::new()),
        })
        .collect()
}

/// Configuration for advertising the local service.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Host label; advertised as `<hostname>.local`.
    pub hostname: String,
    /// Service instance label.
    pub instance_name: String,
    pub port: u16,
    /// OS interface indices to advertise on; empty means all.
    pub interface_whitelist: Vec<u32>,
    /// TXT entries (`fp`, `at`, `mv`, plus anything extra).
    pub txt: Vec<String>,
    /// Addresses to answer A/AAAA queries with, when known.
    pub v4: Option<std::net::Ipv4Addr>,
    pub v6: Option<std::net::Ipv6Addr>,
}
