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

//! mDNS record and question model.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use crate::name::DomainName;

/// DNS record types handled by this stack. Anything else on the wire is
/// skipped during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DnsType {
    A = 1,
    Ptr = 12,
    Txt = 16,
    Aaaa = 28,
    Srv = 33,
    Any = 255,
}

impl DnsType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::A),
            12 => Some(Self::Ptr),
            16 => Some(Self::Txt),
            28 => Some(Self::Aaaa),
            33 => Some(Self::Srv),
            255 => Some(Self::Any),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DnsClass {
    In = 1,
    Any = 255,
}

impl DnsClass {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::In),
            255 => Some(Self::Any),
            _ => None,
        }
    }
}

/// Type-specific payload of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rdata {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(DomainName),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },
    Txt(Vec<String>),
}

impl Rdata {
    pub fn dns_type(&self) -> DnsType {
        match self {
            Rdata::A(_) => DnsType::A,
            Rdata::Aaaa(_) => DnsType::Aaaa,
            Rdata::Ptr(_) => DnsType::Ptr,
            Rdata::Srv { .. } => DnsType::Srv,
            Rdata::Txt(_) => DnsType::Txt,
        }
    }
}

/// One resource record as received from or sent to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsRecord {
    pub name: DomainName,
    pub dns_class: DnsClass,
    /// Cache-flush bit from the record's class field.
    pub cache_flush: bool,
    pub ttl: Duration,
    pub rdata: Rdata,
}

impl MdnsRecord {
    pub fn new(name: DomainName, ttl: Duration, rdata: Rdata) -> Self {
        Self {
            name,
            dns_class: DnsClass::In,
            cache_flush: false,
            ttl,
            rdata,
        }
    }

    pub fn dns_type(&self) -> DnsType {
        self.rdata.dns_type()
    }

    /// A goodbye record announces removal (RFC 6762 §10.1).
    pub fn is_goodbye(&self) -> bool {
        self.ttl.is_zero()
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            name: self.name.clone(),
            dns_type: self.dns_type(),
            dns_class: self.dns_class,
        }
    }
}

/// Cache identity of a record: name + type + class, compared with the name's
/// case-insensitive semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub name: DomainName,
    pub dns_type: DnsType,
    pub dns_class: DnsClass,
}

/// A continuous query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsQuestion {
    pub name: DomainName,
    pub dns_type: DnsType,
    pub dns_class: DnsClass,
}

impl MdnsQuestion {
    pub fn new(name: DomainName, dns_type: DnsType) -> Self {
        Self {
            name,
            dns_type,
            dns_class: DnsClass::In,
        }
    }

    /// Whether an inbound record answers this question.
    pub fn matches(&self, record: &MdnsRecord) -> bool {
        (self.dns_type == DnsType::Any || self.dns_type == record.dns_type())
            && self.name == record.name
    }

    pub fn key(&self) -> QuestionKey {
        QuestionKey {
            name: self.name.clone(),
            dns_type: self.dns_type,
        }
    }
}

/// Lookup identity of a continuous query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuestionKey {
    pub name: DomainName,
    pub dns_type: DnsType,
}

/// Opaque handle for the socket (interface) a packet arrived on. The platform
/// layer that owns real sockets assigns these; the cache only uses them to
/// scope records and hosts per interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u32);
