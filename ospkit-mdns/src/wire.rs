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

//! mDNS message wire format (RFC 1035 framing, RFC 6762 semantics).
//!
//! Parsing supports name compression pointers; serialization writes names
//! uncompressed. Records of types this stack does not track are skipped, not
//! rejected.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use ospkit_common::{Error, Result};

use crate::name::{DomainName, MAX_LABEL_LENGTH};
use crate::records::{DnsClass, DnsType, MdnsQuestion, MdnsRecord, Rdata};

/// Class field bit set on answers requesting cache flush, and on questions
/// requesting unicast responses.
const CLASS_TOP_BIT: u16 = 0x8000;

/// Header flag: message is a response.
const FLAG_RESPONSE: u16 = 0x8000;

/// Header flag: authoritative answer. mDNS responses always set it.
const FLAG_AUTHORITATIVE: u16 = 0x0400;

/// A parsed or to-be-serialized mDNS message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MdnsMessage {
    pub id: u16,
    pub is_response: bool,
    pub questions: Vec<MdnsQuestion>,
    pub answers: Vec<MdnsRecord>,
    pub additional: Vec<MdnsRecord>,
}

impl MdnsMessage {
    pub fn query(questions: Vec<MdnsQuestion>) -> Self {
        Self {
            questions,
            ..Self::default()
        }
    }

    pub fn response(answers: Vec<MdnsRecord>) -> Self {
        Self {
            is_response: true,
            answers,
            ..Self::default()
        }
    }

    /// All records of the message, answers before additionals.
    pub fn records(&self) -> impl Iterator<Item = &MdnsRecord> {
        self.answers.iter().chain(self.additional.iter())
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.off)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .buf
            .get(self.off)
            .ok_or_else(|| Error::ParseError("unexpected end of packet".into()))?;
        self.off += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.read_u8()?, self.read_u8()?]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes([
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
        ]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::ParseError("unexpected end of packet".into()));
        }
        let slice = &self.buf[self.off..self.off + len];
        self.off += len;
        Ok(slice)
    }

    /// Read a possibly compressed domain name starting at the cursor.
    fn read_name(&mut self) -> Result<DomainName> {
        let mut name = DomainName::default();
        let mut cursor = self.off;
        let mut jumped = false;
        let mut jumps = 0usize;

        loop {
            let len = *self
                .buf
                .get(cursor)
                .ok_or_else(|| Error::ParseError("truncated name".into()))? as usize;

            if len == 0 {
                if !jumped {
                    self.off = cursor + 1;
                }
                return Ok(name);
            }

            if len & 0xC0 == 0xC0 {
                // Compression pointer: two bytes, target offset in low 14 bits.
                let low = *self
                    .buf
                    .get(cursor + 1)
                    .ok_or_else(|| Error::ParseError("truncated name pointer".into()))?
                    as usize;
                let target = ((len & 0x3F) << 8) | low;
                if target >= cursor {
                    return Err(Error::ParseError("forward name pointer".into()));
                }
                jumps += 1;
                if jumps > 16 {
                    return Err(Error::ParseError("name pointer loop".into()));
                }
                if !jumped {
                    self.off = cursor + 2;
                    jumped = true;
                }
                cursor = target;
                continue;
            }

            if len > MAX_LABEL_LENGTH {
                return Err(Error::ParseError("label exceeds 63 octets".into()));
            }
            let end = cursor + 1 + len;
            let label = self
                .buf
                .get(cursor + 1..end)
                .ok_or_else(|| Error::ParseError("truncated label".into()))?;
            let label = std::str::from_utf8(label)
                .map_err(|_| Error::ParseError("label is not UTF-8".into()))?;
            name.push_label(label.to_owned())?;
            cursor = end;
        }
    }
}

/// Parse one mDNS packet. Returns `ParseError` for malformed packets; callers
/// are expected to discard those.
pub fn parse_message(bytes: &[u8]) -> Result<MdnsMessage> {
    let mut reader = Reader::new(bytes);

    let id = reader.read_u16()?;
    let flags = reader.read_u16()?;
    let question_count = reader.read_u16()?;
    let answer_count = reader.read_u16()?;
    let authority_count = reader.read_u16()?;
    let additional_count = reader.read_u16()?;

    let mut message = MdnsMessage {
        id,
        is_response: flags & FLAG_RESPONSE != 0,
        ..MdnsMessage::default()
    };

    for _ in 0..question_count {
        let name = reader.read_name()?;
        let raw_type = reader.read_u16()?;
        let raw_class = reader.read_u16()?;
        let Some(dns_type) = DnsType::from_u16(raw_type) else {
            continue;
        };
        let Some(dns_class) = DnsClass::from_u16(raw_class & !CLASS_TOP_BIT) else {
            continue;
        };
        message.questions.push(MdnsQuestion {
            name,
            dns_type,
            dns_class,
        });
    }

    for section in 0..3u8 {
        let count = match section {
            0 => answer_count,
            1 => authority_count,
            _ => additional_count,
        };
        for _ in 0..count {
            let record = parse_record(&mut reader)?;
            let Some(record) = record else { continue };
            match section {
                // Authority records are used for probe tiebreaking, which this
                // stack does not participate in; they are parsed and dropped.
                0 => message.answers.push(record),
                1 => {}
                _ => message.additional.push(record),
            }
        }
    }

    Ok(message)
}

/// Parse one resource record. Returns `Ok(None)` for record types this stack
/// does not track.
fn parse_record(reader: &mut Reader<'_>) -> Result<Option<MdnsRecord>> {
    let name = reader.read_name()?;
    let raw_type = reader.read_u16()?;
    let raw_class = reader.read_u16()?;
    let ttl = reader.read_u32()?;
    let rdata_len = reader.read_u16()? as usize;

    let dns_type = DnsType::from_u16(raw_type);
    let dns_class = DnsClass::from_u16(raw_class & !CLASS_TOP_BIT);
    let cache_flush = raw_class & CLASS_TOP_BIT != 0;

    let rdata_start = reader.off;
    let rdata_end = rdata_start + rdata_len;
    if reader.remaining() < rdata_len {
        return Err(Error::ParseError("truncated rdata".into()));
    }

    let parsed = match dns_type {
        Some(DnsType::A) => {
            let octets: [u8; 4] = reader
                .read_bytes(rdata_len)?
                .try_into()
                .map_err(|_| Error::ParseError("A rdata must be 4 octets".into()))?;
            Some(Rdata::A(Ipv4Addr::from(octets)))
        }
        Some(DnsType::Aaaa) => {
            let octets: [u8; 16] = reader
                .read_bytes(rdata_len)?
                .try_into()
                .map_err(|_| Error::ParseError("AAAA rdata must be 16 octets".into()))?;
            Some(Rdata::Aaaa(Ipv6Addr::from(octets)))
        }
        Some(DnsType::Ptr) => {
            let target = reader.read_name()?;
            Some(Rdata::Ptr(target))
        }
        Some(DnsType::Srv) => {
            let priority = reader.read_u16()?;
            let weight = reader.read_u16()?;
            let port = reader.read_u16()?;
            let target = reader.read_name()?;
            Some(Rdata::Srv {
                priority,
                weight,
                port,
                target,
            })
        }
        Some(DnsType::Txt) => {
            let mut entries = Vec::new();
            while reader.off < rdata_end {
                let len = reader.read_u8()? as usize;
                let entry = reader.read_bytes(len)?;
                if entry.is_empty() {
                    continue;
                }
                let entry = std::str::from_utf8(entry)
                    .map_err(|_| Error::ParseError("TXT entry is not UTF-8".into()))?;
                entries.push(entry.to_owned());
            }
            Some(Rdata::Txt(entries))
        }
        _ => {
            reader.read_bytes(rdata_len)?;
            None
        }
    };

    if reader.off != rdata_end {
        return Err(Error::ParseError("rdata length mismatch".into()));
    }

    let Some(rdata) = parsed else {
        return Ok(None);
    };
    let Some(dns_class) = dns_class else {
        return Ok(None);
    };

    Ok(Some(MdnsRecord {
        name,
        dns_class,
        cache_flush,
        ttl: Duration::from_secs(u64::from(ttl)),
        rdata,
    }))
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_name(out: &mut Vec<u8>, name: &DomainName) {
    for label in name.labels() {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
}

fn write_record(out: &mut Vec<u8>, record: &MdnsRecord) {
    write_name(out, &record.name);
    write_u16(out, record.dns_type() as u16);
    let mut class = record.dns_class as u16;
    if record.cache_flush {
        class |= CLASS_TOP_BIT;
    }
    write_u16(out, class);
    out.extend_from_slice(&(record.ttl.as_secs().min(u64::from(u32::MAX)) as u32).to_be_bytes());

    let mut rdata = Vec::new();
    match &record.rdata {
        Rdata::A(addr) => rdata.extend_from_slice(&addr.octets()),
        Rdata::Aaaa(addr) => rdata.extend_from_slice(&addr.octets()),
        Rdata::Ptr(target) => write_name(&mut rdata, target),
        Rdata::Srv {
            priority,
            weight,
            port,
            target,
        } => {
            write_u16(&mut rdata, *priority);
            write_u16(&mut rdata, *weight);
            write_u16(&mut rdata, *port);
            write_name(&mut rdata, target);
        }
        Rdata::Txt(entries) => {
            if entries.is_empty() {
                rdata.push(0);
            }
            for entry in entries {
                rdata.push(entry.len().min(255) as u8);
                rdata.extend_from_slice(&entry.as_bytes()[..entry.len().min(255)]);
            }
        }
    }
    write_u16(out, rdata.len() as u16);
    out.extend_from_slice(&rdata);
}

/// Serialize a message. Names are written uncompressed.
pub fn serialize_message(message: &MdnsMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_u16(&mut out, message.id);
    let mut flags = 0u16;
    if message.is_response {
        flags |= FLAG_RESPONSE | FLAG_AUTHORITATIVE;
    }
    write_u16(&mut out, flags);
    write_u16(&mut out, message.questions.len() as u16);
    write_u16(&mut out, message.answers.len() as u16);
    write_u16(&mut out, 0);
    write_u16(&mut out, message.additional.len() as u16);

    for question in &message.questions {
        write_name(&mut out, &question.name);
        write_u16(&mut out, question.dns_type as u16);
        write_u16(&mut out, question.dns_class as u16);
    }
    for record in message.answers.iter().chain(message.additional.iter()) {
        write_record(&mut out, record);
    }
    out
}
