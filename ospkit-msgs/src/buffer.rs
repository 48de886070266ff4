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

//! Growable encode buffer.
//!
//! Encoding preflights against the buffer's current capacity. When the
//! encoder needs more room, the buffer grows by exactly the reported
//! shortfall and the encode is retried, so one message never over-allocates.

/// Byte buffer with an explicit capacity the encoder is metered against.
#[derive(Debug)]
pub struct MessageBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl MessageBuffer {
    /// Default preflight capacity for one encoded message.
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Grow by exactly `shortfall` additional bytes.
    pub fn grow(&mut self, shortfall: usize) {
        self.capacity += shortfall;
        self.data.reserve(self.capacity - self.data.len());
    }

    pub(crate) fn writer(&mut self) -> MeteredWriter<'_> {
        self.data.clear();
        MeteredWriter {
            buf: &mut self.data,
            capacity: self.capacity,
            overflow: 0,
        }
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer that accepts all bytes up to the metered capacity and counts the
/// overflow instead of failing, so a single pass learns the exact shortfall.
pub(crate) struct MeteredWriter<'a> {
    buf: &'a mut Vec<u8>,
    capacity: usize,
    overflow: usize,
}

impl MeteredWriter<'_> {
    /// Bytes the encode needed beyond the buffer's capacity.
    pub(crate) fn overflow(&self) -> usize {
        self.overflow
    }
}

impl minicbor::encode::Write for MeteredWriter<'_> {
    type Error = core::convert::Infallible;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        let room = self.capacity.saturating_sub(self.buf.len());
        let take = room.min(bytes.len());
        self.buf.extend_from_slice(&bytes[..take]);
        self.overflow += bytes.len() - take;
        Ok(())
    }
}
