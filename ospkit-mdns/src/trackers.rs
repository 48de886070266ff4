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

//! Record and question trackers.
//!
//! A [`RecordTracker`] owns one cached record and schedules refresh queries at
//! 80/85/90/95% of its TTL (RFC 6762 §5.2). A [`QuestionTracker`] owns one
//! continuous query with exponential backoff and the record trackers for its
//! answers. Both are pure state machines: inputs carry `now`, outgoing
//! queries and record events are returned to the caller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ospkit_common::{Error, Result};
use tracing::trace;

use crate::records::{MdnsQuestion, MdnsRecord, RecordKey};

/// TTL fractions, in percent, at which refresh queries are sent.
const REFRESH_PERCENTS: [u32; 4] = [80, 85, 90, 95];

/// Scheduling knobs for trackers.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// First interval of the continuous-query backoff.
    pub initial_query_interval: Duration,
    /// Backoff cap.
    pub max_query_interval: Duration,
    /// How long a goodbye record lingers before it expires.
    pub goodbye_grace: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            initial_query_interval: Duration::from_secs(1),
            max_query_interval: Duration::from_secs(60 * 60),
            goodbye_grace: Duration::from_secs(1),
        }
    }
}

/// Source of the per-send random delay in [0, 120] ms (RFC 6762 §5.2).
pub trait JitterSource {
    fn query_delay(&mut self) -> Duration;
}

/// Jitter backed by a seeded small RNG. Injected rather than global so tests
/// and embedders control determinism.
pub struct RandomJitter {
    rng: rand::rngs::SmallRng,
}

impl RandomJitter {
    pub fn from_seed(seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            rng: rand::rngs::SmallRng::seed_from_u64(seed),
        }
    }
}

impl JitterSource for RandomJitter {
    fn query_delay(&mut self) -> Duration {
        use rand::Rng;
        Duration::from_millis(self.rng.gen_range(0..=120))
    }
}

impl<T: JitterSource + ?Sized> JitterSource for Box<T> {
    fn query_delay(&mut self) -> Duration {
        (**self).query_delay()
    }
}

/// What happened to a cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEvent {
    Created,
    Updated,
    Expired,
}

/// Outcome of feeding a fresh copy of a record into its tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateOutcome {
    /// TTL refreshed, rdata unchanged.
    Refreshed,
    /// Rdata changed.
    Updated,
    /// Goodbye received; expiry scheduled after the grace window.
    GoodbyeScheduled,
}

/// Tracks one cached record: schedules its refresh queries and expiry.
#[derive(Debug)]
pub struct RecordTracker {
    record: Option<MdnsRecord>,
    start_time: Instant,
    send_count: usize,
    expire_at: Instant,
    next_query: Option<Instant>,
}

impl RecordTracker {
    pub fn new() -> Self {
        let never = Instant::now();
        Self {
            record: None,
            start_time: never,
            send_count: 0,
            expire_at: never,
            next_query: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.record.is_some()
    }

    pub fn record(&self) -> Option<&MdnsRecord> {
        self.record.as_ref()
    }

    /// Begin tracking `record`. Starting twice is `OperationInvalid`.
    pub fn start(
        &mut self,
        record: MdnsRecord,
        now: Instant,
        config: &TrackerConfig,
        jitter: &mut dyn JitterSource,
    ) -> Result<()> {
        if self.is_started() {
            return Err(Error::OperationInvalid(
                "record tracker already started".into(),
            ));
        }
        self.start_time = now;
        self.send_count = 0;
        if record.is_goodbye() {
            self.expire_at = now + config.goodbye_grace;
            self.next_query = None;
        } else {
            self.expire_at = now + record.ttl;
            self.next_query = Self::refresh_time(now, record.ttl, 0, jitter);
        }
        self.record = Some(record);
        Ok(())
    }

    /// Stop tracking. Stopping an unstarted tracker is `OperationInvalid`.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_started() {
            return Err(Error::OperationInvalid("record tracker not started".into()));
        }
        self.record = None;
        self.next_query = None;
        Ok(())
    }

    /// Feed a newly received copy of the record.
    fn update(
        &mut self,
        new_record: MdnsRecord,
        now: Instant,
        config: &TrackerConfig,
        jitter: &mut dyn JitterSource,
    ) -> Result<UpdateOutcome> {
        let current = self
            .record
            .as_mut()
            .ok_or_else(|| Error::OperationInvalid("record tracker not started".into()))?;

        if new_record.is_goodbye() {
            self.expire_at = now + config.goodbye_grace;
            self.next_query = None;
            return Ok(UpdateOutcome::GoodbyeScheduled);
        }

        let changed = current.rdata != new_record.rdata;
        let ttl = new_record.ttl;
        *current = new_record;
        self.start_time = now;
        self.send_count = 0;
        self.expire_at = now + ttl;
        self.next_query = Self::refresh_time(now, ttl, 0, jitter);
        Ok(if changed {
            UpdateOutcome::Updated
        } else {
            UpdateOutcome::Refreshed
        })
    }

    fn refresh_time(
        start: Instant,
        ttl: Duration,
        send_count: usize,
        jitter: &mut dyn JitterSource,
    ) -> Option<Instant> {
        REFRESH_PERCENTS
            .get(send_count)
            .map(|pct| start + (ttl * *pct) / 100 + jitter.query_delay())
    }

    fn next_wakeup(&self) -> Option<Instant> {
        self.record.as_ref()?;
        Some(match self.next_query {
            Some(query) => query.min(self.expire_at),
            None => self.expire_at,
        })
    }

    /// Process deadlines. Refresh queries go to `queries`; returns true when
    /// the record expired and the tracker should be dropped.
    fn handle_timeout(
        &mut self,
        now: Instant,
        jitter: &mut dyn JitterSource,
        queries: &mut Vec<MdnsQuestion>,
    ) -> bool {
        let Some(record) = self.record.as_ref() else {
            return false;
        };

        if now >= self.expire_at {
            trace!(record = %record.name, "record expired");
            return true;
        }

        if let Some(next_query) = self.next_query {
            if now >= next_query {
                queries.push(MdnsQuestion {
                    name: record.name.clone(),
                    dns_type: record.dns_type(),
                    dns_class: record.dns_class,
                });
                self.send_count += 1;
                self.next_query =
                    Self::refresh_time(self.start_time, record.ttl, self.send_count, jitter);
            }
        }
        false
    }
}

impl Default for RecordTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks one continuous query and the records answering it.
#[derive(Debug)]
pub struct QuestionTracker {
    question: Option<MdnsQuestion>,
    send_delay: Duration,
    next_send: Option<Instant>,
    records: HashMap<RecordKey, RecordTracker>,
    config: TrackerConfig,
}

impl QuestionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let send_delay = config.initial_query_interval;
        Self {
            question: None,
            send_delay,
            next_send: None,
            records: HashMap::new(),
            config,
        }
    }

    pub fn is_started(&self) -> bool {
        self.question.is_some()
    }

    pub fn question(&self) -> Option<&MdnsQuestion> {
        self.question.as_ref()
    }

    /// Known answers for this question; used to seed late subscribers.
    pub fn known_records(&self) -> impl Iterator<Item = &MdnsRecord> {
        self.records.values().filter_map(RecordTracker::record)
    }

    /// Begin continuous querying. Starting twice is `OperationInvalid`.
    pub fn start(
        &mut self,
        question: MdnsQuestion,
        now: Instant,
        jitter: &mut dyn JitterSource,
    ) -> Result<()> {
        if self.is_started() {
            return Err(Error::OperationInvalid(
                "question tracker already started".into(),
            ));
        }
        self.send_delay = self.config.initial_query_interval;
        self.next_send = Some(now + jitter.query_delay());
        self.question = Some(question);
        Ok(())
    }

    /// Stop querying and drop all cached answers.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_started() {
            return Err(Error::OperationInvalid(
                "question tracker not started".into(),
            ));
        }
        self.question = None;
        self.next_send = None;
        self.send_delay = self.config.initial_query_interval;
        self.records.clear();
        Ok(())
    }

    /// Reset the backoff and query again immediately.
    pub fn search_now(&mut self, now: Instant) {
        if self.is_started() {
            self.send_delay = self.config.initial_query_interval;
            self.next_send = Some(now);
        }
    }

    /// Feed an inbound record. Creates or updates the matching record tracker
    /// and reports a cache event when the answer set changed.
    pub fn on_record_received(
        &mut self,
        record: &MdnsRecord,
        now: Instant,
        jitter: &mut dyn JitterSource,
    ) -> Option<(MdnsRecord, RecordEvent)> {
        let question = self.question.as_ref()?;
        if !question.matches(record) {
            return None;
        }

        let key = record.key();
        if let Some(tracker) = self.records.get_mut(&key) {
            match tracker.update(record.clone(), now, &self.config, jitter) {
                Ok(UpdateOutcome::Updated) => Some((record.clone(), RecordEvent::Updated)),
                // Expiry fires later from handle_timeout, after the grace
                // window.
                Ok(UpdateOutcome::GoodbyeScheduled) | Ok(UpdateOutcome::Refreshed) => None,
                Err(_) => None,
            }
        } else {
            if record.is_goodbye() {
                return None;
            }
            let mut tracker = RecordTracker::new();
            // A fresh tracker cannot already be started.
            tracker
                .start(record.clone(), now, &self.config, jitter)
                .ok()?;
            self.records.insert(key, tracker);
            Some((record.clone(), RecordEvent::Created))
        }
    }

    /// Process deadlines: continuous-query sends, per-record refreshes and
    /// expirations.
    pub fn handle_timeout(
        &mut self,
        now: Instant,
        jitter: &mut dyn JitterSource,
        queries: &mut Vec<MdnsQuestion>,
        events: &mut Vec<(MdnsRecord, RecordEvent)>,
    ) {
        if let (Some(question), Some(next_send)) = (self.question.as_ref(), self.next_send) {
            if now >= next_send {
                queries.push(question.clone());
                self.next_send = Some(now + self.send_delay + jitter.query_delay());
                self.send_delay = (self.send_delay * 2).min(self.config.max_query_interval);
            }
        }

        let mut expired = Vec::new();
        for (key, tracker) in self.records.iter_mut() {
            if tracker.handle_timeout(now, jitter, queries) {
                expired.push(key.clone());
            }
        }
        for key in expired {
            if let Some(tracker) = self.records.remove(&key) {
                if let Some(record) = tracker.record {
                    events.push((record, RecordEvent::Expired));
                }
            }
        }
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        let mut wakeup = self.next_send;
        for tracker in self.records.values() {
            let Some(candidate) = tracker.next_wakeup() else {
                continue;
            };
            wakeup = Some(match wakeup {
                Some(current) => current.min(candidate),
                None => candidate,
            });
        }
        wakeup
    }
}
