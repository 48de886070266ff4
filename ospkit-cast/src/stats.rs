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

//! Sender-side streaming statistics.
//!
//! A [`StatisticsCollector`] gathers raw frame and packet events from the
//! sender pipeline; the [`StatisticsAnalyzer`] drains it on a fixed cadence
//! (500 ms) and publishes one [`SenderStats`] snapshot per tick. Events pair
//! by (media, frame id) for frame↔frame latencies and (media, packet id) for
//! packet↔packet latencies; unmatched halves are dropped from the window.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Index;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::trace;

/// Analysis cadence.
pub const ANALYSIS_INTERVAL: Duration = Duration::from_millis(500);

/// Histogram geometry: 20 ms buckets from 0, plus one below-zero bucket and
/// an overflow bucket at the top.
const HISTOGRAM_MIN_MS: i64 = 0;
const HISTOGRAM_MAX_MS: i64 = 500;
const HISTOGRAM_WIDTH_MS: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticsEventType {
    FrameEncoded,
    FrameAckSent,
    FramePlayedOut,
    PacketSentToNetwork,
    PacketReceived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatisticsEventMediaType {
    Unknown,
    Audio,
    Video,
}

/// One frame-level event from the sender pipeline.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub frame_id: u64,
    pub event_type: StatisticsEventType,
    pub media_type: StatisticsEventMediaType,
    pub rtp_timestamp: u32,
    pub size: usize,
    pub timestamp: Instant,
    /// Signed playout margin in milliseconds; positive means the frame was
    /// late.
    pub delay_delta_ms: Option<i64>,
}

/// One packet-level event from the sender pipeline.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub packet_id: u16,
    pub frame_id: u64,
    pub event_type: StatisticsEventType,
    pub media_type: StatisticsEventMediaType,
    pub rtp_timestamp: u32,
    pub size: usize,
    pub timestamp: Instant,
}

/// Buffer for raw events, filled by the sender pipeline and drained by the
/// analyzer each tick.
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    frame_events: Vec<FrameEvent>,
    packet_events: Vec<PacketEvent>,
}

impl StatisticsCollector {
    pub fn collect_frame_event(&mut self, event: FrameEvent) {
        self.frame_events.push(event);
    }

    pub fn collect_packet_event(&mut self, event: PacketEvent) {
        self.packet_events.push(event);
    }

    fn take_recent_frame_events(&mut self) -> Vec<FrameEvent> {
        std::mem::take(&mut self.frame_events)
    }

    fn take_recent_packet_events(&mut self) -> Vec<PacketEvent> {
        std::mem::take(&mut self.packet_events)
    }
}

pub type SharedCollector = Rc<RefCell<StatisticsCollector>>;

/// Indices into a [`StatisticsList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum StatisticType {
    EnqueueFps = 0,
    EncodeRateKbps,
    PacketTransmissionRateKbps,
    NumPacketsSent,
    NumPacketsReceived,
    NumLateFrames,
    AvgFrameLatencyMs,
    AvgQueueingLatencyMs,
    AvgNetworkLatencyMs,
    AvgPacketLatencyMs,
    FirstEventTimeMs,
    LastEventTimeMs,
    TimeSinceLastReceiverResponseMs,
}

impl StatisticType {
    pub const COUNT: usize = 13;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticsList(pub [f64; StatisticType::COUNT]);

impl Default for StatisticsList {
    fn default() -> Self {
        Self([0.0; StatisticType::COUNT])
    }
}

impl Index<StatisticType> for StatisticsList {
    type Output = f64;

    fn index(&self, stat: StatisticType) -> &f64 {
        &self.0[stat as usize]
    }
}

/// Indices into the per-media histogram list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum HistogramType {
    FrameLatenessMs = 0,
    QueueingLatencyMs,
    NetworkLatencyMs,
    PacketLatencyMs,
}

impl HistogramType {
    pub const COUNT: usize = 4;
}

/// Fixed-width histogram with dedicated underflow and overflow buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleHistogram {
    pub min: i64,
    pub max: i64,
    pub width: i64,
    pub buckets: Vec<i32>,
}

impl SimpleHistogram {
    pub fn new(min: i64, max: i64, width: i64) -> Self {
        let inner = ((max - min) / width) as usize;
        Self {
            min,
            max,
            width,
            buckets: vec![0; inner + 2],
        }
    }

    pub fn add(&mut self, sample_ms: i64) {
        let index = if sample_ms < self.min {
            0
        } else if sample_ms >= self.max {
            self.buckets.len() - 1
        } else {
            1 + ((sample_ms - self.min) / self.width) as usize
        };
        self.buckets[index] += 1;
    }

    pub fn total(&self) -> i64 {
        self.buckets.iter().map(|count| i64::from(*count)).sum()
    }
}

impl Default for SimpleHistogram {
    fn default() -> Self {
        Self::new(HISTOGRAM_MIN_MS, HISTOGRAM_MAX_MS, HISTOGRAM_WIDTH_MS)
    }
}

/// One published snapshot.
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub audio_statistics: StatisticsList,
    pub audio_histograms: Vec<SimpleHistogram>,
    pub video_statistics: StatisticsList,
    pub video_histograms: Vec<SimpleHistogram>,
}

/// Consumer of snapshots.
pub trait SenderStatsClient {
    fn on_statistics_updated(&mut self, stats: &SenderStats);
}

#[derive(Debug, Default)]
struct SumCount {
    sum_ms: f64,
    count: u64,
}

impl SumCount {
    fn add(&mut self, delta: Duration) {
        self.sum_ms += delta.as_secs_f64() * 1000.0;
        self.count += 1;
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms / self.count as f64
        }
    }
}

/// Accumulated state for one media kind.
struct MediaAggregate {
    // Pairing state; pruned to the analysis window each tick.
    frame_encode_times: HashMap<u64, Instant>,
    packet_sent_times: HashMap<u16, Instant>,
    // Window accumulators, reset on every emit.
    frames_enqueued: usize,
    enqueued_bytes: usize,
    packet_sent_bytes: usize,
    frame_latency: SumCount,
    queueing_latency: SumCount,
    network_latency: SumCount,
    packet_latency: SumCount,
    // Session-cumulative values.
    num_packets_sent: u64,
    num_packets_received: u64,
    num_late_frames: u64,
    first_event_time: Option<Instant>,
    last_event_time: Option<Instant>,
    last_response_time: Option<Instant>,
    histograms: Vec<SimpleHistogram>,
}

impl MediaAggregate {
    fn new() -> Self {
        Self {
            frame_encode_times: HashMap::new(),
            packet_sent_times: HashMap::new(),
            frames_enqueued: 0,
            enqueued_bytes: 0,
            packet_sent_bytes: 0,
            frame_latency: SumCount::default(),
            queueing_latency: SumCount::default(),
            network_latency: SumCount::default(),
            packet_latency: SumCount::default(),
            num_packets_sent: 0,
            num_packets_received: 0,
            num_late_frames: 0,
            first_event_time: None,
            last_event_time: None,
            last_response_time: None,
            histograms: vec![SimpleHistogram::default(); HistogramType::COUNT],
        }
    }

    fn note_event_time(&mut self, timestamp: Instant) {
        self.first_event_time = Some(match self.first_event_time {
            Some(first) => first.min(timestamp),
            None => timestamp,
        });
        self.last_event_time = Some(match self.last_event_time {
            Some(last) => last.max(timestamp),
            None => timestamp,
        });
    }

    fn note_receiver_response(&mut self, timestamp: Instant) {
        self.last_response_time = Some(match self.last_response_time {
            Some(last) => last.max(timestamp),
            None => timestamp,
        });
    }

    fn histogram(&mut self, kind: HistogramType) -> &mut SimpleHistogram {
        &mut self.histograms[kind as usize]
    }

    fn on_frame_event(&mut self, event: &FrameEvent) {
        self.note_event_time(event.timestamp);
        match event.event_type {
            StatisticsEventType::FrameEncoded => {
                self.frames_enqueued += 1;
                self.enqueued_bytes += event.size;
                self.frame_encode_times.insert(event.frame_id, event.timestamp);
            }
            StatisticsEventType::FrameAckSent => {
                self.note_receiver_response(event.timestamp);
                if let Some(encoded) = self.frame_encode_times.get(&event.frame_id) {
                    if let Some(delta) = event.timestamp.checked_duration_since(*encoded) {
                        self.frame_latency.add(delta);
                    }
                }
            }
            StatisticsEventType::FramePlayedOut => {
                self.note_receiver_response(event.timestamp);
                if let Some(delay_delta_ms) = event.delay_delta_ms {
                    if delay_delta_ms > 0 {
                        self.num_late_frames += 1;
                    }
                    self.histogram(HistogramType::FrameLatenessMs).add(delay_delta_ms);
                }
            }
            _ => {}
        }
    }

    fn on_packet_event(&mut self, event: &PacketEvent) {
        self.note_event_time(event.timestamp);
        match event.event_type {
            StatisticsEventType::PacketSentToNetwork => {
                self.num_packets_sent += 1;
                self.packet_sent_bytes += event.size;
                self.packet_sent_times.insert(event.packet_id, event.timestamp);
                if let Some(encoded) = self.frame_encode_times.get(&event.frame_id) {
                    if let Some(delta) = event.timestamp.checked_duration_since(*encoded) {
                        self.queueing_latency.add(delta);
                        self.histogram(HistogramType::QueueingLatencyMs)
                            .add(delta.as_millis() as i64);
                    }
                }
            }
            StatisticsEventType::PacketReceived => {
                self.num_packets_received += 1;
                self.note_receiver_response(event.timestamp);
                if let Some(sent) = self.packet_sent_times.get(&event.packet_id) {
                    if let Some(delta) = event.timestamp.checked_duration_since(*sent) {
                        self.network_latency.add(delta);
                        self.histogram(HistogramType::NetworkLatencyMs)
                            .add(delta.as_millis() as i64);
                    }
                }
                if let Some(encoded) = self.frame_encode_times.get(&event.frame_id) {
                    if let Some(delta) = event.timestamp.checked_duration_since(*encoded) {
                        self.packet_latency.add(delta);
                        self.histogram(HistogramType::PacketLatencyMs)
                            .add(delta.as_millis() as i64);
                    }
                }
            }
            _ => {}
        }
    }

    fn snapshot(&self, reference: Instant, now: Instant, window: Duration) -> StatisticsList {
        let window_ms = window.as_secs_f64() * 1000.0;
        let mut list = StatisticsList::default();
        let set = |list: &mut StatisticsList, stat: StatisticType, value: f64| {
            list.0[stat as usize] = value;
        };

        set(
            &mut list,
            StatisticType::EnqueueFps,
            self.frames_enqueued as f64 / (window_ms / 1000.0),
        );
        set(
            &mut list,
            StatisticType::EncodeRateKbps,
            self.enqueued_bytes as f64 * 8.0 / window_ms,
        );
        set(
            &mut list,
            StatisticType::PacketTransmissionRateKbps,
            self.packet_sent_bytes as f64 * 8.0 / window_ms,
        );
        set(
            &mut list,
            StatisticType::NumPacketsSent,
            self.num_packets_sent as f64,
        );
        set(
            &mut list,
            StatisticType::NumPacketsReceived,
            self.num_packets_received as f64,
        );
        set(
            &mut list,
            StatisticType::NumLateFrames,
            self.num_late_frames as f64,
        );
        set(
            &mut list,
            StatisticType::AvgFrameLatencyMs,
            self.frame_latency.average(),
        );
        set(
            &mut list,
            StatisticType::AvgQueueingLatencyMs,
            self.queueing_latency.average(),
        );
        set(
            &mut list,
            StatisticType::AvgNetworkLatencyMs,
            self.network_latency.average(),
        );
        set(
            &mut list,
            StatisticType::AvgPacketLatencyMs,
            self.packet_latency.average(),
        );
        if let Some(first) = self.first_event_time {
            set(
                &mut list,
                StatisticType::FirstEventTimeMs,
                (first - reference).as_secs_f64() * 1000.0,
            );
        }
        if let Some(last) = self.last_event_time {
            set(
                &mut list,
                StatisticType::LastEventTimeMs,
                (last - reference).as_secs_f64() * 1000.0,
            );
        }
        if let Some(response) = self.last_response_time {
            set(
                &mut list,
                StatisticType::TimeSinceLastReceiverResponseMs,
                now.saturating_duration_since(response).as_secs_f64() * 1000.0,
            );
        }
        list
    }

    /// Reset window accumulators and prune stale pairing halves.
    fn roll_window(&mut self, window_start: Instant) {
        self.frames_enqueued = 0;
        self.enqueued_bytes = 0;
        self.packet_sent_bytes = 0;
        self.frame_latency = SumCount::default();
        self.queueing_latency = SumCount::default();
        self.network_latency = SumCount::default();
        self.packet_latency = SumCount::default();
        self.frame_encode_times
            .retain(|_, timestamp| *timestamp >= window_start);
        self.packet_sent_times
            .retain(|_, timestamp| *timestamp >= window_start);
    }
}

/// Turns raw collector events into rolling per-media statistics.
pub struct StatisticsAnalyzer {
    client: Box<dyn SenderStatsClient>,
    collector: SharedCollector,
    reference: Instant,
    next_analysis: Option<Instant>,
    audio: MediaAggregate,
    video: MediaAggregate,
}

impl StatisticsAnalyzer {
    pub fn new(client: Box<dyn SenderStatsClient>, now: Instant) -> Self {
        Self {
            client,
            collector: Rc::new(RefCell::new(StatisticsCollector::default())),
            reference: now,
            next_analysis: None,
            audio: MediaAggregate::new(),
            video: MediaAggregate::new(),
        }
    }

    /// The collector to hand to the sender pipeline.
    pub fn statistics_collector(&self) -> SharedCollector {
        self.collector.clone()
    }

    /// Begin the analysis cadence.
    pub fn schedule_analysis(&mut self, now: Instant) {
        self.next_analysis = Some(now + ANALYSIS_INTERVAL);
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.next_analysis
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        let Some(next_analysis) = self.next_analysis else {
            return;
        };
        if now < next_analysis {
            return;
        }
        self.analyze(now);
        self.next_analysis = Some(now + ANALYSIS_INTERVAL);
    }

    fn aggregate_for(&mut self, media: StatisticsEventMediaType) -> Option<&mut MediaAggregate> {
        match media {
            StatisticsEventMediaType::Audio => Some(&mut self.audio),
            StatisticsEventMediaType::Video => Some(&mut self.video),
            StatisticsEventMediaType::Unknown => None,
        }
    }

    fn analyze(&mut self, now: Instant) {
        let frame_events = self.collector.borrow_mut().take_recent_frame_events();
        let packet_events = self.collector.borrow_mut().take_recent_packet_events();
        trace!(
            frames = frame_events.len(),
            packets = packet_events.len(),
            "analyzing statistics window"
        );

        for event in &frame_events {
            if let Some(aggregate) = self.aggregate_for(event.media_type) {
                aggregate.on_frame_event(event);
            }
        }
        for event in &packet_events {
            if let Some(aggregate) = self.aggregate_for(event.media_type) {
                aggregate.on_packet_event(event);
            }
        }

        let stats = SenderStats {
            audio_statistics: self.audio.snapshot(self.reference, now, ANALYSIS_INTERVAL),
            audio_histograms: self.audio.histograms.clone(),
            video_statistics: self.video.snapshot(self.reference, now, ANALYSIS_INTERVAL),
            video_histograms: self.video.histograms.clone(),
        };
        self.client.on_statistics_updated(&stats);

        let window_start = now - ANALYSIS_INTERVAL;
        self.audio.roll_window(window_start);
        self.video.roll_window(window_start);
    }
}
