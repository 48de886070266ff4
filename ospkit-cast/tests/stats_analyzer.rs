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

//! Statistics analyzer windows driven by a fake clock.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use ospkit_cast::{
    FrameEvent, HistogramType, PacketEvent, SenderStats, SenderStatsClient, StatisticType,
    StatisticsAnalyzer, StatisticsEventMediaType, StatisticsEventType, ANALYSIS_INTERVAL,
};
use ospkit_common::{Clock, FakeClock};

const NUM_EVENTS: usize = 20;
const EVENT_SIZE_BYTES: usize = 10;
const EVENT_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct CapturedStats(Rc<RefCell<Vec<SenderStats>>>);

impl SenderStatsClient for CapturedStats {
    fn on_statistics_updated(&mut self, stats: &SenderStats) {
        self.0.borrow_mut().push(stats.clone());
    }
}

struct Fixture {
    clock: FakeClock,
    analyzer: StatisticsAnalyzer,
    stats: Rc<RefCell<Vec<SenderStats>>>,
}

fn fixture() -> Fixture {
    let clock = FakeClock::new();
    let stats = Rc::new(RefCell::new(Vec::new()));
    let mut analyzer =
        StatisticsAnalyzer::new(Box::new(CapturedStats(stats.clone())), clock.now());
    analyzer.schedule_analysis(clock.now());
    Fixture {
        clock,
        analyzer,
        stats,
    }
}

fn frame_event(fixture: &Fixture, frame_id: u64, event_type: StatisticsEventType) -> FrameEvent {
    FrameEvent {
        frame_id,
        event_type,
        media_type: StatisticsEventMediaType::Video,
        rtp_timestamp: (frame_id as u32) * 90,
        size: EVENT_SIZE_BYTES,
        timestamp: fixture.clock.now(),
        delay_delta_ms: None,
    }
}

fn packet_event(fixture: &Fixture, index: usize, event_type: StatisticsEventType) -> PacketEvent {
    PacketEvent {
        packet_id: index as u16,
        frame_id: index as u64,
        event_type,
        media_type: StatisticsEventMediaType::Video,
        rtp_timestamp: (index as u32) * 90,
        size: EVENT_SIZE_BYTES,
        timestamp: fixture.clock.now(),
    }
}

fn finish_window(fixture: &mut Fixture, consumed: Duration) {
    fixture.clock.advance(ANALYSIS_INTERVAL - consumed);
    fixture.analyzer.handle_timeout(fixture.clock.now());
}

#[test]
fn frame_encoded_rates() {
    let mut fixture = fixture();
    let collector = fixture.analyzer.statistics_collector();

    for i in 0..NUM_EVENTS {
        let event = frame_event(&fixture, i as u64, StatisticsEventType::FrameEncoded);
        collector.borrow_mut().collect_frame_event(event);
        fixture.clock.advance(EVENT_INTERVAL);
    }
    finish_window(&mut fixture, EVENT_INTERVAL * NUM_EVENTS as u32);

    let stats = fixture.stats.borrow();
    assert_eq!(stats.len(), 1);
    let video = &stats[0].video_statistics;
    // 20 events over a 500 ms window.
    assert_eq!(video[StatisticType::EnqueueFps], 40.0);
    // 10 bytes * 8 bits * 20 events / 500 ms.
    assert_eq!(video[StatisticType::EncodeRateKbps], 3.2);
    assert_eq!(video[StatisticType::FirstEventTimeMs], 0.0);
    assert_eq!(
        video[StatisticType::LastEventTimeMs],
        (EVENT_INTERVAL.as_millis() as f64) * (NUM_EVENTS as f64 - 1.0)
    );
}

#[test]
fn frame_latency_is_averaged_over_ack_pairs() {
    let mut fixture = fixture();
    let collector = fixture.analyzer.statistics_collector();
    let mut total_latency_ms = 0u64;

    for i in 0..NUM_EVENTS {
        let encoded = frame_event(&fixture, i as u64, StatisticsEventType::FrameEncoded);

        // Per-frame latency between 20 and 39 ms.
        let latency_ms = 20 + ((i as u64) * 7) % 20;
        total_latency_ms += latency_ms;
        let mut ack = frame_event(&fixture, i as u64, StatisticsEventType::FrameAckSent);
        ack.timestamp += Duration::from_millis(latency_ms);

        let mut c = collector.borrow_mut();
        c.collect_frame_event(encoded);
        c.collect_frame_event(ack);
        drop(c);
        fixture.clock.advance(EVENT_INTERVAL);
    }
    finish_window(&mut fixture, EVENT_INTERVAL * NUM_EVENTS as u32);

    let stats = fixture.stats.borrow();
    let video = &stats[0].video_statistics;
    let expected = total_latency_ms as f64 / NUM_EVENTS as f64;
    assert!((video[StatisticType::AvgFrameLatencyMs] - expected).abs() < 1e-9);
}

#[test]
fn played_out_frames_count_lateness_into_histogram() {
    let mut fixture = fixture();
    let collector = fixture.analyzer.statistics_collector();
    let mut late = 0;

    for i in 0..NUM_EVENTS {
        let encoded = frame_event(&fixture, i as u64, StatisticsEventType::FrameEncoded);

        // Delay deltas cycle through 60, 40, 20, 0, -20 ms.
        let delay_delta_ms = 60 - 20 * (i as i64 % 5);
        if delay_delta_ms > 0 {
            late += 1;
        }
        let mut played = frame_event(&fixture, i as u64, StatisticsEventType::FramePlayedOut);
        played.timestamp += Duration::from_millis(25);
        played.delay_delta_ms = Some(delay_delta_ms);

        let mut c = collector.borrow_mut();
        c.collect_frame_event(encoded);
        c.collect_frame_event(played);
        drop(c);
        fixture.clock.advance(EVENT_INTERVAL);
    }
    finish_window(&mut fixture, EVENT_INTERVAL * NUM_EVENTS as u32);

    let stats = fixture.stats.borrow();
    let video = &stats[0].video_statistics;
    assert_eq!(video[StatisticType::NumLateFrames], f64::from(late));

    let histogram = &stats[0].video_histograms[HistogramType::FrameLatenessMs as usize];
    // Buckets: <0, [0,20), [20,40), [40,60), [60,80).
    assert_eq!(&histogram.buckets[..5], &[4, 4, 4, 4, 4]);
    assert_eq!(histogram.total(), NUM_EVENTS as i64);
}

#[test]
fn packet_pairing_produces_network_and_packet_latency() {
    let mut fixture = fixture();
    let collector = fixture.analyzer.statistics_collector();
    let mut total_network_ms = 0u64;
    let mut last_response_ms = 0u64;

    for i in 0..NUM_EVENTS {
        let encoded = frame_event(&fixture, i as u64, StatisticsEventType::FrameEncoded);
        let sent = packet_event(&fixture, i, StatisticsEventType::PacketSentToNetwork);

        // Network latency cycles through 80, 60, 40, 20, 0 ms.
        let latency_ms = 80 - 20 * (i as u64 % 5);
        total_network_ms += latency_ms;
        last_response_ms = last_response_ms.max(i as u64 * EVENT_INTERVAL.as_millis() as u64 + latency_ms);
        let mut received = packet_event(&fixture, i, StatisticsEventType::PacketReceived);
        received.timestamp += Duration::from_millis(latency_ms);

        let mut c = collector.borrow_mut();
        c.collect_frame_event(encoded);
        c.collect_packet_event(sent);
        c.collect_packet_event(received);
        drop(c);
        fixture.clock.advance(EVENT_INTERVAL);
    }
    finish_window(&mut fixture, EVENT_INTERVAL * NUM_EVENTS as u32);

    let stats = fixture.stats.borrow();
    let video = &stats[0].video_statistics;
    assert_eq!(video[StatisticType::NumPacketsSent], NUM_EVENTS as f64);
    assert_eq!(video[StatisticType::NumPacketsReceived], NUM_EVENTS as f64);
    assert_eq!(
        video[StatisticType::PacketTransmissionRateKbps],
        EVENT_SIZE_BYTES as f64 * 8.0 * NUM_EVENTS as f64 / 500.0
    );

    let expected_network = total_network_ms as f64 / NUM_EVENTS as f64;
    assert!((video[StatisticType::AvgNetworkLatencyMs] - expected_network).abs() < 1e-9);
    // Packets were sent at encode time, so packet latency equals network
    // latency here.
    assert!((video[StatisticType::AvgPacketLatencyMs] - expected_network).abs() < 1e-9);

    // The receiver's last response is the latest PacketReceived timestamp.
    let expected_since_response =
        ANALYSIS_INTERVAL.as_millis() as f64 - last_response_ms as f64;
    assert!(
        (video[StatisticType::TimeSinceLastReceiverResponseMs] - expected_since_response).abs()
            < 1e-9
    );
}

#[test]
fn audio_and_video_are_aggregated_separately() {
    let mut fixture = fixture();
    let collector = fixture.analyzer.statistics_collector();
    let mut audio_packets = 0;
    let mut video_packets = 0;

    for i in 0..NUM_EVENTS {
        let media = if i % 2 == 0 {
            audio_packets += 1;
            StatisticsEventMediaType::Audio
        } else {
            video_packets += 1;
            StatisticsEventMediaType::Video
        };
        let mut sent = packet_event(&fixture, i, StatisticsEventType::PacketSentToNetwork);
        sent.media_type = media;
        collector.borrow_mut().collect_packet_event(sent);
        fixture.clock.advance(EVENT_INTERVAL);
    }
    finish_window(&mut fixture, EVENT_INTERVAL * NUM_EVENTS as u32);

    let stats = fixture.stats.borrow();
    assert_eq!(
        stats[0].audio_statistics[StatisticType::NumPacketsSent],
        f64::from(audio_packets)
    );
    assert_eq!(
        stats[0].video_statistics[StatisticType::NumPacketsSent],
        f64::from(video_packets)
    );
}

#[test]
fn unmatched_halves_are_dropped() {
    let mut fixture = fixture();
    let collector = fixture.analyzer.statistics_collector();

    // A lone ack with no matching encode contributes nothing.
    let ack = frame_event(&fixture, 42, StatisticsEventType::FrameAckSent);
    collector.borrow_mut().collect_frame_event(ack);
    // A received packet with no matching send contributes counts only.
    let received = packet_event(&fixture, 7, StatisticsEventType::PacketReceived);
    collector.borrow_mut().collect_packet_event(received);

    finish_window(&mut fixture, Duration::ZERO);

    let stats = fixture.stats.borrow();
    let video = &stats[0].video_statistics;
    assert_eq!(video[StatisticType::AvgFrameLatencyMs], 0.0);
    assert_eq!(video[StatisticType::AvgNetworkLatencyMs], 0.0);
    assert_eq!(video[StatisticType::NumPacketsReceived], 1.0);
}

#[test]
fn windows_reset_rates_but_not_counters() {
    let mut fixture = fixture();
    let collector = fixture.analyzer.statistics_collector();

    let sent = packet_event(&fixture, 0, StatisticsEventType::PacketSentToNetwork);
    collector.borrow_mut().collect_packet_event(sent);
    finish_window(&mut fixture, Duration::ZERO);

    // Second, empty window.
    fixture.clock.advance(ANALYSIS_INTERVAL);
    fixture.analyzer.handle_timeout(fixture.clock.now());

    let stats = fixture.stats.borrow();
    assert_eq!(stats.len(), 2);
    assert!(stats[1].video_statistics[StatisticType::PacketTransmissionRateKbps] == 0.0);
    // Cumulative counters survive the window roll.
    assert_eq!(stats[1].video_statistics[StatisticType::NumPacketsSent], 1.0);
}
