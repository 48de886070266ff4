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

//! Cast streaming support: OFFER/ANSWER session negotiation on the receiver
//! side and rolling sender-side statistics, plus the cast channel envelope
//! types shared by both.

pub mod answer;
pub mod channel;
pub mod offer;
pub mod session;
pub mod stats;
pub mod util;

pub use answer::{
    answer_reply, error_reply, Answer, AspectRatioConstraint, AudioConstraints, Constraints,
    DisplayDescription, VideoConstraints,
};
pub use channel::{CastMessage, CastPayload, SessionIdGenerator};
pub use offer::{
    AudioCodec, AudioStream, CastMode, Dimensions, Offer, Ssrc, Stream, VideoCodec, VideoStream,
    DEFAULT_TARGET_DELAY,
};
pub use session::{
    AudioCaptureConfig, AudioLimits, ConfiguredReceivers, Display, Environment, MessagePort,
    Preferences, Receiver, ReceiverSession, ReceiversDestroyingReason, SessionClient,
    SessionConfig, SocketState, VideoCaptureConfig, VideoLimits,
};
pub use stats::{
    FrameEvent, HistogramType, PacketEvent, SenderStats, SenderStatsClient, SimpleHistogram,
    StatisticType, StatisticsAnalyzer, StatisticsCollector, StatisticsEventMediaType,
    StatisticsEventType, StatisticsList, ANALYSIS_INTERVAL,
};
pub use util::SimpleFraction;
