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

//! Receiver-side streaming session negotiation.
//!
//! Parses inbound OFFERs, selects at most one audio and one video stream by
//! the caller's codec preference order, spawns receivers and replies with an
//! ANSWER. Negotiation that cannot proceed replies with an error ANSWER and
//! the session stays idle until a new OFFER arrives.

use std::time::Duration;

use ospkit_common::{Error, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::answer::{
    answer_reply, error_reply, Answer, AspectRatioConstraint, AudioConstraints, Constraints,
    DisplayDescription, VideoConstraints,
};
use crate::channel::SessionIdGenerator;
use crate::offer::{
    AudioCodec, AudioStream, Dimensions, Offer, Ssrc, VideoCodec, VideoStream,
};
use crate::util::SimpleFraction;

/// Error code carried by error ANSWER replies.
const ANSWER_PARSE_ERROR_CODE: i32 = 1;

/// State of the environment's UDP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Still binding; negotiation results are stashed until ready.
    Starting,
    Ready,
    Invalid,
}

/// The platform environment a session runs in: a bound UDP socket for RTP
/// traffic. The socket itself is owned outside the core.
pub trait Environment {
    fn socket_state(&self) -> SocketState;
    /// Port of the bound socket, advertised in the ANSWER.
    fn bound_port(&self) -> u16;
}

/// Outbound message sink toward the sender.
pub trait MessagePort {
    fn send_message(&mut self, namespace: &str, message: String) -> Result<()>;
}

/// Why existing receivers are being destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiversDestroyingReason {
    EndOfSession,
    Renegotiated,
}

/// Wire-level configuration of one spawned receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub sender_ssrc: Ssrc,
    pub receiver_ssrc: Ssrc,
    pub rtp_timebase: u32,
    pub channels: u8,
    pub target_playout_delay: Duration,
    pub aes_key: [u8; 16],
    pub aes_iv_mask: [u8; 16],
    pub is_pli_enabled: bool,
}

/// A spawned media receiver. RTP reception itself lives outside the core;
/// this holds the negotiated wire parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receiver {
    config: SessionConfig,
}

impl Receiver {
    fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioCaptureConfig {
    pub codec: AudioCodec,
    pub channels: u8,
    pub bit_rate: u32,
    pub sample_rate: u32,
    pub target_playout_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoCaptureConfig {
    pub codec: VideoCodec,
    pub max_frame_rate: SimpleFraction,
    pub max_bit_rate: u32,
    pub resolutions: Vec<Dimensions>,
    pub target_playout_delay: Duration,
}

/// Everything handed to the client after a successful negotiation.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredReceivers {
    pub audio: Option<SessionConfig>,
    pub audio_config: Option<AudioCaptureConfig>,
    pub video: Option<SessionConfig>,
    pub video_config: Option<VideoCaptureConfig>,
}

/// Upward events from the session.
pub trait SessionClient {
    fn on_negotiated(&mut self, receivers: ConfiguredReceivers);
    fn on_receivers_destroying(&mut self, reason: ReceiversDestroyingReason);
    fn on_error(&mut self, error: &Error);
}

/// Per-codec audio limits for the ANSWER constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioLimits {
    /// When true the limit applies regardless of codec.
    pub applies_to_all_codecs: bool,
    pub codec: Option<AudioCodec>,
    pub max_sample_rate: u32,
    pub max_channels: u8,
    pub min_bit_rate: u32,
    pub max_bit_rate: u32,
    pub max_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoLimits {
    pub applies_to_all_codecs: bool,
    pub codec: Option<VideoCodec>,
    pub max_pixels_per_second: f64,
    pub max_dimensions: Dimensions,
    pub min_bit_rate: u32,
    pub max_bit_rate: u32,
    pub max_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Display {
    pub dimensions: Dimensions,
    pub can_scale_content: bool,
}

/// Caller preferences driving stream selection and constraints.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    /// Preferred audio codecs, most preferred first.
    pub audio_codecs: Vec<AudioCodec>,
    pub video_codecs: Vec<VideoCodec>,
    pub audio_limits: Vec<AudioLimits>,
    pub video_limits: Vec<VideoLimits>,
    pub display_description: Option<Display>,
}

/// Streams chosen from one OFFER, waiting for the socket if necessary.
#[derive(Debug, Clone)]
struct SessionProperties {
    sequence_number: i64,
    selected_audio: Option<AudioStream>,
    selected_video: Option<VideoStream>,
}

impl SessionProperties {
    fn is_valid(&self) -> bool {
        (self.selected_audio.is_some() || self.selected_video.is_some())
            && self.sequence_number >= 0
    }
}

fn select_audio(preferred: &[AudioCodec], offered: &[AudioStream]) -> Option<AudioStream> {
    for codec in preferred {
        if let Some(stream) = offered.iter().find(|stream| stream.codec == *codec) {
            debug!(codec = codec.name(), "selected audio codec");
            return Some(stream.clone());
        }
    }
    None
}

fn select_video(preferred: &[VideoCodec], offered: &[VideoStream]) -> Option<VideoStream> {
    for codec in preferred {
        if let Some(stream) = offered.iter().find(|stream| stream.codec == *codec) {
            debug!(codec = codec.name(), "selected video codec");
            return Some(stream.clone());
        }
    }
    None
}

pub struct ReceiverSession {
    client: Box<dyn SessionClient>,
    environment: Box<dyn Environment>,
    message_port: Box<dyn MessagePort>,
    preferences: Preferences,
    session_id: String,
    pending_session: Option<SessionProperties>,
    current_audio_receiver: Option<Receiver>,
    current_video_receiver: Option<Receiver>,
}

impl ReceiverSession {
    pub fn new(
        client: Box<dyn SessionClient>,
        environment: Box<dyn Environment>,
        message_port: Box<dyn MessagePort>,
        preferences: Preferences,
        session_ids: &mut SessionIdGenerator,
    ) -> Self {
        Self {
            client,
            environment,
            message_port,
            preferences,
            session_id: session_ids.make_unique_session_id("streaming_receiver"),
            pending_session: None,
            current_audio_receiver: None,
            current_video_receiver: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn current_receivers(&self) -> (Option<&Receiver>, Option<&Receiver>) {
        (
            self.current_audio_receiver.as_ref(),
            self.current_video_receiver.as_ref(),
        )
    }

    /// Entry point for inbound negotiation messages.
    pub fn on_message(&mut self, message: &str) {
        let value: Value = match serde_json::from_str(message) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "dropping unparseable session message");
                return;
            }
        };
        let sequence_number = value.get("seqNum").and_then(Value::as_i64).unwrap_or(-1);
        match value.get("type").and_then(Value::as_str) {
            Some("OFFER") => self.on_offer(sequence_number, value.get("offer")),
            other => debug!(?other, "ignoring unhandled message type"),
        }
    }

    fn on_offer(&mut self, sequence_number: i64, body: Option<&Value>) {
        // Without a sequence number there is no way to respond.
        if sequence_number < 0 {
            warn!("dropping OFFER with missing sequence number, can't respond");
            return;
        }

        let offer = match body.ok_or_else(|| Error::ParseError("missing offer body".into())) {
            Ok(body) => Offer::parse(body),
            Err(err) => Err(err),
        };
        let offer = match offer {
            Ok(offer) => offer,
            Err(err) => {
                self.send_error_answer_reply(sequence_number, "Failed to parse malformed OFFER");
                self.client
                    .on_error(&Error::ParameterInvalid("received invalid OFFER message".into()));
                debug!(%err, "rejecting malformed OFFER");
                return;
            }
        };

        let mut properties = SessionProperties {
            sequence_number,
            selected_audio: None,
            selected_video: None,
        };
        if !offer.audio_streams.is_empty() && !self.preferences.audio_codecs.is_empty() {
            properties.selected_audio =
                select_audio(&self.preferences.audio_codecs, &offer.audio_streams);
        }
        if !offer.video_streams.is_empty() && !self.preferences.video_codecs.is_empty() {
            properties.selected_video =
                select_video(&self.preferences.video_codecs, &offer.video_streams);
        }

        if !properties.is_valid() {
            self.send_error_answer_reply(
                sequence_number,
                "Failed to select any streams from OFFER",
            );
            return;
        }

        match self.environment.socket_state() {
            SocketState::Invalid => {
                self.send_error_answer_reply(
                    sequence_number,
                    "UDP socket is closed, likely due to a bind error.",
                );
            }
            SocketState::Ready => self.initialize_session(&properties),
            // Stash until the socket-ready or socket-invalid event arrives.
            SocketState::Starting => self.pending_session = Some(properties),
        }
    }

    /// The environment's socket finished binding.
    pub fn on_socket_ready(&mut self) {
        if let Some(properties) = self.pending_session.take() {
            self.initialize_session(&properties);
        }
    }

    /// The environment's socket failed.
    pub fn on_socket_invalid(&mut self) {
        if let Some(properties) = self.pending_session.take() {
            self.send_error_answer_reply(properties.sequence_number, "Failed to bind UDP socket");
        }
        self.client.on_error(&Error::SocketFailure(
            "the environment is invalid and should be replaced".into(),
        ));
    }

    /// Tear down the session, e.g. because the sender went away.
    pub fn end_session(&mut self) {
        self.pending_session = None;
        self.reset_receivers(ReceiversDestroyingReason::EndOfSession);
    }

    fn initialize_session(&mut self, properties: &SessionProperties) {
        let answer = self.construct_answer(properties);
        if !answer.is_valid() {
            // Without a usable answer there is no point spawning receivers;
            // the sender could never reach them.
            self.send_error_answer_reply(
                properties.sequence_number,
                "Failed to construct an ANSWER message",
            );
            return;
        }

        let receivers = self.spawn_receivers(properties);
        self.client.on_negotiated(receivers);
        let reply = answer_reply(properties.sequence_number, &answer);
        if let Err(err) = self
            .message_port
            .send_message(crate::channel::WEBRTC_NAMESPACE, reply.to_string())
        {
            self.client.on_error(&err);
        }
    }

    fn construct_receiver(stream: &crate::offer::Stream, channels: u8) -> Receiver {
        Receiver::new(SessionConfig {
            sender_ssrc: stream.ssrc,
            receiver_ssrc: stream.ssrc + 1,
            rtp_timebase: stream.rtp_timebase,
            channels,
            target_playout_delay: stream.target_delay,
            aes_key: stream.aes_key,
            aes_iv_mask: stream.aes_iv_mask,
            is_pli_enabled: true,
        })
    }

    fn spawn_receivers(&mut self, properties: &SessionProperties) -> ConfiguredReceivers {
        self.reset_receivers(ReceiversDestroyingReason::Renegotiated);

        let mut receivers = ConfiguredReceivers::default();
        if let Some(audio) = &properties.selected_audio {
            let receiver = Self::construct_receiver(&audio.stream, audio.channels);
            receivers.audio = Some(receiver.config().clone());
            receivers.audio_config = Some(AudioCaptureConfig {
                codec: audio.codec,
                channels: audio.channels,
                bit_rate: audio.bit_rate,
                sample_rate: audio.stream.rtp_timebase,
                target_playout_delay: audio.stream.target_delay,
            });
            self.current_audio_receiver = Some(receiver);
        }
        if let Some(video) = &properties.selected_video {
            let receiver = Self::construct_receiver(&video.stream, 1);
            receivers.video = Some(receiver.config().clone());
            receivers.video_config = Some(VideoCaptureConfig {
                codec: video.codec,
                max_frame_rate: video.max_frame_rate,
                max_bit_rate: video.max_bit_rate,
                resolutions: video.resolutions.clone(),
                target_playout_delay: video.stream.target_delay,
            });
            self.current_video_receiver = Some(receiver);
        }
        receivers
    }

    fn reset_receivers(&mut self, reason: ReceiversDestroyingReason) {
        if self.current_audio_receiver.is_some() || self.current_video_receiver.is_some() {
            self.client.on_receivers_destroying(reason);
            self.current_audio_receiver = None;
            self.current_video_receiver = None;
        }
    }

    fn construct_answer(&self, properties: &SessionProperties) -> Answer {
        let mut send_indexes = Vec::new();
        let mut ssrcs = Vec::new();
        let mut constraints = Constraints::default();

        // Audio always precedes video in the answered index list.
        if let Some(audio) = &properties.selected_audio {
            send_indexes.push(audio.stream.index);
            ssrcs.push(audio.stream.ssrc + 1);
            for limit in &self.preferences.audio_limits {
                if limit.applies_to_all_codecs || limit.codec == Some(audio.codec) {
                    constraints.audio = Some(AudioConstraints {
                        max_sample_rate: limit.max_sample_rate,
                        max_channels: limit.max_channels,
                        min_bit_rate: limit.min_bit_rate,
                        max_bit_rate: limit.max_bit_rate,
                        max_delay: limit.max_delay,
                    });
                    break;
                }
            }
        }
        if let Some(video) = &properties.selected_video {
            send_indexes.push(video.stream.index);
            ssrcs.push(video.stream.ssrc + 1);
            for limit in &self.preferences.video_limits {
                if limit.applies_to_all_codecs || limit.codec == Some(video.codec) {
                    constraints.video = Some(VideoConstraints {
                        max_pixels_per_second: limit.max_pixels_per_second,
                        max_dimensions: limit.max_dimensions,
                        min_bit_rate: limit.min_bit_rate,
                        max_bit_rate: limit.max_bit_rate,
                        max_delay: limit.max_delay,
                    });
                    break;
                }
            }
        }

        let display = self
            .preferences
            .display_description
            .as_ref()
            .map(|display| DisplayDescription {
                dimensions: display.dimensions,
                aspect_ratio_constraint: if display.can_scale_content {
                    AspectRatioConstraint::Variable
                } else {
                    AspectRatioConstraint::Fixed
                },
            });

        Answer {
            udp_port: self.environment.bound_port(),
            send_indexes,
            ssrcs,
            constraints: constraints.is_valid().then_some(constraints),
            display,
        }
    }

    fn send_error_answer_reply(&mut self, sequence_number: i64, description: &str) {
        warn!(description, "replying with error ANSWER");
        let reply = error_reply(sequence_number, ANSWER_PARSE_ERROR_CODE, description);
        if let Err(err) = self
            .message_port
            .send_message(crate::channel::WEBRTC_NAMESPACE, reply.to_string())
        {
            self.client.on_error(&err);
        }
    }
}

impl Drop for ReceiverSession {
    fn drop(&mut self) {
        self.reset_receivers(ReceiversDestroyingReason::EndOfSession);
    }
}
