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

//! OFFER message model and parsing.
//!
//! Streams that fail mandatory-field validation are skipped individually; the
//! OFFER as a whole is rejected only when every offered stream is unusable.

use std::time::Duration;

use ospkit_common::{Error, Result};
use serde_json::Value;
use tracing::warn;

use crate::util::{parse_aes_bytes, SimpleFraction};

/// Synchronization source identifier of an RTP stream.
pub type Ssrc = u32;

/// Playout delay used when the OFFER does not name one.
pub const DEFAULT_TARGET_DELAY: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastMode {
    Mirroring,
    Remoting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    Aac,
}

impl AudioCodec {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "opus" => Some(Self::Opus),
            "aac" => Some(Self::Aac),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Aac => "aac",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Vp8,
    Vp9,
    Av1,
    Hevc,
}

impl VideoCodec {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "h264" => Some(Self::H264),
            "vp8" => Some(Self::Vp8),
            "vp9" => Some(Self::Vp9),
            "av1" => Some(Self::Av1),
            "hevc" => Some(Self::Hevc),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
            Self::Hevc => "hevc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Fields common to audio and video offered streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub index: u32,
    pub codec_name: String,
    pub rtp_profile: String,
    pub rtp_payload_type: u8,
    pub ssrc: Ssrc,
    /// RTP clock rate in ticks per second.
    pub rtp_timebase: u32,
    pub target_delay: Duration,
    pub aes_key: [u8; 16],
    pub aes_iv_mask: [u8; 16],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStream {
    pub stream: Stream,
    pub codec: AudioCodec,
    pub bit_rate: u32,
    pub channels: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoStream {
    pub stream: Stream,
    pub codec: VideoCodec,
    pub max_frame_rate: SimpleFraction,
    pub max_bit_rate: u32,
    pub resolutions: Vec<Dimensions>,
    pub profile: Option<String>,
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub cast_mode: CastMode,
    pub audio_streams: Vec<AudioStream>,
    pub video_streams: Vec<VideoStream>,
}

fn required_str<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::ParseError(format!("missing field {key}")))
}

fn required_u64(value: &Value, key: &str) -> Result<u64> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::ParseError(format!("missing field {key}")))
}

fn parse_common(entry: &Value) -> Result<Stream> {
    let index = required_u64(entry, "index")? as u32;
    let codec_name = required_str(entry, "codecName")?.to_owned();
    let rtp_profile = required_str(entry, "rtpProfile")?.to_owned();
    let rtp_payload_type = required_u64(entry, "rtpPayloadType")? as u8;
    let ssrc = required_u64(entry, "ssrc")? as Ssrc;
    if ssrc == 0 {
        return Err(Error::ParseError("ssrc must be nonzero".into()));
    }

    let timebase: SimpleFraction = required_str(entry, "timeBase")?.parse()?;
    // The timebase comes as "1/<rate>"; the rate is what matters.
    let rtp_timebase = if timebase.numerator == 1 {
        timebase.denominator
    } else {
        timebase.numerator / timebase.denominator
    };
    if rtp_timebase == 0 {
        return Err(Error::ParseError("rtp timebase must be positive".into()));
    }

    let target_delay = entry
        .get("targetDelay")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_TARGET_DELAY);

    let aes_key = parse_aes_bytes(required_str(entry, "aesKey")?)?;
    let aes_iv_mask = parse_aes_bytes(required_str(entry, "aesIvMask")?)?;

    Ok(Stream {
        index,
        codec_name,
        rtp_profile,
        rtp_payload_type,
        ssrc,
        rtp_timebase,
        target_delay,
        aes_key,
        aes_iv_mask,
    })
}

fn parse_audio(entry: &Value) -> Result<AudioStream> {
    let stream = parse_common(entry)?;
    let codec = AudioCodec::from_name(&stream.codec_name)
        .ok_or_else(|| Error::ParseError(format!("unknown audio codec {}", stream.codec_name)))?;
    let bit_rate = required_u64(entry, "bitRate")? as u32;
    let channels = required_u64(entry, "channels")? as u8;
    if channels == 0 {
        return Err(Error::ParseError("channels must be positive".into()));
    }
    Ok(AudioStream {
        stream,
        codec,
        bit_rate,
        channels,
    })
}

fn parse_video(entry: &Value) -> Result<VideoStream> {
    let stream = parse_common(entry)?;
    let codec = VideoCodec::from_name(&stream.codec_name)
        .ok_or_else(|| Error::ParseError(format!("unknown video codec {}", stream.codec_name)))?;
    let max_bit_rate = required_u64(entry, "maxBitRate")? as u32;
    let max_frame_rate = match entry.get("maxFrameRate") {
        Some(Value::String(s)) => s.parse()?,
        Some(value) => SimpleFraction::new(
            value
                .as_u64()
                .ok_or_else(|| Error::ParseError("bad maxFrameRate".into()))? as u32,
            1,
        )?,
        None => SimpleFraction::new(30, 1)?,
    };

    let mut resolutions = Vec::new();
    if let Some(entries) = entry.get("resolutions").and_then(Value::as_array) {
        for resolution in entries {
            resolutions.push(Dimensions {
                width: required_u64(resolution, "width")? as u32,
                height: required_u64(resolution, "height")? as u32,
            });
        }
    }

    Ok(VideoStream {
        stream,
        codec,
        max_frame_rate,
        max_bit_rate,
        resolutions,
        profile: entry
            .get("profile")
            .and_then(Value::as_str)
            .map(str::to_owned),
        level: entry.get("level").and_then(Value::as_str).map(str::to_owned),
    })
}

impl Offer {
    /// Parse an OFFER body.
    ///
    /// Individual streams failing validation are dropped with a warning; the
    /// whole OFFER fails only when streams were offered and none survived.
    pub fn parse(body: &Value) -> Result<Offer> {
        let cast_mode = match body.get("castMode").and_then(Value::as_str) {
            Some("remoting") => CastMode::Remoting,
            _ => CastMode::Mirroring,
        };

        let entries = body
            .get("supportedStreams")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::ParseError("missing supportedStreams".into()))?;

        let mut offer = Offer {
            cast_mode,
            audio_streams: Vec::new(),
            video_streams: Vec::new(),
        };
        for entry in entries {
            let result = match entry.get("type").and_then(Value::as_str) {
                Some("audio_source") => parse_audio(entry).map(|s| offer.audio_streams.push(s)),
                Some("video_source") => parse_video(entry).map(|s| offer.video_streams.push(s)),
                other => Err(Error::ParseError(format!("unknown stream type {other:?}"))),
            };
            if let Err(err) = result {
                warn!(%err, "skipping invalid offered stream");
            }
        }

        if !entries.is_empty()
            && offer.audio_streams.is_empty()
            && offer.video_streams.is_empty()
        {
            return Err(Error::ParseError(
                "no offered stream passed validation".into(),
            ));
        }
        Ok(offer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_audio_entry() -> Value {
        json!({
            "index": 2,
            "type": "audio_source",
            "codecName": "opus",
            "rtpProfile": "cast",
            "rtpPayloadType": 96,
            "ssrc": 19088743u32,
            "bitRate": 124000,
            "timeBase": "1/48000",
            "channels": 2,
            "aesKey": "51027e4e2347cbcb49d57ef10177aebc",
            "aesIvMask": "7f12a19be62a36c04ae4116caaeff6d1"
        })
    }

    #[test]
    fn parses_minimal_audio_offer() {
        let body = json!({
            "castMode": "mirroring",
            "supportedStreams": [minimal_audio_entry()],
        });
        let offer = Offer::parse(&body).unwrap();
        assert_eq!(offer.cast_mode, CastMode::Mirroring);
        assert_eq!(offer.audio_streams.len(), 1);
        let audio = &offer.audio_streams[0];
        assert_eq!(audio.stream.index, 2);
        assert_eq!(audio.stream.ssrc, 19088743);
        assert_eq!(audio.stream.rtp_timebase, 48000);
        assert_eq!(audio.stream.target_delay, DEFAULT_TARGET_DELAY);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.codec, AudioCodec::Opus);
    }

    #[test]
    fn stream_missing_aes_key_is_dropped() {
        let mut entry = minimal_audio_entry();
        entry.as_object_mut().unwrap().remove("aesKey");
        let body = json!({ "supportedStreams": [entry] });
        assert!(matches!(Offer::parse(&body), Err(Error::ParseError(_))));
    }

    #[test]
    fn one_bad_stream_does_not_sink_the_offer() {
        let mut bad = minimal_audio_entry();
        bad.as_object_mut().unwrap().remove("channels");
        let body = json!({ "supportedStreams": [bad, minimal_audio_entry()] });
        let offer = Offer::parse(&body).unwrap();
        assert_eq!(offer.audio_streams.len(), 1);
    }

    #[test]
    fn zero_ssrc_is_invalid() {
        let mut entry = minimal_audio_entry();
        entry["ssrc"] = json!(0);
        let body = json!({ "supportedStreams": [entry] });
        assert!(Offer::parse(&body).is_err());
    }

    #[test]
    fn missing_supported_streams_is_a_parse_error() {
        assert!(Offer::parse(&json!({ "castMode": "mirroring" })).is_err());
    }

    #[test]
    fn video_stream_requires_max_bit_rate() {
        let video = json!({
            "index": 0,
            "type": "video_source",
            "codecName": "vp8",
            "rtpProfile": "cast",
            "rtpPayloadType": 100,
            "ssrc": 19088743u32,
            "timeBase": "1/90000",
            "maxFrameRate": "30000/1001",
            "maxBitRate": 5000000,
            "resolutions": [{ "width": 1920, "height": 1080 }],
            "aesKey": "bbf109bf84513b456b13a184453b66ce",
            "aesIvMask": "edaf9e4536e2b66191f560d9c04b2a69"
        });
        let offer = Offer::parse(&json!({ "supportedStreams": [video] })).unwrap();
        assert_eq!(offer.video_streams.len(), 1);
        let stream = &offer.video_streams[0];
        assert_eq!(stream.max_bit_rate, 5_000_000);
        assert_eq!(stream.resolutions.len(), 1);
        assert!((stream.max_frame_rate.as_f64() - 29.97).abs() < 0.01);

        let body = json!({ "supportedStreams": [{
            "index": 0,
            "type": "video_source",
            "codecName": "vp8",
            "rtpProfile": "cast",
            "rtpPayloadType": 100,
            "ssrc": 19088743u32,
            "timeBase": "1/90000",
            "aesKey": "bbf109bf84513b456b13a184453b66ce",
            "aesIvMask": "edaf9e4536e2b66191f560d9c04b2a69"
        }] });
        assert!(Offer::parse(&body).is_err());
    }
}
