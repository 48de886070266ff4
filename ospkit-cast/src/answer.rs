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

//! ANSWER message model and serialization.

use std::time::Duration;

use serde_json::{json, Value};

use crate::offer::{Dimensions, Ssrc};

/// Audio constraints advertised back to the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConstraints {
    pub max_sample_rate: u32,
    pub max_channels: u8,
    pub min_bit_rate: u32,
    pub max_bit_rate: u32,
    pub max_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoConstraints {
    pub max_pixels_per_second: f64,
    pub max_dimensions: Dimensions,
    pub min_bit_rate: u32,
    pub max_bit_rate: u32,
    pub max_delay: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub audio: Option<AudioConstraints>,
    pub video: Option<VideoConstraints>,
}

impl Constraints {
    pub fn is_valid(&self) -> bool {
        self.audio.is_some() || self.video.is_some()
    }
}

/// Whether the receiver may scale content to fit its display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatioConstraint {
    Fixed,
    Variable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayDescription {
    pub dimensions: Dimensions,
    pub aspect_ratio_constraint: AspectRatioConstraint,
}

/// A successful ANSWER.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub udp_port: u16,
    pub send_indexes: Vec<u32>,
    pub ssrcs: Vec<Ssrc>,
    pub constraints: Option<Constraints>,
    pub display: Option<DisplayDescription>,
}

impl Answer {
    pub fn is_valid(&self) -> bool {
        self.udp_port > 0
            && !self.send_indexes.is_empty()
            && self.send_indexes.len() == self.ssrcs.len()
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "udpPort": self.udp_port,
            "sendIndexes": self.send_indexes,
            "ssrcs": self.ssrcs,
        });
        if let Some(constraints) = &self.constraints {
            let mut value = json!({});
            if let Some(audio) = &constraints.audio {
                value["audio"] = json!({
                    "maxSampleRate": audio.max_sample_rate,
                    "maxChannels": audio.max_channels,
                    "minBitRate": audio.min_bit_rate,
                    "maxBitRate": audio.max_bit_rate,
                    "maxDelay": audio.max_delay.as_millis() as u64,
                });
            }
            if let Some(video) = &constraints.video {
                value["video"] = json!({
                    "maxPixelsPerSecond": video.max_pixels_per_second,
                    "maxDimensions": {
                        "width": video.max_dimensions.width,
                        "height": video.max_dimensions.height,
                    },
                    "minBitRate": video.min_bit_rate,
                    "maxBitRate": video.max_bit_rate,
                    "maxDelay": video.max_delay.as_millis() as u64,
                });
            }
            body["constraints"] = value;
        }
        if let Some(display) = &self.display {
            body["display"] = json!({
                "dimensions": {
                    "width": display.dimensions.width,
                    "height": display.dimensions.height,
                },
                "aspectRatio": match display.aspect_ratio_constraint {
                    AspectRatioConstraint::Fixed => "fixed",
                    AspectRatioConstraint::Variable => "variable",
                },
            });
        }
        body
    }
}

/// The reply envelope wrapping either an answer or an error.
pub fn answer_reply(sequence_number: i64, answer: &Answer) -> Value {
    json!({
        "type": "ANSWER",
        "seqNum": sequence_number,
        "result": "ok",
        "answer": answer.to_json(),
    })
}

pub fn error_reply(sequence_number: i64, code: i32, description: &str) -> Value {
    json!({
        "type": "ANSWER",
        "seqNum": sequence_number,
        "result": "error",
        "error": {
            "code": code,
            "description": description,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_validity() {
        let answer = Answer {
            udp_port: 50000,
            send_indexes: vec![2],
            ssrcs: vec![19088744],
            constraints: None,
            display: None,
        };
        assert!(answer.is_valid());

        let bad_port = Answer {
            udp_port: 0,
            ..answer.clone()
        };
        assert!(!bad_port.is_valid());

        let mismatched = Answer {
            ssrcs: vec![],
            ..answer
        };
        assert!(!mismatched.is_valid());
    }

    #[test]
    fn reply_envelopes_carry_result() {
        let answer = Answer {
            udp_port: 50000,
            send_indexes: vec![2, 3],
            ssrcs: vec![19088744, 19088745],
            constraints: None,
            display: None,
        };
        let ok = answer_reply(7, &answer);
        assert_eq!(ok["type"], "ANSWER");
        assert_eq!(ok["seqNum"], 7);
        assert_eq!(ok["result"], "ok");
        assert_eq!(ok["answer"]["udpPort"], 50000);

        let err = error_reply(7, 100, "Failed to parse malformed OFFER");
        assert_eq!(err["result"], "error");
        assert_eq!(err["error"]["description"], "Failed to parse malformed OFFER");
    }
}
