//! JSON control frames exchanged with the measurement backend.
//!
//! Binary frames carry raw payload bytes and never pass through this module.

use super::{LatencyResult, SpeedTestError, ThroughputResult};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::warn;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;

pub fn is_expected_close(code: u16) -> bool {
    code == CLOSE_NORMAL || code == CLOSE_GOING_AWAY
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Echo of a server ping; fields are copied verbatim.
    Pong { timestamp: Number, sequence: Number },
    #[serde(rename_all = "camelCase")]
    Start { chunk_size: usize },
    Complete,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Ping {
        timestamp: Number,
        sequence: Number,
    },
    #[serde(rename_all = "camelCase")]
    Start {
        #[serde(default)]
        chunk_size: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    ChunkSize {
        #[serde(default)]
        chunk_size: Option<usize>,
    },
    Result(ResultFrame),
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Union of the terminal result payloads of all three phases.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFrame {
    pub latency: Option<f64>,
    pub jitter: Option<f64>,
    pub packets: Option<u64>,
    pub packet_loss: Option<f64>,
    pub min_latency: Option<f64>,
    pub max_latency: Option<f64>,
    pub throughput: Option<f64>,
    pub bytes: Option<u64>,
    pub duration: Option<f64>,
    pub ttfb: Option<f64>,
    pub speed_variance: Option<f64>,
    pub speed_samples: Option<Vec<f64>>,
}

impl ResultFrame {
    pub fn into_latency(self) -> Result<LatencyResult, SpeedTestError> {
        let latency = required(self.latency, "latency")?;
        let jitter = required(self.jitter, "jitter")?;
        let packets = required(self.packets, "packets")?;

        Ok(LatencyResult {
            latency: non_negative(latency, "latency"),
            jitter: non_negative(jitter, "jitter"),
            packets,
            packet_loss: self.packet_loss.map(clamp_percent),
            min_latency: self.min_latency.map(|v| non_negative(v, "minLatency")),
            max_latency: self.max_latency.map(|v| non_negative(v, "maxLatency")),
        })
    }

    pub fn into_throughput(self) -> Result<ThroughputResult, SpeedTestError> {
        let throughput = required(self.throughput, "throughput")?;
        let bytes = required(self.bytes, "bytes")?;
        let duration = required(self.duration, "duration")?;

        Ok(ThroughputResult {
            throughput: non_negative(throughput, "throughput"),
            bytes,
            duration: non_negative(duration, "duration"),
            ttfb: self.ttfb.map(|v| non_negative(v, "ttfb")),
            speed_variance: self.speed_variance.map(|v| non_negative(v, "speedVariance")),
            speed_samples: self
                .speed_samples
                .map(|samples| samples.into_iter().map(|v| v.max(0.0)).collect()),
        })
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, SpeedTestError> {
    value.ok_or_else(|| SpeedTestError::Protocol(format!("result frame is missing `{field}`")))
}

fn non_negative(value: f64, field: &str) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        warn!(field, value, "server sent an out-of-range value, clamping to 0");
        0.0
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        warn!(value, "server sent an invalid packetLoss");
        return 0.0;
    }
    if !(0.0..=100.0).contains(&value) {
        warn!(value, "server sent packetLoss outside [0, 100], clamping");
    }
    value.clamp(0.0, 100.0)
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// A non-terminal frame that can be skipped.
    #[error("malformed frame: {0}")]
    Malformed(serde_json::Error),
    /// A `result` frame that cannot be read; the phase cannot complete.
    #[error("malformed result frame: {0}")]
    MalformedResult(serde_json::Error),
}

pub fn decode(text: &str) -> Result<ServerMessage, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    let is_result = value.get("type").and_then(Value::as_str) == Some("result");
    serde_json::from_value(value).map_err(|e| {
        if is_result {
            DecodeError::MalformedResult(e)
        } else {
            DecodeError::Malformed(e)
        }
    })
}

pub fn encode(message: &ClientMessage) -> String {
    // Serializing these variants cannot fail: no maps with non-string keys.
    serde_json::to_string(message).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_echoes_numbers_verbatim() {
        let msg = decode(r#"{"type":"ping","timestamp":1712345678901234567,"sequence":7}"#).unwrap();
        let ServerMessage::Ping { timestamp, sequence } = msg else {
            panic!("expected ping, got {msg:?}");
        };
        let pong = encode(&ClientMessage::Pong { timestamp, sequence });
        assert_eq!(
            pong,
            r#"{"type":"pong","timestamp":1712345678901234567,"sequence":7}"#
        );
    }

    #[test]
    fn start_and_complete_wire_format() {
        assert_eq!(
            encode(&ClientMessage::Start { chunk_size: 262144 }),
            r#"{"type":"start","chunkSize":262144}"#
        );
        assert_eq!(encode(&ClientMessage::Complete), r#"{"type":"complete"}"#);
    }

    #[test]
    fn decodes_chunk_size_directives() {
        assert_eq!(
            decode(r#"{"type":"chunkSize","chunkSize":524288,"sequence":3}"#).unwrap(),
            ServerMessage::ChunkSize { chunk_size: Some(524288) }
        );
        assert_eq!(
            decode(r#"{"type":"start","sequence":0}"#).unwrap(),
            ServerMessage::Start { chunk_size: None }
        );
    }

    #[test]
    fn unknown_types_are_tolerated() {
        assert_eq!(decode(r#"{"type":"stats","x":1}"#).unwrap(), ServerMessage::Unknown);
    }

    #[test]
    fn malformed_result_is_distinguished() {
        assert!(matches!(decode("not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            decode(r#"{"type":"result","latency":"fast"}"#),
            Err(DecodeError::MalformedResult(_))
        ));
    }

    #[test]
    fn latency_result_requires_core_fields() {
        let frame = ResultFrame {
            latency: Some(12.0),
            jitter: Some(1.0),
            ..ResultFrame::default()
        };
        assert!(matches!(frame.into_latency(), Err(SpeedTestError::Protocol(_))));
    }

    #[test]
    fn result_values_are_sanitized() {
        let frame = ResultFrame {
            latency: Some(-3.0),
            jitter: Some(2.0),
            packets: Some(20),
            packet_loss: Some(140.0),
            ..ResultFrame::default()
        };
        let result = frame.into_latency().unwrap();
        assert_eq!(result.latency, 0.0);
        assert_eq!(result.packet_loss, Some(100.0));
    }

    #[test]
    fn throughput_result_from_backend_frame() {
        let msg = decode(
            r#"{"type":"result","throughput":94.2,"bytes":117750000,"duration":10.0,
               "ttfb":35.5,"speedVariance":12.5,"speedSamples":[90.0,95.0,97.6],"timestamp":1712345678}"#,
        )
        .unwrap();
        let ServerMessage::Result(frame) = msg else {
            panic!("expected result");
        };
        let result = frame.into_throughput().unwrap();
        assert_eq!(result.throughput, 94.2);
        assert_eq!(result.bytes, 117_750_000);
        assert_eq!(result.ttfb, Some(35.5));
        assert_eq!(result.speed_samples.as_deref(), Some(&[90.0, 95.0, 97.6][..]));
    }

    #[test]
    fn null_samples_decode_as_absent() {
        let ServerMessage::Result(frame) =
            decode(r#"{"type":"result","throughput":1,"bytes":1,"duration":1,"speedSamples":null}"#)
                .unwrap()
        else {
            panic!("expected result");
        };
        assert_eq!(frame.into_throughput().unwrap().speed_samples, None);
    }
}
