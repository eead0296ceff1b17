//! Suitability verdicts for everyday uses of a connection.

use super::quality::{to_score, Advice, QualityResult};
use crate::speedtest::{LatencyResult, ThroughputResult};
use serde::Serialize;
use std::fmt;

/// Common view over the per-scenario verdicts.
pub trait Verdict {
    fn title(&self) -> &'static str;
    fn suitable(&self) -> bool;
    fn overall_score(&self) -> u8;
    fn message(&self) -> &str;
    fn recommendations(&self) -> &[String];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Resolution {
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "4K")]
    Uhd4k,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resolution::P480 => "480p",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
            Resolution::Uhd4k => "4K",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingVerdict {
    pub suitable: bool,
    pub can_stream_1080p: bool,
    pub can_stream_4k: bool,
    pub recommended_quality: Resolution,
    pub score: u8,
    pub message: String,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GamingVerdict {
    pub suitable: bool,
    pub latency_score: u8,
    pub jitter_score: u8,
    pub packet_loss_score: u8,
    pub overall_score: u8,
    pub message: String,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCallVerdict {
    pub suitable: bool,
    pub upload_score: u8,
    pub latency_score: u8,
    pub stability_score: u8,
    pub overall_score: u8,
    pub message: String,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub streaming: StreamingVerdict,
    pub gaming: GamingVerdict,
    pub video_call: VideoCallVerdict,
}

impl ScenarioReport {
    /// Streaming, gaming and video-call verdicts, in that order.
    pub fn verdicts(&self) -> [&dyn Verdict; 3] {
        [&self.streaming, &self.gaming, &self.video_call]
    }
}

pub fn evaluate_streaming(download: &ThroughputResult, ping: &LatencyResult) -> StreamingVerdict {
    let mbps = download.throughput;
    let latency = ping.latency;

    let can_stream_4k = mbps >= 50.0 && latency < 100.0;
    let can_stream_1080p = mbps >= 25.0 && latency < 100.0;
    let recommended_quality = if can_stream_4k {
        Resolution::Uhd4k
    } else if can_stream_1080p {
        Resolution::P1080
    } else if mbps >= 5.0 {
        Resolution::P720
    } else {
        Resolution::P480
    };

    let mut advice = Advice::new();
    if mbps < 3.0 {
        advice.push("Download speed is too low for reliable streaming");
    } else if mbps < 5.0 {
        advice.push("Enough bandwidth for 480p only");
    }
    if latency >= 100.0 && mbps >= 25.0 {
        advice.push("High latency may cause buffering at higher resolutions");
    }
    advice.push(&format!("Recommended quality: {recommended_quality}"));

    let message = match recommended_quality {
        Resolution::Uhd4k => "Excellent! You can stream 4K without problems.",
        Resolution::P1080 => "Good! You can stream in 1080p.",
        Resolution::P720 => "You can stream in 720p.",
        Resolution::P480 => "Low download speed - 480p or lower is recommended.",
    };

    StreamingVerdict {
        suitable: mbps >= 3.0,
        can_stream_1080p,
        can_stream_4k,
        recommended_quality,
        score: to_score((mbps / 50.0 * 100.0).min(100.0)),
        message: message.to_string(),
        recommendations: advice.into_vec(),
    }
}

pub fn evaluate_gaming(ping: &LatencyResult, download: &ThroughputResult) -> GamingVerdict {
    let latency = ping.latency;
    let jitter = ping.jitter;
    let loss = ping.packet_loss_or_zero();
    let mbps = download.throughput;

    let latency_score = (100.0 - latency / 100.0 * 100.0).max(0.0);
    let jitter_score = (100.0 - jitter / 30.0 * 100.0).max(0.0);
    let packet_loss_score = (100.0 - loss / 5.0 * 100.0).max(0.0);
    let overall = latency_score * 0.5 + jitter_score * 0.3 + packet_loss_score * 0.2;

    let suitable = latency < 100.0 && jitter < 30.0 && loss < 5.0 && mbps >= 3.0;

    let mut advice = Advice::new();
    if latency >= 100.0 {
        advice.push("High latency - not suitable for gaming");
    } else if latency >= 50.0 {
        advice.push("Acceptable latency - you may notice some delay");
    }
    if jitter >= 30.0 {
        advice.push("High jitter - the connection is unsteady for gaming");
    } else if jitter >= 20.0 {
        advice.push("Elevated jitter - you may notice instability");
    }
    if loss >= 5.0 {
        advice.push("High packet loss - expect connection problems");
    } else if loss >= 3.0 {
        advice.push("Elevated packet loss - there may be problems");
    }
    if mbps < 3.0 {
        advice.push("Low download speed - game updates may be slow");
    }
    if suitable && latency < 20.0 && jitter < 10.0 && loss < 1.0 {
        advice.push("Excellent connection for gaming!");
    } else if suitable {
        advice.push("Good connection for gaming");
    }

    let message = if suitable && latency < 20.0 {
        "Excellent for gaming - low latency and a steady connection"
    } else if suitable {
        "Suitable for gaming - acceptable latency"
    } else {
        "Not ideal for gaming - high latency or instability"
    };

    GamingVerdict {
        suitable,
        latency_score: to_score(latency_score),
        jitter_score: to_score(jitter_score),
        packet_loss_score: to_score(packet_loss_score),
        overall_score: to_score(overall),
        message: message.to_string(),
        recommendations: advice.into_vec(),
    }
}

pub fn evaluate_video_call(
    upload: &ThroughputResult,
    ping: &LatencyResult,
    quality: &QualityResult,
) -> VideoCallVerdict {
    let mbps = upload.throughput;
    let latency = ping.latency;
    let stability = quality.stability_score;

    let upload_score = (mbps / 1.5 * 100.0).min(100.0);
    let latency_score = (100.0 - latency / 200.0 * 100.0).max(0.0);
    let overall = upload_score * 0.4 + latency_score * 0.3 + f64::from(stability) * 0.3;

    let suitable = mbps >= 1.5 && latency < 100.0 && stability >= 70;

    let mut advice = Advice::new();
    if mbps < 0.5 {
        advice.push("Very low upload speed - video calls may not work");
    } else if mbps < 1.5 {
        advice.push("Low upload speed - at least 1.5 Mbps is recommended for HD video calls");
    }
    if latency >= 100.0 {
        advice.push("High latency - conversations may lag");
    }
    if stability < 70 {
        advice.push("Unstable connection - calls may drop");
    }
    if suitable {
        advice.push("Suitable for HD video calls");
    }

    let message = if suitable && mbps >= 2.0 && latency < 50.0 {
        "Excellent for video calls - high upload and low latency"
    } else if suitable {
        "Suitable for video calls"
    } else {
        "Not ideal for video calls - low upload or high latency"
    };

    VideoCallVerdict {
        suitable,
        upload_score: to_score(upload_score),
        latency_score: to_score(latency_score),
        stability_score: stability,
        overall_score: to_score(overall),
        message: message.to_string(),
        recommendations: advice.into_vec(),
    }
}

pub fn evaluate_all(
    ping: &LatencyResult,
    download: &ThroughputResult,
    upload: &ThroughputResult,
    quality: &QualityResult,
) -> ScenarioReport {
    ScenarioReport {
        streaming: evaluate_streaming(download, ping),
        gaming: evaluate_gaming(ping, download),
        video_call: evaluate_video_call(upload, ping, quality),
    }
}

impl Verdict for StreamingVerdict {
    fn title(&self) -> &'static str {
        "Streaming"
    }
    fn suitable(&self) -> bool {
        self.suitable
    }
    fn overall_score(&self) -> u8 {
        self.score
    }
    fn message(&self) -> &str {
        &self.message
    }
    fn recommendations(&self) -> &[String] {
        &self.recommendations
    }
}

impl Verdict for GamingVerdict {
    fn title(&self) -> &'static str {
        "Gaming"
    }
    fn suitable(&self) -> bool {
        self.suitable
    }
    fn overall_score(&self) -> u8 {
        self.overall_score
    }
    fn message(&self) -> &str {
        &self.message
    }
    fn recommendations(&self) -> &[String] {
        &self.recommendations
    }
}

impl Verdict for VideoCallVerdict {
    fn title(&self) -> &'static str {
        "Video calls"
    }
    fn suitable(&self) -> bool {
        self.suitable
    }
    fn overall_score(&self) -> u8 {
        self.overall_score
    }
    fn message(&self) -> &str {
        &self.message
    }
    fn recommendations(&self) -> &[String] {
        &self.recommendations
    }
}
