//! Connection stability scoring.
//!
//! The score starts at 100 and loses points for packet loss, jitter, latency,
//! throughput instability and slow first byte. Each penalty is capped on its
//! own so that a single bad metric cannot zero the score by itself.

use super::stats::coefficient_of_variation;
use crate::speedtest::{LatencyResult, ThroughputResult};
use serde::Serialize;

const CHECK_LINK: &str = "Check your cable connection or Wi-Fi signal";
const NOT_FOR_REALTIME: &str = "Not suitable for gaming or real-time applications";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityResult {
    pub stability_score: u8,
    pub is_stable: bool,
    pub recommendations: Vec<String>,
}

/// Ordered advisory list that drops repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advice(Vec<String>);

impl Advice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, advice: &str) {
        if !self.0.iter().any(|existing| existing == advice) {
            self.0.push(advice.to_string());
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

/// Rounds and clamps a raw score into 0..=100.
pub fn to_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, 100.0).round() as u8
}

fn cv_penalty(result: &ThroughputResult) -> Option<(f64, f64)> {
    let variance = result.speed_variance?;
    let cv = coefficient_of_variation(variance, result.throughput)?;
    (cv > 20.0).then(|| (cv, ((cv - 20.0) / 10.0 * 2.0).min(15.0)))
}

pub fn score_quality(
    ping: &LatencyResult,
    download: &ThroughputResult,
    upload: &ThroughputResult,
) -> QualityResult {
    let mut advice = Advice::new();
    let mut score = 100.0;
    let loss = ping.packet_loss;

    if let Some(loss) = loss.filter(|&l| l > 0.0) {
        score -= (loss * 5.0).min(50.0);
        if loss > 5.0 {
            advice.push("High packet loss");
            advice.push(CHECK_LINK);
        } else if loss > 1.0 {
            advice.push("Some packets are being lost - stability may suffer");
        }
    }

    if ping.jitter > 20.0 {
        score -= ((ping.jitter - 20.0) / 10.0 * 2.0).min(20.0);
        if ping.jitter > 50.0 {
            advice.push("High jitter");
            advice.push(NOT_FOR_REALTIME);
        } else {
            advice.push("Elevated jitter - you may notice lag while gaming");
        }
    }

    if ping.latency > 100.0 {
        score -= ((ping.latency - 100.0) / 10.0).min(20.0);
        if ping.latency > 200.0 {
            advice.push("High latency");
            advice.push(NOT_FOR_REALTIME);
        }
    }

    if let Some((_, penalty)) = cv_penalty(download) {
        score -= penalty;
        advice.push("Unstable download speed");
        advice.push(CHECK_LINK);
    }

    if let Some((_, penalty)) = cv_penalty(upload) {
        score -= penalty;
        advice.push("Unstable upload speed - the router may be struggling");
    }

    if let Some(ttfb) = download.ttfb.filter(|&t| t > 500.0) {
        score -= ((ttfb - 500.0) / 100.0 * 2.0).min(10.0);
        advice.push("Slow time to first byte - the server may be distant or overloaded");
    }

    if ping.latency < 20.0 && ping.jitter < 10.0 && loss.map_or(true, |l| l < 0.5) {
        score += 5.0;
    }

    let stability_score = to_score(score);
    // Stability is judged on the unrounded score.
    let is_stable = score.clamp(0.0, 100.0) >= 70.0
        && loss.map_or(true, |l| l < 2.0)
        && ping.jitter < 30.0;

    if is_stable && ping.latency < 30.0 {
        advice.push("Excellent connection - suitable for gaming, streaming and video calls");
    } else if is_stable {
        advice.push("Stable connection - suitable for most applications");
    }

    if download.throughput >= 25.0 {
        advice.push("4K-capable for streaming");
    } else if download.throughput >= 5.0 {
        advice.push("HD-capable for streaming");
    } else if download.throughput < 3.0 {
        advice.push("Download speed is low for streaming");
    }

    if ping.latency < 20.0 && ping.jitter < 10.0 && loss.map_or(true, |l| l < 1.0) {
        advice.push("Excellent for gaming - low latency and a steady connection");
    } else if ping.latency < 50.0 && ping.jitter < 20.0 {
        advice.push("Good for gaming - acceptable latency");
    } else {
        advice.push("Not ideal for gaming - high latency or instability");
    }

    if upload.throughput >= 1.5 && ping.latency < 100.0 && ping.jitter < 30.0 {
        advice.push("Suitable for video calls");
    } else if upload.throughput < 1.0 {
        advice.push("Upload speed is low for video calls");
    }

    QualityResult {
        stability_score,
        is_stable,
        recommendations: advice.into_vec(),
    }
}
