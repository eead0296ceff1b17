use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use speedflux::analysis::{
    evaluate_all, evaluate_streaming, score_quality, stats, Resolution, Verdict,
};
use speedflux::speedtest::{LatencyResult, SessionReport, ThroughputResult};

fn ping(latency: f64, jitter: f64, packet_loss: Option<f64>) -> LatencyResult {
    LatencyResult {
        latency,
        jitter,
        packets: 20,
        packet_loss,
        ..LatencyResult::default()
    }
}

#[test]
fn fast_clean_connection() {
    let ping = ping(15.0, 5.0, Some(0.0));
    let download = ThroughputResult {
        throughput: 80.0,
        speed_variance: Some(4.0),
        ttfb: Some(120.0),
        ..ThroughputResult::default()
    };
    let upload = ThroughputResult {
        throughput: 20.0,
        speed_variance: Some(1.0),
        ..ThroughputResult::default()
    };

    let report = SessionReport::new(ping, download, upload);
    assert!(report.quality.is_stable);
    assert!(report.quality.stability_score >= 95);
    assert_eq!(report.scenarios.streaming.recommended_quality, Resolution::Uhd4k);
    assert!(report.scenarios.gaming.suitable);
    assert!(report.scenarios.video_call.suitable);
}

#[test]
fn slow_lossy_connection() {
    let report = SessionReport::new(
        ping(150.0, 40.0, Some(3.0)),
        ThroughputResult::with_throughput(4.0),
        ThroughputResult::with_throughput(0.8),
    );
    assert!(!report.quality.is_stable);
    assert!(!report.scenarios.gaming.suitable);
    assert!(!report.scenarios.video_call.suitable);
    assert_eq!(report.scenarios.streaming.recommended_quality, Resolution::P480);
}

#[test]
fn hd_streaming_latency_boundary() {
    let download = ThroughputResult::with_throughput(25.0);
    let verdict = evaluate_streaming(&download, &ping(99.0, 5.0, None));
    assert!(verdict.can_stream_1080p);
    assert!(!verdict.can_stream_4k);
    assert_eq!(verdict.recommended_quality, Resolution::P1080);
}

#[test]
fn scenario_scores_stay_in_range() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..2_000 {
        let ping = ping(
            rng.gen_range(0.0..1_000.0),
            rng.gen_range(0.0..200.0),
            Some(rng.gen_range(0.0..=100.0)),
        );
        let download = ThroughputResult::with_throughput(rng.gen_range(0.0..2_000.0));
        let upload = ThroughputResult::with_throughput(rng.gen_range(0.0..500.0));
        let quality = score_quality(&ping, &download, &upload);
        let scenarios = evaluate_all(&ping, &download, &upload, &quality);

        for verdict in scenarios.verdicts() {
            assert!(verdict.overall_score() <= 100, "{}", verdict.title());
            assert!(!verdict.message().is_empty());
        }
        assert!(scenarios.gaming.latency_score <= 100);
        assert!(scenarios.video_call.upload_score <= 100);
        assert_eq!(scenarios.video_call.stability_score, quality.stability_score);
    }
}

#[test]
fn smoothing_download_samples_settles() {
    let samples = vec![42.0, 95.0, 61.0, 88.0, 30.0, 77.0, 52.0, 90.0, 48.0];
    let once = stats::smooth(&samples);
    let twice = stats::smooth(&once);

    assert_eq!(twice.first(), samples.first());
    assert_eq!(twice.last(), samples.last());

    let spread = |v: &[f64]| stats::max(v) - stats::min(v);
    assert!(spread(&twice) <= spread(&once));
    assert!(spread(&once) <= spread(&samples));
}
