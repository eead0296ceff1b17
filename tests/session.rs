use serde_json::json;
use speedflux::speedtest::protocol::CLOSE_NORMAL;
use speedflux::speedtest::{
    MemoryConnector, Outbound, PeerHandle, Session, SessionConfig, SessionEvent, SessionState,
    SpeedTestError, TestPhase,
};
use std::time::Duration;
use tokio::sync::mpsc;

fn config() -> SessionConfig {
    SessionConfig {
        upload_chunk_size: 32 * 1024,
        upload_duration: Duration::from_secs(1),
        phase_pause: Duration::from_millis(10),
        ..SessionConfig::default()
    }
}

async fn answer_pings(mut peer: PeerHandle, count: u64) {
    for sequence in 0..count {
        peer.send_json(&json!({"type": "ping", "timestamp": 1_234_567_890_123u64, "sequence": sequence}))
            .await;
        match peer.recv().await {
            Some(Outbound::Text(pong)) => {
                assert!(pong.contains("1234567890123"), "{pong}");
            }
            other => panic!("expected pong, got {other:?}"),
        }
    }
    peer.send_json(&json!({
        "type": "result", "latency": 24.0, "jitter": 3.0, "packets": count,
        "packetLoss": 0.0, "minLatency": 20.0, "maxLatency": 31.0
    }))
    .await;
}

async fn stream_download(mut peer: PeerHandle) {
    match peer.recv().await {
        Some(Outbound::Text(start)) => assert!(start.contains("\"chunkSize\":262144"), "{start}"),
        other => panic!("expected start frame, got {other:?}"),
    }
    for _ in 0..4 {
        peer.send_binary(vec![7u8; 64 * 1024]).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
    }
    // No ttfb or samples: the client fills them in.
    peer.send_json(&json!({"type": "result", "throughput": 120.0, "bytes": 262144, "duration": 0.24}))
        .await;
}

#[tokio::test]
async fn session_against_scripted_server() {
    let (connector, mut peers) = MemoryConnector::new();
    let server = tokio::spawn(async move {
        let (phase, peer) = peers.recv().await.unwrap();
        assert_eq!(phase, TestPhase::Ping);
        answer_pings(peer, 5).await;

        let (phase, peer) = peers.recv().await.unwrap();
        assert_eq!(phase, TestPhase::Download);
        stream_download(peer).await;

        let (phase, mut peer) = peers.recv().await.unwrap();
        assert_eq!(phase, TestPhase::Upload);
        // Ask for bigger chunks straight away.
        peer.send_json(&json!({"type": "chunkSize", "chunkSize": 128 * 1024})).await;

        let mut sizes = Vec::new();
        loop {
            match peer.recv().await {
                Some(Outbound::Binary(chunk)) => sizes.push(chunk.len()),
                Some(Outbound::Text(text)) => {
                    assert_eq!(text, r#"{"type":"complete"}"#);
                    break;
                }
                other => panic!("unexpected upload frame {other:?}"),
            }
        }
        let bytes: usize = sizes.iter().sum();
        peer.send_json(&json!({
            "type": "result", "throughput": 9.5, "bytes": bytes, "duration": 1.0,
            "speedVariance": 0.25, "speedSamples": [9.0, 9.5, 10.0]
        }))
        .await;
        assert_eq!(peer.recv().await, Some(Outbound::Close(CLOSE_NORMAL)));
        sizes
    });

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = events_rx.recv().await {
            events.push(event);
        }
        events
    });
    let (_cancel_tx, cancel_rx) = mpsc::channel(1);

    let mut session = Session::new(connector, config());
    let report = session.run(events_tx, cancel_rx).await.unwrap();
    assert_eq!(session.state(), SessionState::Complete);

    let sizes = server.await.unwrap();
    // Chunks queued before the directive keep the old size.
    let mut resized = sizes.iter().skip_while(|&&s| s == 32 * 1024);
    assert!(resized.all(|&s| s == 128 * 1024), "{sizes:?}");
    assert_eq!(sizes.last(), Some(&(128 * 1024)));

    assert_eq!(report.ping.packets, 5);
    assert_eq!(report.ping.max_latency, Some(31.0));
    let ttfb = report.download.ttfb.unwrap();
    assert!(ttfb >= 0.0 && ttfb < 1_000.0, "ttfb {ttfb}");
    assert!(report.download.speed_samples.is_some());
    assert!(report.download.speed_variance.is_some());
    assert_eq!(report.upload_summary.map(|s| s.median), Some(9.5));

    let events = collector.await.unwrap();
    let ping_events = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Progress(p) if p.phase == TestPhase::Ping))
        .count();
    assert_eq!(ping_events, 5);
    assert!(matches!(events.last(), Some(SessionEvent::Finished(_))));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["ping"]["maxLatency"], 31.0);
    assert_eq!(json["upload"]["speedVariance"], 0.25);
}

#[tokio::test]
async fn cancelling_during_upload_stops_the_sender() {
    let (connector, mut peers) = MemoryConnector::new();
    let server = tokio::spawn(async move {
        let (_, peer) = peers.recv().await.unwrap();
        answer_pings(peer, 2).await;
        let (_, peer) = peers.recv().await.unwrap();
        stream_download(peer).await;

        let (_, mut peer) = peers.recv().await.unwrap();
        let mut chunks = 0;
        loop {
            match peer.recv().await {
                Some(Outbound::Binary(_)) => chunks += 1,
                Some(Outbound::Close(code)) => {
                    // Nothing may follow the close.
                    assert_eq!(peer.recv().await, None);
                    return (chunks, code);
                }
                other => panic!("unexpected upload frame {other:?}"),
            }
        }
    });

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let (cancel_tx, cancel_rx) = mpsc::channel(1);
    let watcher = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if matches!(&event, SessionEvent::Progress(p) if p.phase == TestPhase::Upload) {
                let _ = cancel_tx.send(()).await;
            }
        }
    });

    let mut session = Session::new(connector, config());
    let err = session.run(events_tx, cancel_rx).await.unwrap_err();
    assert!(matches!(err, SpeedTestError::Cancelled));
    assert_eq!(session.state(), SessionState::Idle);

    let (chunks, code) = server.await.unwrap();
    assert!(chunks > 0);
    assert_eq!(code, CLOSE_NORMAL);
    watcher.await.unwrap();
}

#[tokio::test]
async fn server_error_frame_fails_the_session() {
    let (connector, mut peers) = MemoryConnector::new();
    tokio::spawn(async move {
        let (_, peer) = peers.recv().await.unwrap();
        peer.send_json(&json!({"type": "error", "message": "too many clients"})).await;
        // Hold the connection open until the client gives up.
        let _ = peers.recv().await;
    });

    let (events_tx, _events_rx) = mpsc::channel(64);
    let (_cancel_tx, cancel_rx) = mpsc::channel(1);
    let mut session = Session::new(connector, config());
    let err = session.run(events_tx, cancel_rx).await.unwrap_err();
    assert!(matches!(err, SpeedTestError::Server(m) if m == "too many clients"));
    assert_eq!(session.state(), SessionState::Idle);
}
