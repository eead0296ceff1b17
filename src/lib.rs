//! Internet connection speed measurement: latency, download and upload
//! phases over WebSocket, plus stability scoring and per-use verdicts.

pub mod analysis;
pub mod settings;
pub mod speedtest;
