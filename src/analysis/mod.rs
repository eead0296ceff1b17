pub mod quality;
pub mod scenarios;
pub mod stats;

pub use quality::{score_quality, QualityResult};
pub use scenarios::{
    evaluate_all, evaluate_gaming, evaluate_streaming, evaluate_video_call, GamingVerdict,
    Resolution, ScenarioReport, StreamingVerdict, Verdict, VideoCallVerdict,
};
pub use stats::{summarize, Summary};
