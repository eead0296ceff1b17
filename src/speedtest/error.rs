use super::TestPhase;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeedTestError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("connection closed unexpectedly: {}", format_code(*.code))]
    AbnormalClosure { code: Option<u16> },
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("server reported an error: {0}")]
    Server(String),
    #[error("{phase} phase timed out after {after:?} without a frame")]
    Timeout { phase: TestPhase, after: Duration },
    #[error("test cancelled")]
    Cancelled,
}

impl SpeedTestError {
    /// Transport errors and abnormal closures are handled identically.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::AbnormalClosure { .. })
    }
}

fn format_code(code: Option<u16>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "no close frame".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abnormal_closure_message_names_code() {
        let err = SpeedTestError::AbnormalClosure { code: Some(1006) };
        assert_eq!(err.to_string(), "connection closed unexpectedly: 1006");

        let err = SpeedTestError::AbnormalClosure { code: None };
        assert_eq!(err.to_string(), "connection closed unexpectedly: no close frame");
    }

    #[test]
    fn connection_failures_are_grouped() {
        assert!(SpeedTestError::Transport("reset".into()).is_connection_failure());
        assert!(SpeedTestError::AbnormalClosure { code: Some(1011) }.is_connection_failure());
        assert!(!SpeedTestError::Protocol("bad".into()).is_connection_failure());
        assert!(!SpeedTestError::Cancelled.is_connection_failure());
    }
}
