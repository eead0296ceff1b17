use crate::speedtest::SessionConfig;
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_SERVER: &str = "ws://localhost:3001";

const MAX_SPEED_STEP: u32 = 50;
const MAX_SPEED_RANGE: (u32, u32) = (10, 10_000);
const UPLOAD_SECS_RANGE: (u64, u64) = (3, 30);
const IDLE_TIMEOUT_STEP: u64 = 5;
const IDLE_TIMEOUT_RANGE: (u64, u64) = (5, 120);

/// Which scenario verdict the results screen puts first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestMode {
    #[default]
    Standard,
    Streaming,
    Gaming,
    VideoCall,
}

impl TestMode {
    pub fn next(self) -> Self {
        match self {
            TestMode::Standard => TestMode::Streaming,
            TestMode::Streaming => TestMode::Gaming,
            TestMode::Gaming => TestMode::VideoCall,
            TestMode::VideoCall => TestMode::Standard,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            TestMode::Standard => TestMode::VideoCall,
            TestMode::Streaming => TestMode::Standard,
            TestMode::Gaming => TestMode::Streaming,
            TestMode::VideoCall => TestMode::Gaming,
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestMode::Standard => "Standard",
            TestMode::Streaming => "Streaming",
            TestMode::Gaming => "Gaming",
            TestMode::VideoCall => "Video call",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub max_speed_mbps: u32,
    pub upload_secs: u64,
    pub idle_timeout_secs: u64,
    pub mode: TestMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER.to_string(),
            max_speed_mbps: 1000,
            upload_secs: 10,
            idle_timeout_secs: 15,
            mode: TestMode::Standard,
        }
    }
}

impl Settings {
    /// Pulls every numeric field back into its allowed range.
    pub fn clamped(mut self) -> Self {
        self.max_speed_mbps = self.max_speed_mbps.clamp(MAX_SPEED_RANGE.0, MAX_SPEED_RANGE.1);
        self.upload_secs = self.upload_secs.clamp(UPLOAD_SECS_RANGE.0, UPLOAD_SECS_RANGE.1);
        self.idle_timeout_secs = self
            .idle_timeout_secs
            .clamp(IDLE_TIMEOUT_RANGE.0, IDLE_TIMEOUT_RANGE.1);
        self
    }

    pub fn increase(&mut self, field: SettingsField) {
        match field {
            SettingsField::MaxSpeed => {
                self.max_speed_mbps = (self.max_speed_mbps + MAX_SPEED_STEP).min(MAX_SPEED_RANGE.1);
            }
            SettingsField::UploadDuration => {
                self.upload_secs = (self.upload_secs + 1).min(UPLOAD_SECS_RANGE.1);
            }
            SettingsField::IdleTimeout => {
                self.idle_timeout_secs =
                    (self.idle_timeout_secs + IDLE_TIMEOUT_STEP).min(IDLE_TIMEOUT_RANGE.1);
            }
            SettingsField::Mode => self.mode = self.mode.next(),
        }
    }

    pub fn decrease(&mut self, field: SettingsField) {
        match field {
            SettingsField::MaxSpeed => {
                self.max_speed_mbps = self
                    .max_speed_mbps
                    .saturating_sub(MAX_SPEED_STEP)
                    .max(MAX_SPEED_RANGE.0);
            }
            SettingsField::UploadDuration => {
                self.upload_secs = self.upload_secs.saturating_sub(1).max(UPLOAD_SECS_RANGE.0);
            }
            SettingsField::IdleTimeout => {
                self.idle_timeout_secs = self
                    .idle_timeout_secs
                    .saturating_sub(IDLE_TIMEOUT_STEP)
                    .max(IDLE_TIMEOUT_RANGE.0);
            }
            SettingsField::Mode => self.mode = self.mode.prev(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_speed_mbps: f64::from(self.max_speed_mbps),
            upload_duration: Duration::from_secs(self.upload_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            ..SessionConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    MaxSpeed,
    UploadDuration,
    IdleTimeout,
    Mode,
}

impl SettingsField {
    pub const ALL: [SettingsField; 4] = [
        SettingsField::MaxSpeed,
        SettingsField::UploadDuration,
        SettingsField::IdleTimeout,
        SettingsField::Mode,
    ];

    pub fn next(self) -> Self {
        match self {
            SettingsField::MaxSpeed => SettingsField::UploadDuration,
            SettingsField::UploadDuration => SettingsField::IdleTimeout,
            SettingsField::IdleTimeout => SettingsField::Mode,
            SettingsField::Mode => SettingsField::MaxSpeed,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            SettingsField::MaxSpeed => SettingsField::Mode,
            SettingsField::UploadDuration => SettingsField::MaxSpeed,
            SettingsField::IdleTimeout => SettingsField::UploadDuration,
            SettingsField::Mode => SettingsField::IdleTimeout,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SettingsField::MaxSpeed => "Max Speed",
            SettingsField::UploadDuration => "Upload Duration",
            SettingsField::IdleTimeout => "Idle Timeout",
            SettingsField::Mode => "Test Mode",
        }
    }

    pub fn value(self, settings: &Settings) -> String {
        match self {
            SettingsField::MaxSpeed => format!("{} Mbps", settings.max_speed_mbps),
            SettingsField::UploadDuration => format!("{} s", settings.upload_secs),
            SettingsField::IdleTimeout => format!("{} s", settings.idle_timeout_secs),
            SettingsField::Mode => settings.mode.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjusters_stop_at_bounds() {
        let mut settings = Settings {
            max_speed_mbps: 9_990,
            upload_secs: 3,
            ..Settings::default()
        };
        settings.increase(SettingsField::MaxSpeed);
        assert_eq!(settings.max_speed_mbps, 10_000);
        settings.decrease(SettingsField::UploadDuration);
        assert_eq!(settings.upload_secs, 3);

        settings.max_speed_mbps = 40;
        settings.decrease(SettingsField::MaxSpeed);
        assert_eq!(settings.max_speed_mbps, 10);
    }

    #[test]
    fn mode_cycles_both_ways() {
        let mut settings = Settings::default();
        for _ in 0..4 {
            settings.increase(SettingsField::Mode);
        }
        assert_eq!(settings.mode, TestMode::Standard);
        settings.decrease(SettingsField::Mode);
        assert_eq!(settings.mode, TestMode::VideoCall);
    }

    #[test]
    fn field_navigation_wraps() {
        for field in SettingsField::ALL {
            assert_eq!(field.next().prev(), field);
        }
        assert_eq!(SettingsField::Mode.next(), SettingsField::MaxSpeed);
    }

    #[test]
    fn session_config_carries_user_values() {
        let config = Settings {
            max_speed_mbps: 300,
            upload_secs: 5,
            idle_timeout_secs: 20,
            ..Settings::default()
        }
        .session_config();
        assert_eq!(config.max_speed_mbps, 300.0);
        assert_eq!(config.upload_duration, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(20));
        assert_eq!(config.phase_pause, Duration::from_millis(500));
    }

    #[test]
    fn clamped_pulls_values_into_range() {
        let settings = Settings {
            max_speed_mbps: 0,
            upload_secs: 600,
            idle_timeout_secs: 1,
            ..Settings::default()
        }
        .clamped();
        assert_eq!(settings.max_speed_mbps, 10);
        assert_eq!(settings.upload_secs, 30);
        assert_eq!(settings.idle_timeout_secs, 5);
    }
}
