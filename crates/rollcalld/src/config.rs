use std::path::PathBuf;

use crate::engine::VerifyPolicy;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the descriptor encryption key file.
    pub key_path: PathBuf,
    /// Cosine similarity a probe must strictly exceed to match.
    pub match_threshold: f32,
    /// Scores above this are confidently present; between the match
    /// threshold and this band a match is flagged late for review.
    pub present_confidence: f32,
    /// Minimum capture quality for an enrolled sample to be kept.
    pub min_descriptor_quality: f32,
    /// Session duration when a creation request does not specify one.
    pub default_session_minutes: i64,
    /// Late threshold when a creation request does not specify one.
    pub default_late_threshold_minutes: i64,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let key_path = std::env::var("ROLLCALL_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("descriptor.key"));

        Self {
            db_path,
            key_path,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", 0.75),
            present_confidence: env_f32("ROLLCALL_PRESENT_CONFIDENCE", 0.80),
            min_descriptor_quality: env_f32("ROLLCALL_MIN_DESCRIPTOR_QUALITY", 0.6),
            default_session_minutes: env_i64("ROLLCALL_DEFAULT_SESSION_MINUTES", 60),
            default_late_threshold_minutes: env_i64(
                "ROLLCALL_DEFAULT_LATE_THRESHOLD_MINUTES",
                10,
            ),
        }
    }

    pub fn policy(&self) -> VerifyPolicy {
        VerifyPolicy {
            match_threshold: self.match_threshold,
            present_confidence: self.present_confidence,
            min_descriptor_quality: self.min_descriptor_quality,
            default_session_minutes: self.default_session_minutes,
            default_late_threshold_minutes: self.default_late_threshold_minutes,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
