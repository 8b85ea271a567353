//! Confidence-to-status classification.
//!
//! The biometric path classifies by match score; the QR path has no
//! score and classifies by elapsed time since session start. Both
//! cutoffs are policy, supplied by configuration.

use chrono::{DateTime, Utc};

use crate::types::AttendanceStatus;

/// Score cutoffs for the biometric path.
#[derive(Debug, Clone, Copy)]
pub struct BiometricBands {
    /// Minimum score for any acceptance. At or below this the probe is
    /// a non-match.
    pub accept_threshold: f32,
    /// Scores above this are confidently present; scores between the
    /// accept threshold and this band are flagged `late` for manual
    /// review.
    pub present_confidence: f32,
}

/// Map a match score to a status.
///
/// Returns `None` when the score does not clear the accept threshold —
/// the caller must treat that as a non-match, not record an event.
pub fn classify_biometric(score: f32, bands: &BiometricBands) -> Option<AttendanceStatus> {
    if score <= bands.accept_threshold {
        return None;
    }
    if score > bands.present_confidence {
        Some(AttendanceStatus::Present)
    } else {
        Some(AttendanceStatus::Late)
    }
}

/// Classify a token scan by arrival time relative to session start.
pub fn classify_by_elapsed(
    started_at: DateTime<Utc>,
    scanned_at: DateTime<Utc>,
    late_threshold_minutes: i64,
) -> AttendanceStatus {
    let elapsed = (scanned_at - started_at).num_minutes();
    if elapsed <= late_threshold_minutes {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Late
    }
}
