//! QR attendance sessions.
//!
//! A session accepts scans between creation and expiry. Expiry is never
//! stored — every read re-evaluates `now` against `expires_at`, so a
//! session that was never explicitly ended still turns terminal on its
//! own. `Ended` is the explicit administrative close and is one-way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Derived lifecycle state. `Expired` and `Ended` are terminal: no
/// further attendance events may attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
    Ended,
}

/// A QR attendance session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Owning subject / class.
    pub subject_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Minutes after creation within which a scan still counts as
    /// `present`.
    pub late_threshold_minutes: i64,
    pub allow_late_entry: bool,
    /// Maximum number of attendees, if bounded.
    pub capacity: Option<u32>,
    /// Set by the explicit administrative close.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Evaluate the lifecycle state at `now`.
    ///
    /// An explicit end wins over time-based expiry; both are terminal
    /// so the distinction only matters for caller messaging.
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.ended_at.is_some() {
            SessionState::Ended
        } else if now > self.expires_at {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    /// Whole minutes elapsed since the session opened.
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_minutes()
    }

    /// Whether a scan at `now` would be late, per the session's own
    /// threshold.
    pub fn is_late_at(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_minutes(now) > self.late_threshold_minutes
    }
}

// --- Token payloads ---

/// Decoded content of a scanned QR payload.
///
/// The wire format is JSON with a `type` tag, matching what the badge
/// and projector renderers emit. Session tokens carry a one-time secret
/// so a guessed session id alone cannot open the scan flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TokenPayload {
    /// Projected session token — phase one of the handshake.
    #[serde(rename = "attendance_session")]
    Session { session_id: Uuid, secret: String },
    /// Personal identity badge — phase two.
    #[serde(rename = "identity_badge")]
    Identity { identity_id: Uuid },
}

#[derive(Debug, Clone, Error)]
pub enum TokenError {
    #[error("malformed token payload: {0}")]
    Malformed(String),
}

/// Capability seam for turning a raw scanned payload into a token.
///
/// The engine only ever consumes decoded tokens; pixel-level QR
/// decoding belongs to an external collaborator behind this trait.
pub trait TokenDecoder: Send + Sync {
    fn decode(&self, raw: &str) -> Result<TokenPayload, TokenError>;
}

/// Decoder for the JSON wire format.
pub struct JsonTokenDecoder;

impl TokenDecoder for JsonTokenDecoder {
    fn decode(&self, raw: &str) -> Result<TokenPayload, TokenError> {
        serde_json::from_str(raw).map_err(|e| TokenError::Malformed(e.to_string()))
    }
}
