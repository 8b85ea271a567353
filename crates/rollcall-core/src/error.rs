//! Domain outcome taxonomy.
//!
//! Everything here is an *expected* verification outcome that callers
//! branch on to drive user feedback. Infrastructure failures live in
//! the store implementation's own error type and are propagated
//! separately.

use thiserror::Error;
use uuid::Uuid;

use crate::types::MIN_ENROLLMENT_SAMPLES;

/// A verification request that was refused for a domain reason.
///
/// None of these are retried automatically; the caller decides whether
/// to re-scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error(
        "need at least {MIN_ENROLLMENT_SAMPLES} usable samples, got {accepted} usable of {provided}"
    )]
    InsufficientSamples { provided: usize, accepted: usize },

    #[error("identity not found: {0}")]
    IdentityNotFound(Uuid),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("session {0} has expired")]
    SessionExpired(Uuid),

    #[error("session {0} has ended")]
    SessionEnded(Uuid),

    #[error("session {0} is at capacity")]
    CapacityExceeded(Uuid),

    #[error("late entry is disallowed for session {0}")]
    LateEntryDisallowed(Uuid),

    #[error("invalid token payload: {0}")]
    InvalidPayload(String),
}

impl VerificationError {
    /// Stable wire code for response DTOs.
    pub fn code(&self) -> &'static str {
        match self {
            VerificationError::InsufficientSamples { .. } => "insufficient_samples",
            VerificationError::IdentityNotFound(_) => "identity_not_found",
            VerificationError::SessionNotFound(_) => "session_not_found",
            VerificationError::SessionExpired(_) => "session_expired",
            VerificationError::SessionEnded(_) => "session_ended",
            VerificationError::CapacityExceeded(_) => "capacity_exceeded",
            VerificationError::LateEntryDisallowed(_) => "late_entry_disallowed",
            VerificationError::InvalidPayload(_) => "invalid_payload",
        }
    }
}
