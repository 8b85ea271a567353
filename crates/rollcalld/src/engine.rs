//! Verification facade.
//!
//! Orchestrates both channels against the shared ledger: the face path
//! (gallery match → confidence classification → record) and the QR
//! path (two-phase token handshake → elapsed classification → record).
//! All clock reads are taken by the caller and passed in, so every
//! policy decision is reproducible in tests.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use rollcall_core::classify::{classify_biometric, classify_by_elapsed, BiometricBands};
use rollcall_core::error::VerificationError;
use rollcall_core::extractor::{ExtractError, FeatureExtractor};
use rollcall_core::matching::{BestSampleMatcher, MatchOutcome, Matcher};
use rollcall_core::session::{JsonTokenDecoder, Session, SessionState, TokenDecoder, TokenPayload};
use rollcall_core::store::{
    AttendanceStore, EventQuery, NewAttendanceEvent, NewSession, RecordOutcome, SessionStats,
};
use rollcall_core::types::{
    AttendanceEvent, Descriptor, EnrollmentSummary, Identity, VerificationMethod,
    MIN_ENROLLMENT_SAMPLES,
};

const SECRET_LEN: usize = 32;

/// Tunable cutoffs and defaults, sourced from daemon configuration.
#[derive(Debug, Clone, Copy)]
pub struct VerifyPolicy {
    pub match_threshold: f32,
    pub present_confidence: f32,
    pub min_descriptor_quality: f32,
    pub default_session_minutes: i64,
    pub default_late_threshold_minutes: i64,
}

impl VerifyPolicy {
    fn bands(&self) -> BiometricBands {
        BiometricBands {
            accept_threshold: self.match_threshold,
            present_confidence: self.present_confidence,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError<E: std::error::Error> {
    /// Expected domain refusal; callers branch on it for UX messaging.
    #[error(transparent)]
    Domain(#[from] VerificationError),
    /// Probe extraction failed before matching could start.
    #[error("feature extraction failed: {0}")]
    Extract(#[from] ExtractError),
    /// Infrastructure failure, propagated upward.
    #[error("store error: {0}")]
    Store(E),
}

/// Result of a verification request on either channel.
#[derive(Debug)]
pub enum VerifyOutcome {
    Recorded { identity: Identity, event: AttendanceEvent },
    AlreadyMarked { identity: Identity, existing: AttendanceEvent },
    /// Face path only: no gallery candidate cleared the threshold.
    NoMatch { best_score: f32 },
}

/// Session creation parameters, with policy defaults for the optional
/// fields.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionRequest {
    pub subject: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub late_threshold_minutes: Option<i64>,
    #[serde(default = "default_allow_late")]
    pub allow_late_entry: bool,
    #[serde(default)]
    pub capacity: Option<u32>,
}

fn default_allow_late() -> bool {
    true
}

/// A created session plus the token payload the projector renders as a
/// QR code. The secret inside the token exists only here and in the
/// caller's hands; the store keeps its digest.
#[derive(Debug)]
pub struct CreatedSession {
    pub session: Session,
    pub token: String,
}

pub struct Engine<S> {
    store: S,
    policy: VerifyPolicy,
    matcher: BestSampleMatcher,
    decoder: JsonTokenDecoder,
}

impl<S: AttendanceStore> Engine<S> {
    pub fn new(store: S, policy: VerifyPolicy) -> Self {
        Self {
            store,
            policy,
            matcher: BestSampleMatcher,
            decoder: JsonTokenDecoder,
        }
    }

    pub fn policy(&self) -> &VerifyPolicy {
        &self.policy
    }

    // ── Identities and enrollment ─────────────────────────────────────

    pub async fn register_identity(
        &self,
        display_name: &str,
        roll_code: &str,
    ) -> Result<Identity, EngineError<S::Error>> {
        let identity = self
            .store
            .add_identity(display_name, roll_code)
            .await
            .map_err(EngineError::Store)?;
        tracing::info!(identity = %identity.id, roll = roll_code, "identity registered");
        Ok(identity)
    }

    /// Enroll descriptor samples for an identity.
    ///
    /// Samples below the quality floor are dropped; at least
    /// [`MIN_ENROLLMENT_SAMPLES`] must survive or the whole request is
    /// refused — nothing is stored on refusal.
    pub async fn enroll(
        &self,
        identity_id: Uuid,
        descriptors: Vec<Descriptor>,
        replace: bool,
    ) -> Result<EnrollmentSummary, EngineError<S::Error>> {
        self.require_identity(identity_id).await?;

        let provided = descriptors.len();
        let accepted: Vec<Descriptor> = descriptors
            .into_iter()
            .filter(|d| d.quality >= self.policy.min_descriptor_quality)
            .collect();

        if accepted.len() < MIN_ENROLLMENT_SAMPLES {
            return Err(VerificationError::InsufficientSamples {
                provided,
                accepted: accepted.len(),
            }
            .into());
        }

        let enrolled = self
            .store
            .enroll_descriptors(identity_id, accepted, replace)
            .await
            .map_err(EngineError::Store)?;

        tracing::info!(
            identity = %identity_id,
            enrolled,
            rejected = provided - enrolled,
            replace,
            "descriptors enrolled"
        );

        Ok(EnrollmentSummary { enrolled, rejected_low_quality: provided - enrolled })
    }

    // ── Face path ─────────────────────────────────────────────────────

    /// Verify a probe descriptor against the whole gallery and record
    /// attendance for the best match.
    ///
    /// When a session is supplied the record transaction re-validates
    /// its liveness and capacity, same as a token scan.
    pub async fn verify_face(
        &self,
        probe: &Descriptor,
        subject: &str,
        session_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome, EngineError<S::Error>> {
        let gallery = self.store.gallery().await.map_err(EngineError::Store)?;

        let (identity_id, score) =
            match self.matcher.best_match(probe, &gallery, self.policy.match_threshold) {
                MatchOutcome::NoMatch { best_score } => {
                    tracing::debug!(subject, best_score, "no gallery match");
                    return Ok(VerifyOutcome::NoMatch { best_score });
                }
                MatchOutcome::Match { identity_id, score } => (identity_id, score),
            };

        // An accepted score always clears the accept threshold, so the
        // classifier cannot return None here.
        let status = classify_biometric(score, &self.policy.bands())
            .expect("accepted match score must classify");

        let outcome = self
            .store
            .record_event(NewAttendanceEvent {
                identity_id,
                subject_id: subject.to_owned(),
                session_id,
                recorded_at: now,
                method: VerificationMethod::Biometric,
                confidence: Some(score),
                status,
            })
            .await
            .map_err(EngineError::Store)?;

        self.finish_record(identity_id, outcome).await
    }

    /// Convenience wrapper: run an external extractor on raw image
    /// bytes, then verify the resulting probe.
    pub async fn verify_face_image(
        &self,
        extractor: &dyn FeatureExtractor,
        image: &[u8],
        subject: &str,
        session_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome, EngineError<S::Error>> {
        let probe = extractor.extract(image)?;
        self.verify_face(&probe, subject, session_id, now).await
    }

    // ── QR path ───────────────────────────────────────────────────────

    pub async fn create_session(
        &self,
        request: SessionRequest,
        now: DateTime<Utc>,
    ) -> Result<CreatedSession, EngineError<S::Error>> {
        let duration = request
            .duration_minutes
            .unwrap_or(self.policy.default_session_minutes);
        let late_threshold = request
            .late_threshold_minutes
            .unwrap_or(self.policy.default_late_threshold_minutes);

        let session_id = Uuid::new_v4();
        let mut secret_bytes = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut secret_bytes);
        let secret = hex::encode(secret_bytes);
        let secret_digest = hex::encode(Sha256::digest(secret.as_bytes()));

        let token = serde_json::to_string(&TokenPayload::Session { session_id, secret })
            .expect("token payload serializes");

        let session = self
            .store
            .create_session(NewSession {
                id: session_id,
                subject_id: request.subject,
                created_by: request.created_by.unwrap_or_else(|| "unknown".to_owned()),
                secret_digest,
                created_at: now,
                expires_at: now + Duration::minutes(duration),
                late_threshold_minutes: late_threshold,
                allow_late_entry: request.allow_late_entry,
                capacity: request.capacity,
            })
            .await
            .map_err(EngineError::Store)?;

        tracing::info!(
            session = %session.id,
            subject = %session.subject_id,
            expires_at = %session.expires_at,
            capacity = ?session.capacity,
            "session created"
        );

        Ok(CreatedSession { session, token })
    }

    /// Phase one: validate a scanned session token and return the
    /// session for the follow-up identity scan. Never writes.
    pub async fn scan_session_token(
        &self,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, EngineError<S::Error>> {
        let (session_id, secret) = match self.decode(raw)? {
            TokenPayload::Session { session_id, secret } => (session_id, secret),
            TokenPayload::Identity { .. } => {
                return Err(VerificationError::InvalidPayload(
                    "expected a session token, got an identity badge".into(),
                )
                .into())
            }
        };

        let session = self.require_live_session(session_id, now).await?;

        let stored_digest = self
            .store
            .session_secret_digest(session_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(VerificationError::SessionNotFound(session_id))?;
        if hex::encode(Sha256::digest(secret.as_bytes())) != stored_digest {
            return Err(
                VerificationError::InvalidPayload("session token secret mismatch".into()).into(),
            );
        }

        Ok(session)
    }

    /// Phase two, decoded form: validate liveness, capacity and
    /// lateness, then record through the ledger.
    pub async fn scan_identity_token(
        &self,
        session_id: Uuid,
        identity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome, EngineError<S::Error>> {
        self.require_identity(identity_id).await?;
        let session = self.require_live_session(session_id, now).await?;

        if session.is_late_at(now) && !session.allow_late_entry {
            return Err(VerificationError::LateEntryDisallowed(session_id).into());
        }

        let status =
            classify_by_elapsed(session.created_at, now, session.late_threshold_minutes);

        let outcome = self
            .store
            .record_event(NewAttendanceEvent {
                identity_id,
                subject_id: session.subject_id.clone(),
                session_id: Some(session_id),
                recorded_at: now,
                method: VerificationMethod::Token,
                confidence: None,
                status,
            })
            .await
            .map_err(EngineError::Store)?;

        self.finish_record(identity_id, outcome).await
    }

    /// Phase two, raw form: decode a scanned identity badge first.
    pub async fn scan_identity_payload(
        &self,
        session_id: Uuid,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome, EngineError<S::Error>> {
        let identity_id = match self.decode(raw)? {
            TokenPayload::Identity { identity_id } => identity_id,
            TokenPayload::Session { .. } => {
                return Err(VerificationError::InvalidPayload(
                    "expected an identity badge, got a session token".into(),
                )
                .into())
            }
        };
        self.scan_identity_token(session_id, identity_id, now).await
    }

    pub async fn end_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Session, EngineError<S::Error>> {
        let session = self
            .store
            .end_session(session_id, now)
            .await
            .map_err(EngineError::Store)?
            .ok_or(VerificationError::SessionNotFound(session_id))?;
        tracing::info!(session = %session_id, "session ended");
        Ok(session)
    }

    pub async fn active_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, EngineError<S::Error>> {
        self.store.active_sessions(now).await.map_err(EngineError::Store)
    }

    pub async fn session_stats(
        &self,
        session_id: Uuid,
    ) -> Result<SessionStats, EngineError<S::Error>> {
        self.store
            .session_stats(session_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or_else(|| VerificationError::SessionNotFound(session_id).into())
    }

    // ── Ledger reads and administration ───────────────────────────────

    pub async fn query_events(
        &self,
        query: &EventQuery,
    ) -> Result<Vec<AttendanceEvent>, EngineError<S::Error>> {
        self.store.query_events(query).await.map_err(EngineError::Store)
    }

    pub async fn purge_events(
        &self,
        query: &EventQuery,
    ) -> Result<usize, EngineError<S::Error>> {
        self.store.purge_events(query).await.map_err(EngineError::Store)
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn decode(&self, raw: &str) -> Result<TokenPayload, VerificationError> {
        self.decoder
            .decode(raw)
            .map_err(|e| VerificationError::InvalidPayload(e.to_string()))
    }

    async fn require_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Identity, EngineError<S::Error>> {
        self.store
            .get_identity(identity_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or_else(|| VerificationError::IdentityNotFound(identity_id).into())
    }

    async fn require_live_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Session, EngineError<S::Error>> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(VerificationError::SessionNotFound(session_id))?;

        match session.state(now) {
            SessionState::Active => Ok(session),
            SessionState::Expired => Err(VerificationError::SessionExpired(session_id).into()),
            SessionState::Ended => Err(VerificationError::SessionEnded(session_id).into()),
        }
    }

    /// Map a ledger outcome into a response, resolving the identity
    /// for caller display. A rejection out of the record transaction
    /// becomes a domain error like any pre-check refusal.
    async fn finish_record(
        &self,
        identity_id: Uuid,
        outcome: RecordOutcome,
    ) -> Result<VerifyOutcome, EngineError<S::Error>> {
        let identity = self.require_identity(identity_id).await?;
        match outcome {
            RecordOutcome::Recorded(event) => {
                tracing::info!(
                    identity = %identity.id,
                    subject = %event.subject_id,
                    status = event.status.as_str(),
                    method = event.method.as_str(),
                    "attendance recorded"
                );
                Ok(VerifyOutcome::Recorded { identity, event })
            }
            RecordOutcome::AlreadyMarked(existing) => {
                tracing::debug!(
                    identity = %identity.id,
                    subject = %existing.subject_id,
                    "duplicate attendance attempt"
                );
                Ok(VerifyOutcome::AlreadyMarked { identity, existing })
            }
            RecordOutcome::Rejected(reason) => Err(reason.into()),
        }
    }
}
