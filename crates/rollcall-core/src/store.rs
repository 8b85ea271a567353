//! The `AttendanceStore` trait and supporting types.
//!
//! The trait is implemented by storage backends (e.g.
//! `rollcall-store`). The daemon depends on this abstraction, not on
//! any concrete backend, so tests can run against an in-memory store.
//!
//! All methods return `Send` futures so the trait can be used in
//! multi-threaded async runtimes.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::VerificationError;
use crate::matching::GalleryEntry;
use crate::session::Session;
use crate::types::{
    AttendanceEvent, AttendanceStatus, Descriptor, Identity, VerificationMethod,
};

// --- Write inputs ---

/// Input for the ledger's atomic check-and-insert.
#[derive(Debug, Clone)]
pub struct NewAttendanceEvent {
    pub identity_id: Uuid,
    pub subject_id: String,
    pub session_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
    pub method: VerificationMethod,
    pub confidence: Option<f32>,
    pub status: AttendanceStatus,
}

impl NewAttendanceEvent {
    /// Calendar-day component of the dedup key, derived from the
    /// recording timestamp.
    pub fn day(&self) -> NaiveDate {
        self.recorded_at.date_naive()
    }
}

/// Input for session creation. The secret digest is computed by the
/// caller; the store never sees the raw token secret.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub subject_id: String,
    pub created_by: String,
    pub secret_digest: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub late_threshold_minutes: i64,
    pub allow_late_entry: bool,
    pub capacity: Option<u32>,
}

// --- Outcomes and read models ---

/// Result of the ledger's check-and-insert.
///
/// `AlreadyMarked` carries the existing event so callers can show
/// "already marked" instead of erroring hard. `Rejected` covers the
/// session-liveness and capacity refusals that must be decided inside
/// the same atomic unit as the insert.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Recorded(AttendanceEvent),
    AlreadyMarked(AttendanceEvent),
    Rejected(VerificationError),
}

/// Read filters for the ledger. All fields are conjunctive; `None`
/// means "any".
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub subject_id: Option<String>,
    pub day: Option<NaiveDate>,
    pub identity_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
}

/// Per-identity running projection, maintained in the same atomic unit
/// as each ledger insert.
#[derive(Debug, Clone)]
pub struct AttendanceSummary {
    pub identity_id: Uuid,
    pub events_recorded: u64,
    pub last_seen_at: DateTime<Utc>,
}

/// Aggregates for one session's ledger slice.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub total_attendees: u64,
    pub present_count: u64,
    pub late_count: u64,
    /// Mean minutes between session start and each scan.
    pub average_arrival_minutes: f64,
}

// --- Trait ---

/// Abstraction over a rollcall storage backend.
///
/// The two compare-and-insert hot spots — the (identity, subject, day)
/// dedup key and the session capacity counter — must be atomic in
/// `record_event`: two near-simultaneous calls may not both succeed.
/// Everything else is plain reads and inserts.
pub trait AttendanceStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    // -- Identities and descriptors --

    /// Register a new identity with an empty descriptor set.
    fn add_identity(
        &self,
        display_name: &str,
        roll_code: &str,
    ) -> impl Future<Output = Result<Identity, Self::Error>> + Send;

    fn get_identity(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Identity>, Self::Error>> + Send;

    /// Append descriptors to an identity's set, or replace the set
    /// when `replace` is passed. Returns the number stored.
    fn enroll_descriptors(
        &self,
        identity_id: Uuid,
        descriptors: Vec<Descriptor>,
        replace: bool,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

    /// Read-only descriptor lookup; an empty result means
    /// not-yet-enrolled, not an error.
    fn descriptors_for(
        &self,
        identity_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Descriptor>, Self::Error>> + Send;

    /// All identities eligible for matching: those with at least the
    /// minimum number of enrolled samples.
    fn gallery(&self)
        -> impl Future<Output = Result<Vec<GalleryEntry>, Self::Error>> + Send;

    // -- Ledger --

    /// Atomic check-and-insert keyed by (identity, subject, day).
    ///
    /// When the event references a session, the session's liveness and
    /// capacity are re-validated inside the same transaction.
    fn record_event(
        &self,
        new: NewAttendanceEvent,
    ) -> impl Future<Output = Result<RecordOutcome, Self::Error>> + Send;

    fn query_events(
        &self,
        query: &EventQuery,
    ) -> impl Future<Output = Result<Vec<AttendanceEvent>, Self::Error>> + Send;

    /// Administrative purge; the only way events are ever deleted.
    /// Returns the number removed.
    fn purge_events(
        &self,
        query: &EventQuery,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

    fn summary_for(
        &self,
        identity_id: Uuid,
    ) -> impl Future<Output = Result<Option<AttendanceSummary>, Self::Error>> + Send;

    // -- Sessions --

    fn create_session(
        &self,
        new: NewSession,
    ) -> impl Future<Output = Result<Session, Self::Error>> + Send;

    fn get_session(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Session>, Self::Error>> + Send;

    /// SHA-256 digest of the session's token secret, for phase-one
    /// scan verification. The raw secret is never stored.
    fn session_secret_digest(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Explicit administrative close. Idempotent: ending an already
    /// ended session keeps the original end timestamp. Returns the
    /// updated session, or `None` if it does not exist.
    fn end_session(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Session>, Self::Error>> + Send;

    /// Sessions that are neither ended nor past expiry at `now`.
    fn active_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Session>, Self::Error>> + Send;

    fn session_stats(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<SessionStats>, Self::Error>> + Send;
}
