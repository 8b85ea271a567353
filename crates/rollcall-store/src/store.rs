//! [`SqliteStore`] — the SQLite implementation of [`AttendanceStore`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use rollcall_core::error::VerificationError;
use rollcall_core::matching::GalleryEntry;
use rollcall_core::session::Session;
use rollcall_core::store::{
    AttendanceStore, AttendanceSummary, EventQuery, NewAttendanceEvent, NewSession,
    RecordOutcome, SessionStats,
};
use rollcall_core::types::{AttendanceEvent, Descriptor, Identity, MIN_ENROLLMENT_SAMPLES};

use crate::crypto::DescriptorCipher;
use crate::encode::{
    encode_day, encode_dt, encode_uuid, parse_dt, parse_uuid, RawEvent, RawIdentity, RawSession,
};
use crate::error::{Error, Result};
use crate::schema::SCHEMA;

/// Result of the check-and-insert transaction, before raw rows are
/// decoded back into domain types.
enum TxOutcome {
    Inserted,
    Already(RawEvent),
    Rejected(VerificationError),
}

/// A rollcall store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted, and
/// all calls serialize through its worker thread. That serialization
/// plus per-call transactions is what makes `record_event` atomic.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
    cipher: Arc<DescriptorCipher>,
}

impl SqliteStore {
    /// Open (or create) a store at `path` and run schema initialisation.
    pub async fn open(path: impl AsRef<Path>, cipher: DescriptorCipher) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn, cipher: Arc::new(cipher) };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store with an ephemeral cipher — useful for
    /// testing.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn, cipher: Arc::new(DescriptorCipher::ephemeral()) };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Build a WHERE clause and positional string params from a query's
/// set filters.
fn event_filter(query: &EventQuery) -> (String, Vec<String>) {
    let mut conds: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();

    if let Some(subject) = &query.subject_id {
        params.push(subject.clone());
        conds.push(format!("subject_id = ?{}", params.len()));
    }
    if let Some(day) = query.day {
        params.push(encode_day(day));
        conds.push(format!("day = ?{}", params.len()));
    }
    if let Some(identity) = query.identity_id {
        params.push(encode_uuid(identity));
        conds.push(format!("identity_id = ?{}", params.len()));
    }
    if let Some(session) = query.session_id {
        params.push(encode_uuid(session));
        conds.push(format!("session_id = ?{}", params.len()));
    }

    let clause = if conds.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conds.join(" AND "))
    };
    (clause, params)
}

const EVENT_COLUMNS: &str =
    "event_id, identity_id, subject_id, session_id, day, recorded_at, method, confidence, status";

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        event_id: row.get(0)?,
        identity_id: row.get(1)?,
        subject_id: row.get(2)?,
        session_id: row.get(3)?,
        day: row.get(4)?,
        recorded_at: row.get(5)?,
        method: row.get(6)?,
        confidence: row.get(7)?,
        status: row.get(8)?,
    })
}

const SESSION_COLUMNS: &str = "session_id, subject_id, created_by, created_at, expires_at, \
     late_threshold_minutes, allow_late_entry, capacity, ended_at";

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSession> {
    Ok(RawSession {
        session_id: row.get(0)?,
        subject_id: row.get(1)?,
        created_by: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        late_threshold_minutes: row.get(5)?,
        allow_late_entry: row.get(6)?,
        capacity: row.get(7)?,
        ended_at: row.get(8)?,
    })
}

impl AttendanceStore for SqliteStore {
    type Error = Error;

    // ── Identities and descriptors ────────────────────────────────────

    async fn add_identity(&self, display_name: &str, roll_code: &str) -> Result<Identity> {
        let identity = Identity {
            id: Uuid::new_v4(),
            display_name: display_name.to_owned(),
            roll_code: roll_code.to_owned(),
            enrolled_at: Utc::now(),
        };

        let id_str = encode_uuid(identity.id);
        let name = identity.display_name.clone();
        let roll = identity.roll_code.clone();
        let at_str = encode_dt(identity.enrolled_at);

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (identity_id, display_name, roll_code, enrolled_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id_str, name, roll, at_str],
                )?;
                Ok(())
            })
            .await?;

        Ok(identity)
    }

    async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>> {
        let id_str = encode_uuid(id);

        let raw: Option<RawIdentity> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT identity_id, display_name, roll_code, enrolled_at
                         FROM identities WHERE identity_id = ?1",
                        rusqlite::params![id_str],
                        |row| {
                            Ok(RawIdentity {
                                identity_id: row.get(0)?,
                                display_name: row.get(1)?,
                                roll_code: row.get(2)?,
                                enrolled_at: row.get(3)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?;

        raw.map(RawIdentity::into_identity).transpose()
    }

    async fn enroll_descriptors(
        &self,
        identity_id: Uuid,
        descriptors: Vec<Descriptor>,
        replace: bool,
    ) -> Result<usize> {
        let id_str = encode_uuid(identity_id);
        let now_str = encode_dt(Utc::now());

        // Seal outside the connection thread; the cipher never crosses it.
        let mut rows: Vec<(String, Vec<u8>, f64)> = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let blob = self.cipher.seal(&serde_json::to_vec(descriptor)?)?;
            rows.push((encode_uuid(Uuid::new_v4()), blob, f64::from(descriptor.quality)));
        }
        let count = rows.len();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if replace {
                    tx.execute(
                        "DELETE FROM descriptors WHERE identity_id = ?1",
                        rusqlite::params![id_str],
                    )?;
                }
                for (descriptor_id, blob, quality) in rows {
                    tx.execute(
                        "INSERT INTO descriptors
                             (descriptor_id, identity_id, sample, quality, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![descriptor_id, id_str, blob, quality, now_str],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        Ok(count)
    }

    async fn descriptors_for(&self, identity_id: Uuid) -> Result<Vec<Descriptor>> {
        let id_str = encode_uuid(identity_id);

        let blobs: Vec<Vec<u8>> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT sample FROM descriptors WHERE identity_id = ?1 ORDER BY created_at",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id_str], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        blobs
            .into_iter()
            .map(|blob| Ok(serde_json::from_slice(&self.cipher.open(&blob)?)?))
            .collect()
    }

    async fn gallery(&self) -> Result<Vec<GalleryEntry>> {
        let rows: Vec<(String, Vec<u8>)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT identity_id, sample FROM descriptors ORDER BY identity_id, created_at",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut by_identity: HashMap<String, Vec<Descriptor>> = HashMap::new();
        for (identity_id, blob) in rows {
            let descriptor: Descriptor = serde_json::from_slice(&self.cipher.open(&blob)?)?;
            by_identity.entry(identity_id).or_default().push(descriptor);
        }

        // Below the minimum sample count an identity is not yet
        // eligible for matching.
        by_identity
            .into_iter()
            .filter(|(_, samples)| samples.len() >= MIN_ENROLLMENT_SAMPLES)
            .map(|(identity_id, samples)| {
                Ok(GalleryEntry { identity_id: parse_uuid(&identity_id)?, samples })
            })
            .collect()
    }

    // ── Ledger ────────────────────────────────────────────────────────

    async fn record_event(&self, new: NewAttendanceEvent) -> Result<RecordOutcome> {
        let event = AttendanceEvent {
            id: Uuid::new_v4(),
            identity_id: new.identity_id,
            subject_id: new.subject_id.clone(),
            session_id: new.session_id,
            day: new.day(),
            recorded_at: new.recorded_at,
            method: new.method,
            confidence: new.confidence,
            status: new.status,
        };

        let event_id = encode_uuid(event.id);
        let identity_id = encode_uuid(event.identity_id);
        let subject_id = event.subject_id.clone();
        let session_id = event.session_id.map(encode_uuid);
        let session_uuid = event.session_id;
        let day = encode_day(event.day);
        let now_str = encode_dt(event.recorded_at);
        let method = event.method.as_str();
        let confidence = event.confidence.map(f64::from);
        let status = event.status.as_str();

        let outcome: TxOutcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                // Dedup first: a repeat scan must surface the existing
                // event even when the session is meanwhile full.
                let existing: Option<RawEvent> = tx
                    .query_row(
                        &format!(
                            "SELECT {EVENT_COLUMNS} FROM attendance_events
                             WHERE identity_id = ?1 AND subject_id = ?2 AND day = ?3"
                        ),
                        rusqlite::params![identity_id, subject_id, day],
                        event_from_row,
                    )
                    .optional()?;

                if let Some(existing) = existing {
                    return Ok(TxOutcome::Already(existing));
                }

                // Liveness and capacity are re-validated here, inside
                // the same transaction as the insert.
                if let (Some(sid), Some(sid_uuid)) = (&session_id, session_uuid) {
                    let session: Option<(String, Option<String>, Option<u32>)> = tx
                        .query_row(
                            "SELECT expires_at, ended_at, capacity
                             FROM sessions WHERE session_id = ?1",
                            rusqlite::params![sid],
                            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                        )
                        .optional()?;

                    let (expires_at, ended_at, capacity) = match session {
                        None => {
                            return Ok(TxOutcome::Rejected(VerificationError::SessionNotFound(
                                sid_uuid,
                            )))
                        }
                        Some(row) => row,
                    };

                    if ended_at.is_some() {
                        return Ok(TxOutcome::Rejected(VerificationError::SessionEnded(sid_uuid)));
                    }
                    // Fixed-width RFC 3339 strings compare like instants.
                    if now_str.as_str() > expires_at.as_str() {
                        return Ok(TxOutcome::Rejected(VerificationError::SessionExpired(
                            sid_uuid,
                        )));
                    }
                    if let Some(capacity) = capacity {
                        let attendees: u32 = tx.query_row(
                            "SELECT COUNT(*) FROM attendance_events WHERE session_id = ?1",
                            rusqlite::params![sid],
                            |row| row.get(0),
                        )?;
                        if attendees >= capacity {
                            return Ok(TxOutcome::Rejected(VerificationError::CapacityExceeded(
                                sid_uuid,
                            )));
                        }
                    }
                }

                tx.execute(
                    "INSERT INTO attendance_events
                         (event_id, identity_id, subject_id, session_id, day,
                          recorded_at, method, confidence, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        event_id,
                        identity_id,
                        subject_id,
                        session_id,
                        day,
                        now_str,
                        method,
                        confidence,
                        status,
                    ],
                )?;

                tx.execute(
                    "INSERT INTO attendance_summary (identity_id, events_recorded, last_seen_at)
                     VALUES (?1, 1, ?2)
                     ON CONFLICT(identity_id) DO UPDATE SET
                         events_recorded = events_recorded + 1,
                         last_seen_at = excluded.last_seen_at",
                    rusqlite::params![identity_id, now_str],
                )?;

                tx.commit()?;
                Ok(TxOutcome::Inserted)
            })
            .await?;

        match outcome {
            TxOutcome::Inserted => Ok(RecordOutcome::Recorded(event)),
            TxOutcome::Already(raw) => Ok(RecordOutcome::AlreadyMarked(raw.into_event()?)),
            TxOutcome::Rejected(reason) => Ok(RecordOutcome::Rejected(reason)),
        }
    }

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<AttendanceEvent>> {
        let (clause, params) = event_filter(query);

        let raws: Vec<RawEvent> = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {EVENT_COLUMNS} FROM attendance_events {clause} ORDER BY recorded_at"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), event_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        raws.into_iter().map(RawEvent::into_event).collect()
    }

    async fn purge_events(&self, query: &EventQuery) -> Result<usize> {
        let (clause, params) = event_filter(query);

        let removed = self
            .conn
            .call(move |conn| {
                let sql = format!("DELETE FROM attendance_events {clause}");
                Ok(conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?)
            })
            .await?;

        tracing::info!(removed, "purged attendance events");
        Ok(removed)
    }

    async fn summary_for(&self, identity_id: Uuid) -> Result<Option<AttendanceSummary>> {
        let id_str = encode_uuid(identity_id);

        let raw: Option<(u64, String)> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT events_recorded, last_seen_at
                         FROM attendance_summary WHERE identity_id = ?1",
                        rusqlite::params![id_str],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?)
            })
            .await?;

        raw.map(|(events_recorded, last_seen)| {
            Ok(AttendanceSummary {
                identity_id,
                events_recorded,
                last_seen_at: parse_dt(&last_seen)?,
            })
        })
        .transpose()
    }

    // ── Sessions ──────────────────────────────────────────────────────

    async fn create_session(&self, new: NewSession) -> Result<Session> {
        let session = Session {
            id: new.id,
            subject_id: new.subject_id.clone(),
            created_by: new.created_by.clone(),
            created_at: new.created_at,
            expires_at: new.expires_at,
            late_threshold_minutes: new.late_threshold_minutes,
            allow_late_entry: new.allow_late_entry,
            capacity: new.capacity,
            ended_at: None,
        };

        let id_str = encode_uuid(new.id);
        let subject = new.subject_id;
        let creator = new.created_by;
        let digest = new.secret_digest;
        let created_str = encode_dt(new.created_at);
        let expires_str = encode_dt(new.expires_at);
        let late_threshold = new.late_threshold_minutes;
        let allow_late = new.allow_late_entry;
        let capacity = new.capacity;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions
                         (session_id, subject_id, created_by, secret_digest, created_at,
                          expires_at, late_threshold_minutes, allow_late_entry, capacity)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        id_str,
                        subject,
                        creator,
                        digest,
                        created_str,
                        expires_str,
                        late_threshold,
                        allow_late,
                        capacity,
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let id_str = encode_uuid(id);

        let raw: Option<RawSession> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
                        rusqlite::params![id_str],
                        session_from_row,
                    )
                    .optional()?)
            })
            .await?;

        raw.map(RawSession::into_session).transpose()
    }

    async fn session_secret_digest(&self, id: Uuid) -> Result<Option<String>> {
        let id_str = encode_uuid(id);

        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT secret_digest FROM sessions WHERE session_id = ?1",
                        rusqlite::params![id_str],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?)
    }

    async fn end_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Session>> {
        let id_str = encode_uuid(id);
        let at_str = encode_dt(at);

        let raw: Option<RawSession> = self
            .conn
            .call(move |conn| {
                // COALESCE keeps the original end time if the session
                // was already closed.
                conn.execute(
                    "UPDATE sessions SET ended_at = COALESCE(ended_at, ?2)
                     WHERE session_id = ?1",
                    rusqlite::params![id_str, at_str],
                )?;
                Ok(conn
                    .query_row(
                        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
                        rusqlite::params![id_str],
                        session_from_row,
                    )
                    .optional()?)
            })
            .await?;

        raw.map(RawSession::into_session).transpose()
    }

    async fn active_sessions(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let now_str = encode_dt(now);

        let raws: Vec<RawSession> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE ended_at IS NULL AND expires_at >= ?1
                     ORDER BY created_at"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![now_str], session_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        raws.into_iter().map(RawSession::into_session).collect()
    }

    async fn session_stats(&self, id: Uuid) -> Result<Option<SessionStats>> {
        let id_str = encode_uuid(id);

        let raw: Option<(String, Vec<(String, String)>)> = self
            .conn
            .call(move |conn| {
                let created_at: Option<String> = conn
                    .query_row(
                        "SELECT created_at FROM sessions WHERE session_id = ?1",
                        rusqlite::params![id_str],
                        |row| row.get(0),
                    )
                    .optional()?;

                let Some(created_at) = created_at else {
                    return Ok(None);
                };

                let mut stmt = conn.prepare(
                    "SELECT status, recorded_at FROM attendance_events WHERE session_id = ?1",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id_str], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(Some((created_at, rows)))
            })
            .await?;

        let Some((created_at, rows)) = raw else {
            return Ok(None);
        };

        let created_at = parse_dt(&created_at)?;
        let total = rows.len() as u64;
        let mut present = 0u64;
        let mut late = 0u64;
        let mut arrival_minutes = 0.0f64;

        for (status, recorded_at) in &rows {
            match status.as_str() {
                "present" => present += 1,
                "late" => late += 1,
                _ => {}
            }
            let recorded = parse_dt(recorded_at)?;
            arrival_minutes += (recorded - created_at).num_seconds() as f64 / 60.0;
        }

        Ok(Some(SessionStats {
            session_id: id,
            total_attendees: total,
            present_count: present,
            late_count: late,
            average_arrival_minutes: if total > 0 { arrival_minutes / total as f64 } else { 0.0 },
        }))
    }
}
