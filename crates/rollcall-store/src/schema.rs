//! SQL schema for the rollcall SQLite store.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS identities (
    identity_id  TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    roll_code    TEXT NOT NULL UNIQUE,
    enrolled_at  TEXT NOT NULL    -- ISO 8601 UTC
);

-- One row per enrolled biometric sample. The sample column is an
-- AES-256-GCM sealed JSON blob; quality is duplicated in the clear so
-- eligibility queries never need to decrypt.
CREATE TABLE IF NOT EXISTS descriptors (
    descriptor_id TEXT PRIMARY KEY,
    identity_id   TEXT NOT NULL REFERENCES identities(identity_id),
    sample        BLOB NOT NULL,
    quality       REAL NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id             TEXT PRIMARY KEY,
    subject_id             TEXT NOT NULL,
    created_by             TEXT NOT NULL,
    secret_digest          TEXT NOT NULL,   -- SHA-256 of the token secret
    created_at             TEXT NOT NULL,
    expires_at             TEXT NOT NULL,
    late_threshold_minutes INTEGER NOT NULL,
    allow_late_entry       INTEGER NOT NULL,
    capacity               INTEGER,         -- NULL = unbounded
    ended_at               TEXT             -- explicit close; NULL while open
);

-- The ledger. Events are immutable; the only delete path is the
-- administrative purge. The UNIQUE constraint is the dedup key's last
-- line of defense under the check-and-insert transaction.
CREATE TABLE IF NOT EXISTS attendance_events (
    event_id    TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL REFERENCES identities(identity_id),
    subject_id  TEXT NOT NULL,
    session_id  TEXT REFERENCES sessions(session_id),
    day         TEXT NOT NULL,   -- calendar day, YYYY-MM-DD
    recorded_at TEXT NOT NULL,
    method      TEXT NOT NULL,   -- 'biometric' | 'token' | 'manual'
    confidence  REAL,
    status      TEXT NOT NULL,   -- 'present' | 'late' | 'absent'
    UNIQUE (identity_id, subject_id, day)
);

-- Running per-identity projection, written in the same transaction as
-- each ledger insert.
CREATE TABLE IF NOT EXISTS attendance_summary (
    identity_id     TEXT PRIMARY KEY REFERENCES identities(identity_id),
    events_recorded INTEGER NOT NULL,
    last_seen_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS descriptors_identity_idx ON descriptors(identity_id);
CREATE INDEX IF NOT EXISTS events_session_idx       ON attendance_events(session_id);
CREATE INDEX IF NOT EXISTS events_subject_day_idx   ON attendance_events(subject_id, day);

PRAGMA user_version = 1;
";
