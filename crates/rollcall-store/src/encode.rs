//! Column encode/decode helpers and raw row mirrors.
//!
//! Timestamps are RFC 3339 UTC with fixed microsecond precision so the
//! stored strings sort lexicographically — expiry and day comparisons
//! can run inside SQL without parsing.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use uuid::Uuid;

use rollcall_core::session::Session;
use rollcall_core::types::{AttendanceEvent, AttendanceStatus, Identity, VerificationMethod};

use crate::error::{Error, Result};

pub(crate) fn encode_uuid(id: Uuid) -> String {
    id.to_string()
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(Error::Uuid)
}

pub(crate) fn encode_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::DateParse(format!("{s}: {e}")))
}

pub(crate) fn encode_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(format!("{s}: {e}")))
}

// --- Raw row mirrors ---

pub(crate) struct RawIdentity {
    pub identity_id: String,
    pub display_name: String,
    pub roll_code: String,
    pub enrolled_at: String,
}

impl RawIdentity {
    pub fn into_identity(self) -> Result<Identity> {
        Ok(Identity {
            id: parse_uuid(&self.identity_id)?,
            display_name: self.display_name,
            roll_code: self.roll_code,
            enrolled_at: parse_dt(&self.enrolled_at)?,
        })
    }
}

pub(crate) struct RawEvent {
    pub event_id: String,
    pub identity_id: String,
    pub subject_id: String,
    pub session_id: Option<String>,
    pub day: String,
    pub recorded_at: String,
    pub method: String,
    pub confidence: Option<f64>,
    pub status: String,
}

impl RawEvent {
    pub fn into_event(self) -> Result<AttendanceEvent> {
        Ok(AttendanceEvent {
            id: parse_uuid(&self.event_id)?,
            identity_id: parse_uuid(&self.identity_id)?,
            subject_id: self.subject_id,
            session_id: self.session_id.as_deref().map(parse_uuid).transpose()?,
            day: parse_day(&self.day)?,
            recorded_at: parse_dt(&self.recorded_at)?,
            method: VerificationMethod::parse(&self.method)
                .ok_or_else(|| Error::Decode(format!("method '{}'", self.method)))?,
            confidence: self.confidence.map(|c| c as f32),
            status: AttendanceStatus::parse(&self.status)
                .ok_or_else(|| Error::Decode(format!("status '{}'", self.status)))?,
        })
    }
}

pub(crate) struct RawSession {
    pub session_id: String,
    pub subject_id: String,
    pub created_by: String,
    pub created_at: String,
    pub expires_at: String,
    pub late_threshold_minutes: i64,
    pub allow_late_entry: bool,
    pub capacity: Option<u32>,
    pub ended_at: Option<String>,
}

impl RawSession {
    pub fn into_session(self) -> Result<Session> {
        Ok(Session {
            id: parse_uuid(&self.session_id)?,
            subject_id: self.subject_id,
            created_by: self.created_by,
            created_at: parse_dt(&self.created_at)?,
            expires_at: parse_dt(&self.expires_at)?,
            late_threshold_minutes: self.late_threshold_minutes,
            allow_late_entry: self.allow_late_entry,
            capacity: self.capacity,
            ended_at: self.ended_at.as_deref().map(parse_dt).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_timestamps_sort_lexicographically() {
        let early = Utc::now();
        let late = early + chrono::Duration::microseconds(1);
        assert!(encode_dt(early) < encode_dt(late));
    }

    #[test]
    fn test_dt_round_trip() {
        let now = Utc::now();
        let parsed = parse_dt(&encode_dt(now)).unwrap();
        // Microsecond precision is retained, nanoseconds are dropped.
        assert!((now - parsed).num_microseconds().unwrap().abs() < 1);
    }

    #[test]
    fn test_day_round_trip() {
        let day = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
        assert_eq!(parse_day(&encode_day(day)).unwrap(), day);
    }
}
