//! D-Bus interface for the rollcall attendance daemon.
//!
//! Bus name: org.freedesktop.Rollcall1
//! Object path: /org/freedesktop/Rollcall1
//!
//! Arguments and replies are JSON strings. Domain refusals come back
//! as `{"outcome": "rejected", "error": ...}` replies so kiosk callers
//! can branch on them; only infrastructure failures surface as D-Bus
//! errors.

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use zbus::interface;

use rollcall_core::session::Session;
use rollcall_core::store::EventQuery;
use rollcall_core::types::Descriptor;
use rollcall_store::SqliteStore;

use crate::engine::{Engine, EngineError, SessionRequest, VerifyOutcome};

pub struct RollcallService {
    engine: Engine<SqliteStore>,
}

/// Ledger query filters as they arrive over the bus.
#[derive(Debug, Default, Deserialize)]
struct QueryArgs {
    #[serde(default)]
    subject: Option<String>,
    /// Calendar day, `YYYY-MM-DD`.
    #[serde(default)]
    day: Option<String>,
    #[serde(default)]
    identity_id: Option<Uuid>,
    #[serde(default)]
    session_id: Option<Uuid>,
}

impl RollcallService {
    pub fn new(engine: Engine<SqliteStore>) -> Self {
        Self { engine }
    }
}

fn rejected(code: &str, message: &str) -> String {
    json!({ "outcome": "rejected", "error": code, "message": message }).to_string()
}

/// Domain refusals become normal replies; store failures become bus
/// errors.
fn reply_error(err: EngineError<rollcall_store::Error>) -> zbus::fdo::Result<String> {
    match err {
        EngineError::Domain(e) => Ok(rejected(e.code(), &e.to_string())),
        EngineError::Extract(e) => Ok(rejected("extraction_failed", &e.to_string())),
        EngineError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            Err(zbus::fdo::Error::Failed(e.to_string()))
        }
    }
}

fn verify_reply(outcome: VerifyOutcome) -> String {
    match outcome {
        VerifyOutcome::Recorded { identity, event } => json!({
            "outcome": "recorded",
            "identity": {
                "id": identity.id,
                "display_name": identity.display_name,
                "roll_code": identity.roll_code,
            },
            "event_id": event.id,
            "score": event.confidence,
            "status": event.status.as_str(),
        })
        .to_string(),
        VerifyOutcome::AlreadyMarked { identity, existing } => json!({
            "outcome": "already_marked",
            "identity": {
                "id": identity.id,
                "display_name": identity.display_name,
                "roll_code": identity.roll_code,
            },
            "event_id": existing.id,
            "score": existing.confidence,
            "status": existing.status.as_str(),
            "recorded_at": existing.recorded_at,
        })
        .to_string(),
        VerifyOutcome::NoMatch { best_score } => json!({
            "outcome": "no_match",
            "best_score": best_score,
        })
        .to_string(),
    }
}

fn session_value(session: &Session) -> serde_json::Value {
    json!({
        "session_id": session.id,
        "subject": session.subject_id,
        "created_at": session.created_at,
        "expires_at": session.expires_at,
        "late_threshold_minutes": session.late_threshold_minutes,
        "allow_late_entry": session.allow_late_entry,
        "capacity": session.capacity,
        "ended_at": session.ended_at,
    })
}

/// A probe arrives either as a bare float array or as a full
/// descriptor object; capture quality is meaningless for probes, so
/// the bare form defaults it.
fn parse_probe(descriptor_json: &str) -> Result<Descriptor, String> {
    if let Ok(values) = serde_json::from_str::<Vec<f32>>(descriptor_json) {
        return Ok(Descriptor::new(values, 1.0));
    }
    serde_json::from_str::<Descriptor>(descriptor_json).map_err(|e| e.to_string())
}

impl QueryArgs {
    fn into_query(self) -> Result<EventQuery, String> {
        let day = self
            .day
            .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|e| e.to_string()))
            .transpose()?;
        Ok(EventQuery {
            subject_id: self.subject,
            day,
            identity_id: self.identity_id,
            session_id: self.session_id,
        })
    }
}

#[interface(name = "org.freedesktop.Rollcall1")]
impl RollcallService {
    /// Register a new identity. Reply: `{id, display_name, roll_code}`.
    async fn register_identity(
        &self,
        display_name: &str,
        roll_code: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(display_name, roll_code, "register_identity requested");
        match self.engine.register_identity(display_name, roll_code).await {
            Ok(identity) => Ok(json!({
                "id": identity.id,
                "display_name": identity.display_name,
                "roll_code": identity.roll_code,
                "enrolled_at": identity.enrolled_at,
            })
            .to_string()),
            Err(e) => reply_error(e),
        }
    }

    /// Enroll descriptor samples for an identity.
    ///
    /// `descriptors_json` is an array of `{values, quality}` objects.
    /// Reply: `{enrolled, rejected_low_quality}`.
    async fn enroll(
        &self,
        identity_id: &str,
        descriptors_json: &str,
        replace: bool,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(identity_id, replace, "enroll requested");
        let Ok(identity_id) = Uuid::parse_str(identity_id) else {
            return Ok(rejected("invalid_payload", "identity_id is not a uuid"));
        };
        let descriptors: Vec<Descriptor> = match serde_json::from_str(descriptors_json) {
            Ok(d) => d,
            Err(e) => return Ok(rejected("invalid_payload", &e.to_string())),
        };

        match self.engine.enroll(identity_id, descriptors, replace).await {
            Ok(summary) => Ok(json!({
                "enrolled": summary.enrolled,
                "rejected_low_quality": summary.rejected_low_quality,
            })
            .to_string()),
            Err(e) => reply_error(e),
        }
    }

    /// Verify a probe descriptor and record attendance for the match.
    /// An empty `session_id` leaves the event session-less.
    async fn verify_face(
        &self,
        subject: &str,
        descriptor_json: &str,
        session_id: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(subject, "verify_face requested");
        let probe = match parse_probe(descriptor_json) {
            Ok(p) => p,
            Err(e) => return Ok(rejected("invalid_payload", &e)),
        };
        let session_id = if session_id.is_empty() {
            None
        } else {
            match Uuid::parse_str(session_id) {
                Ok(id) => Some(id),
                Err(_) => return Ok(rejected("invalid_payload", "session_id is not a uuid")),
            }
        };

        match self.engine.verify_face(&probe, subject, session_id, Utc::now()).await {
            Ok(outcome) => Ok(verify_reply(outcome)),
            Err(e) => reply_error(e),
        }
    }

    /// Create a QR attendance session.
    /// Reply: `{session_id, token, expires_at}`.
    async fn create_session(&self, request_json: &str) -> zbus::fdo::Result<String> {
        let request: SessionRequest = match serde_json::from_str(request_json) {
            Ok(r) => r,
            Err(e) => return Ok(rejected("invalid_payload", &e.to_string())),
        };
        tracing::info!(subject = %request.subject, "create_session requested");

        match self.engine.create_session(request, Utc::now()).await {
            Ok(created) => Ok(json!({
                "session_id": created.session.id,
                "token": created.token,
                "expires_at": created.session.expires_at,
            })
            .to_string()),
            Err(e) => reply_error(e),
        }
    }

    /// Phase one of the handshake: validate a scanned session token.
    async fn scan_session_token(&self, payload: &str) -> zbus::fdo::Result<String> {
        match self.engine.scan_session_token(payload, Utc::now()).await {
            Ok(session) => Ok(session_value(&session).to_string()),
            Err(e) => reply_error(e),
        }
    }

    /// Phase two with pre-decoded ids: record attendance for an
    /// identity under a session.
    async fn scan_identity_token(
        &self,
        session_id: &str,
        identity_id: &str,
    ) -> zbus::fdo::Result<String> {
        let Ok(session_id) = Uuid::parse_str(session_id) else {
            return Ok(rejected("invalid_payload", "session_id is not a uuid"));
        };
        let Ok(identity_id) = Uuid::parse_str(identity_id) else {
            return Ok(rejected("invalid_payload", "identity_id is not a uuid"));
        };

        match self
            .engine
            .scan_identity_token(session_id, identity_id, Utc::now())
            .await
        {
            Ok(outcome) => Ok(verify_reply(outcome)),
            Err(e) => reply_error(e),
        }
    }

    /// Phase two with a raw identity badge payload.
    async fn scan_identity_payload(
        &self,
        session_id: &str,
        payload: &str,
    ) -> zbus::fdo::Result<String> {
        let Ok(session_id) = Uuid::parse_str(session_id) else {
            return Ok(rejected("invalid_payload", "session_id is not a uuid"));
        };

        match self
            .engine
            .scan_identity_payload(session_id, payload, Utc::now())
            .await
        {
            Ok(outcome) => Ok(verify_reply(outcome)),
            Err(e) => reply_error(e),
        }
    }

    /// Explicitly close a session. Terminal: no further scans attach.
    async fn end_session(&self, session_id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(session_id, "end_session requested");
        let Ok(session_id) = Uuid::parse_str(session_id) else {
            return Ok(rejected("invalid_payload", "session_id is not a uuid"));
        };

        match self.engine.end_session(session_id, Utc::now()).await {
            Ok(session) => Ok(session_value(&session).to_string()),
            Err(e) => reply_error(e),
        }
    }

    /// Sessions currently accepting scans.
    async fn active_sessions(&self) -> zbus::fdo::Result<String> {
        match self.engine.active_sessions(Utc::now()).await {
            Ok(sessions) => {
                let replies: Vec<serde_json::Value> =
                    sessions.iter().map(session_value).collect();
                Ok(json!(replies).to_string())
            }
            Err(e) => reply_error(e),
        }
    }

    /// Aggregates for one session's slice of the ledger.
    async fn session_stats(&self, session_id: &str) -> zbus::fdo::Result<String> {
        let Ok(session_id) = Uuid::parse_str(session_id) else {
            return Ok(rejected("invalid_payload", "session_id is not a uuid"));
        };

        match self.engine.session_stats(session_id).await {
            Ok(stats) => Ok(json!({
                "session_id": stats.session_id,
                "total_attendees": stats.total_attendees,
                "present_count": stats.present_count,
                "late_count": stats.late_count,
                "average_arrival_minutes": stats.average_arrival_minutes,
            })
            .to_string()),
            Err(e) => reply_error(e),
        }
    }

    /// Query the ledger. `filters_json` fields: subject, day,
    /// identity_id, session_id — all optional, all conjunctive.
    async fn query_events(&self, filters_json: &str) -> zbus::fdo::Result<String> {
        let args: QueryArgs = match serde_json::from_str(filters_json) {
            Ok(a) => a,
            Err(e) => return Ok(rejected("invalid_payload", &e.to_string())),
        };
        let query = match args.into_query() {
            Ok(q) => q,
            Err(e) => return Ok(rejected("invalid_payload", &e)),
        };

        match self.engine.query_events(&query).await {
            Ok(events) => {
                Ok(serde_json::to_string(&events).expect("events serialize"))
            }
            Err(e) => reply_error(e),
        }
    }

    /// Administrative purge — the only delete path for ledger events.
    async fn purge_events(&self, filters_json: &str) -> zbus::fdo::Result<String> {
        let args: QueryArgs = match serde_json::from_str(filters_json) {
            Ok(a) => a,
            Err(e) => return Ok(rejected("invalid_payload", &e.to_string())),
        };
        let query = match args.into_query() {
            Ok(q) => q,
            Err(e) => return Ok(rejected("invalid_payload", &e)),
        };
        tracing::warn!(?query, "purge_events requested");

        match self.engine.purge_events(&query).await {
            Ok(removed) => Ok(json!({ "removed": removed }).to_string()),
            Err(e) => reply_error(e),
        }
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let active = match self.engine.active_sessions(Utc::now()).await {
            Ok(sessions) => sessions.len(),
            Err(e) => return reply_error(e),
        };
        let policy = self.engine.policy();
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "active_sessions": active,
            "match_threshold": policy.match_threshold,
            "present_confidence": policy.present_confidence,
            "min_descriptor_quality": policy.min_descriptor_quality,
        })
        .to_string())
    }
}
