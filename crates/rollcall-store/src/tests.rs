//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, Utc};
use uuid::Uuid;

use rollcall_core::error::VerificationError;
use rollcall_core::store::{
    AttendanceStore, EventQuery, NewAttendanceEvent, NewSession, RecordOutcome,
};
use rollcall_core::types::{AttendanceStatus, Descriptor, VerificationMethod};

use crate::SqliteStore;

async fn store() -> SqliteStore {
    SqliteStore::open_in_memory().await.expect("in-memory store")
}

fn sample(values: Vec<f32>, quality: f32) -> Descriptor {
    Descriptor::new(values, quality)
}

fn event_for(identity_id: Uuid, subject: &str) -> NewAttendanceEvent {
    NewAttendanceEvent {
        identity_id,
        subject_id: subject.to_owned(),
        session_id: None,
        recorded_at: Utc::now(),
        method: VerificationMethod::Biometric,
        confidence: Some(0.92),
        status: AttendanceStatus::Present,
    }
}

fn session_for(subject: &str, capacity: Option<u32>) -> NewSession {
    let now = Utc::now();
    NewSession {
        id: Uuid::new_v4(),
        subject_id: subject.to_owned(),
        created_by: "t-001".to_owned(),
        secret_digest: "digest".to_owned(),
        created_at: now,
        expires_at: now + Duration::minutes(60),
        late_threshold_minutes: 10,
        allow_late_entry: true,
        capacity,
    }
}

// ── Identities and descriptors ───────────────────────────────────────

#[tokio::test]
async fn add_and_get_identity() {
    let s = store().await;

    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();
    let fetched = s.get_identity(identity.id).await.unwrap().expect("stored identity");
    assert_eq!(fetched.display_name, "Asha Rao");
    assert_eq!(fetched.roll_code, "R-104");
}

#[tokio::test]
async fn get_identity_missing_returns_none() {
    let s = store().await;
    assert!(s.get_identity(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn descriptors_round_trip_through_encryption() {
    let s = store().await;
    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();

    let enrolled = s
        .enroll_descriptors(
            identity.id,
            vec![sample(vec![1.0, 0.0, 0.5], 0.9), sample(vec![0.2, 0.8, 0.1], 0.7)],
            false,
        )
        .await
        .unwrap();
    assert_eq!(enrolled, 2);

    let read = s.descriptors_for(identity.id).await.unwrap();
    assert_eq!(read.len(), 2);
    assert!(read.iter().any(|d| d.values == vec![1.0, 0.0, 0.5]));
    assert!(read.iter().any(|d| (d.quality - 0.7).abs() < 1e-6));
}

#[tokio::test]
async fn descriptors_for_unenrolled_is_empty_not_error() {
    let s = store().await;
    assert!(s.descriptors_for(Uuid::new_v4()).await.unwrap().is_empty());
}

#[tokio::test]
async fn enroll_appends_by_default_and_replaces_on_request() {
    let s = store().await;
    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();

    s.enroll_descriptors(
        identity.id,
        vec![sample(vec![1.0, 0.0], 0.9), sample(vec![0.0, 1.0], 0.9)],
        false,
    )
    .await
    .unwrap();
    s.enroll_descriptors(identity.id, vec![sample(vec![0.5, 0.5], 0.8)], false)
        .await
        .unwrap();
    assert_eq!(s.descriptors_for(identity.id).await.unwrap().len(), 3);

    s.enroll_descriptors(
        identity.id,
        vec![sample(vec![0.1, 0.9], 0.8), sample(vec![0.9, 0.1], 0.8)],
        true,
    )
    .await
    .unwrap();
    let after = s.descriptors_for(identity.id).await.unwrap();
    assert_eq!(after.len(), 2);
    assert!(after.iter().any(|d| d.values == vec![0.1, 0.9]));
}

#[tokio::test]
async fn gallery_excludes_single_sample_identities() {
    let s = store().await;
    let eligible = s.add_identity("Asha Rao", "R-104").await.unwrap();
    let pending = s.add_identity("Ben Okafor", "R-105").await.unwrap();

    s.enroll_descriptors(
        eligible.id,
        vec![sample(vec![1.0, 0.0], 0.9), sample(vec![0.0, 1.0], 0.9)],
        false,
    )
    .await
    .unwrap();
    s.enroll_descriptors(pending.id, vec![sample(vec![0.5, 0.5], 0.9)], false)
        .await
        .unwrap();

    let gallery = s.gallery().await.unwrap();
    assert_eq!(gallery.len(), 1);
    assert_eq!(gallery[0].identity_id, eligible.id);
    assert_eq!(gallery[0].samples.len(), 2);
}

// ── Ledger dedup ─────────────────────────────────────────────────────

#[tokio::test]
async fn record_then_duplicate_returns_already_marked() {
    let s = store().await;
    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();

    let first = s.record_event(event_for(identity.id, "Math")).await.unwrap();
    let recorded = match first {
        RecordOutcome::Recorded(event) => event,
        other => panic!("expected Recorded, got {other:?}"),
    };

    let second = s.record_event(event_for(identity.id, "Math")).await.unwrap();
    match second {
        RecordOutcome::AlreadyMarked(existing) => {
            assert_eq!(existing.id, recorded.id);
            assert_eq!(existing.status, AttendanceStatus::Present);
        }
        other => panic!("expected AlreadyMarked, got {other:?}"),
    }

    let events = s.query_events(&EventQuery::default()).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn same_identity_different_subject_both_record() {
    let s = store().await;
    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();

    assert!(matches!(
        s.record_event(event_for(identity.id, "Math")).await.unwrap(),
        RecordOutcome::Recorded(_)
    ));
    assert!(matches!(
        s.record_event(event_for(identity.id, "Physics")).await.unwrap(),
        RecordOutcome::Recorded(_)
    ));
}

#[tokio::test]
async fn concurrent_duplicates_yield_one_record() {
    let s = store().await;
    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();

    let (a, b) = tokio::join!(
        s.record_event(event_for(identity.id, "Math")),
        s.record_event(event_for(identity.id, "Math")),
    );

    let outcomes = [a.unwrap(), b.unwrap()];
    let recorded = outcomes
        .iter()
        .filter(|o| matches!(o, RecordOutcome::Recorded(_)))
        .count();
    let already = outcomes
        .iter()
        .filter(|o| matches!(o, RecordOutcome::AlreadyMarked(_)))
        .count();
    assert_eq!((recorded, already), (1, 1));

    let events = s.query_events(&EventQuery::default()).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn summary_tracks_records() {
    let s = store().await;
    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();

    assert!(s.summary_for(identity.id).await.unwrap().is_none());

    s.record_event(event_for(identity.id, "Math")).await.unwrap();
    s.record_event(event_for(identity.id, "Physics")).await.unwrap();
    // Duplicate must not bump the counter.
    s.record_event(event_for(identity.id, "Math")).await.unwrap();

    let summary = s.summary_for(identity.id).await.unwrap().expect("summary row");
    assert_eq!(summary.events_recorded, 2);
}

// ── Session-attached records ─────────────────────────────────────────

#[tokio::test]
async fn record_against_missing_session_is_rejected() {
    let s = store().await;
    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();

    let mut new = event_for(identity.id, "Math");
    new.session_id = Some(Uuid::new_v4());

    match s.record_event(new).await.unwrap() {
        RecordOutcome::Rejected(VerificationError::SessionNotFound(_)) => {}
        other => panic!("expected SessionNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn record_against_expired_session_is_rejected() {
    let s = store().await;
    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();

    let mut new_session = session_for("Math", None);
    new_session.expires_at = new_session.created_at - Duration::minutes(1);
    let session = s.create_session(new_session).await.unwrap();

    let mut new = event_for(identity.id, "Math");
    new.session_id = Some(session.id);

    match s.record_event(new).await.unwrap() {
        RecordOutcome::Rejected(VerificationError::SessionExpired(id)) => {
            assert_eq!(id, session.id)
        }
        other => panic!("expected SessionExpired, got {other:?}"),
    }
}

#[tokio::test]
async fn record_against_ended_session_is_rejected() {
    let s = store().await;
    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();
    let session = s.create_session(session_for("Math", None)).await.unwrap();
    s.end_session(session.id, Utc::now()).await.unwrap();

    let mut new = event_for(identity.id, "Math");
    new.session_id = Some(session.id);

    match s.record_event(new).await.unwrap() {
        RecordOutcome::Rejected(VerificationError::SessionEnded(_)) => {}
        other => panic!("expected SessionEnded, got {other:?}"),
    }
}

#[tokio::test]
async fn capacity_admits_exactly_n() {
    let s = store().await;
    let a = s.add_identity("Asha Rao", "R-104").await.unwrap();
    let b = s.add_identity("Ben Okafor", "R-105").await.unwrap();
    let session = s.create_session(session_for("Math", Some(1))).await.unwrap();

    let scan = |identity_id| {
        let mut new = event_for(identity_id, "Math");
        new.session_id = Some(session.id);
        new
    };

    let (first, second) = tokio::join!(s.record_event(scan(a.id)), s.record_event(scan(b.id)));

    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(
        outcomes.iter().filter(|o| matches!(o, RecordOutcome::Recorded(_))).count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(
                o,
                RecordOutcome::Rejected(VerificationError::CapacityExceeded(_))
            ))
            .count(),
        1
    );

    let in_session = s
        .query_events(&EventQuery { session_id: Some(session.id), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(in_session.len(), 1);
}

// ── Session lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_session() {
    let s = store().await;
    let created = s.create_session(session_for("Math", Some(30))).await.unwrap();

    let fetched = s.get_session(created.id).await.unwrap().expect("stored session");
    assert_eq!(fetched.subject_id, "Math");
    assert_eq!(fetched.capacity, Some(30));
    assert!(fetched.ended_at.is_none());
}

#[tokio::test]
async fn secret_digest_is_stored_and_fetched() {
    let s = store().await;
    let mut new_session = session_for("Math", None);
    new_session.secret_digest = "deadbeef".to_owned();
    let session = s.create_session(new_session).await.unwrap();

    let digest = s.session_secret_digest(session.id).await.unwrap();
    assert_eq!(digest.as_deref(), Some("deadbeef"));
    assert!(s.session_secret_digest(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn end_session_is_idempotent() {
    let s = store().await;
    let session = s.create_session(session_for("Math", None)).await.unwrap();

    let first_close = Utc::now();
    let ended = s.end_session(session.id, first_close).await.unwrap().unwrap();
    let original_end = ended.ended_at.expect("ended_at set");

    let again = s
        .end_session(session.id, first_close + Duration::minutes(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.ended_at, Some(original_end));
}

#[tokio::test]
async fn end_session_missing_returns_none() {
    let s = store().await;
    assert!(s.end_session(Uuid::new_v4(), Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn active_sessions_skips_ended_and_expired() {
    let s = store().await;

    let open = s.create_session(session_for("Math", None)).await.unwrap();

    let mut stale = session_for("Physics", None);
    stale.expires_at = stale.created_at - Duration::minutes(1);
    s.create_session(stale).await.unwrap();

    let closed = s.create_session(session_for("Chemistry", None)).await.unwrap();
    s.end_session(closed.id, Utc::now()).await.unwrap();

    let active = s.active_sessions(Utc::now()).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, open.id);
}

// ── Queries, purge, stats ────────────────────────────────────────────

#[tokio::test]
async fn query_filters_compose() {
    let s = store().await;
    let a = s.add_identity("Asha Rao", "R-104").await.unwrap();
    let b = s.add_identity("Ben Okafor", "R-105").await.unwrap();

    s.record_event(event_for(a.id, "Math")).await.unwrap();
    s.record_event(event_for(a.id, "Physics")).await.unwrap();
    s.record_event(event_for(b.id, "Math")).await.unwrap();

    let math = s
        .query_events(&EventQuery { subject_id: Some("Math".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(math.len(), 2);

    let a_math = s
        .query_events(&EventQuery {
            subject_id: Some("Math".into()),
            identity_id: Some(a.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(a_math.len(), 1);

    let today = s
        .query_events(&EventQuery {
            day: Some(Utc::now().date_naive()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(today.len(), 3);
}

#[tokio::test]
async fn purge_removes_matching_events() {
    let s = store().await;
    let identity = s.add_identity("Asha Rao", "R-104").await.unwrap();

    s.record_event(event_for(identity.id, "Math")).await.unwrap();
    s.record_event(event_for(identity.id, "Physics")).await.unwrap();

    let removed = s
        .purge_events(&EventQuery { subject_id: Some("Math".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let left = s.query_events(&EventQuery::default()).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].subject_id, "Physics");
}

#[tokio::test]
async fn session_stats_aggregate_statuses() {
    let s = store().await;
    let a = s.add_identity("Asha Rao", "R-104").await.unwrap();
    let b = s.add_identity("Ben Okafor", "R-105").await.unwrap();
    let session = s.create_session(session_for("Math", None)).await.unwrap();

    let mut present = event_for(a.id, "Math");
    present.session_id = Some(session.id);
    s.record_event(present).await.unwrap();

    let mut late = event_for(b.id, "Math");
    late.session_id = Some(session.id);
    late.status = AttendanceStatus::Late;
    s.record_event(late).await.unwrap();

    let stats = s.session_stats(session.id).await.unwrap().expect("stats");
    assert_eq!(stats.total_attendees, 2);
    assert_eq!(stats.present_count, 1);
    assert_eq!(stats.late_count, 1);
    assert!(stats.average_arrival_minutes >= 0.0);

    assert!(s.session_stats(Uuid::new_v4()).await.unwrap().is_none());
}
