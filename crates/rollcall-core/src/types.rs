use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum number of usable samples an identity needs before it is
/// eligible for matching. Single-sample enrollment is rejected.
pub const MIN_ENROLLMENT_SAMPLES: usize = 2;

/// One biometric feature vector captured from an external extractor,
/// with its capture-time quality score in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    pub quality: f32,
}

impl Descriptor {
    pub fn new(values: Vec<f32>, quality: f32) -> Self {
        Self { values, quality }
    }

    /// Compute cosine similarity between two descriptors.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Dimension
    /// mismatch and zero-norm inputs both score 0.0 — the pair is
    /// skipped, never an error.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// An enrolled person. Identities are registered once and never
/// deleted implicitly; descriptor sets only grow through enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
    /// External roll / reference code, unique across identities.
    pub roll_code: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Attendance status derived at verification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

/// How an attendance event was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMethod {
    Biometric,
    Token,
    Manual,
}

impl VerificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMethod::Biometric => "biometric",
            VerificationMethod::Token => "token",
            VerificationMethod::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "biometric" => Some(VerificationMethod::Biometric),
            "token" => Some(VerificationMethod::Token),
            "manual" => Some(VerificationMethod::Manual),
            _ => None,
        }
    }
}

/// One immutable ledger entry.
///
/// At most one event may exist per (identity, subject, day) — the
/// dedup key enforced by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub subject_id: String,
    /// Set for the QR path; `None` for face-only flows.
    pub session_id: Option<Uuid>,
    /// Calendar-day component of the dedup key.
    pub day: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    pub method: VerificationMethod,
    /// Match confidence for biometric events; `None` for token scans.
    pub confidence: Option<f32>,
    pub status: AttendanceStatus,
}

/// Result of a successful enrollment: how many samples were stored
/// and how many were dropped for insufficient quality.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnrollmentSummary {
    pub enrolled: usize,
    pub rejected_low_quality: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: Vec<f32>) -> Descriptor {
        Descriptor::new(values, 1.0)
    }

    #[test]
    fn test_similarity_identical() {
        let a = desc(vec![1.0, 0.0, 0.0]);
        let b = desc(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = desc(vec![1.0, 0.0]);
        let b = desc(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite() {
        let a = desc(vec![1.0, 0.0]);
        let b = desc(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = desc(vec![0.0, 0.0]);
        let b = desc(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_similarity_dimension_mismatch_scores_zero() {
        let a = desc(vec![1.0, 0.0, 0.0]);
        let b = desc(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_similarity_scale_invariant() {
        let a = desc(vec![1.0, 2.0, 3.0]);
        let b = desc(vec![2.0, 4.0, 6.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_status_round_trip() {
        for s in [AttendanceStatus::Present, AttendanceStatus::Late, AttendanceStatus::Absent] {
            assert_eq!(AttendanceStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(AttendanceStatus::parse("tardy"), None);
    }

    #[test]
    fn test_method_round_trip() {
        for m in [
            VerificationMethod::Biometric,
            VerificationMethod::Token,
            VerificationMethod::Manual,
        ] {
            assert_eq!(VerificationMethod::parse(m.as_str()), Some(m));
        }
        assert_eq!(VerificationMethod::parse("psychic"), None);
    }
}
