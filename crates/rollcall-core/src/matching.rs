//! Best-sample gallery matching.
//!
//! A probe is compared against every enrolled sample of every candidate
//! identity; each candidate is scored by its strongest sample, and the
//! strongest candidate wins. Averaging would let weak samples dilute a
//! single good capture.

use uuid::Uuid;

use crate::types::Descriptor;

/// One candidate identity and its enrolled samples.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity_id: Uuid,
    pub samples: Vec<Descriptor>,
}

/// Result of matching a probe against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Best candidate scored strictly above the threshold.
    Match { identity_id: Uuid, score: f32 },
    /// No candidate cleared the threshold. `best_score` is the highest
    /// similarity seen (0.0 for an empty gallery), kept for diagnostics.
    NoMatch { best_score: f32 },
}

/// Strategy for comparing a probe descriptor against a gallery.
pub trait Matcher {
    fn best_match(&self, probe: &Descriptor, gallery: &[GalleryEntry], threshold: f32)
        -> MatchOutcome;
}

/// Cosine matcher with per-identity best-sample scoring.
///
/// Always iterates every sample of every entry — no early exit on a
/// strong hit, so gallery order never changes the result.
pub struct BestSampleMatcher;

impl Matcher for BestSampleMatcher {
    fn best_match(
        &self,
        probe: &Descriptor,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> MatchOutcome {
        let mut best_score = 0.0f32;
        let mut best_identity: Option<Uuid> = None;

        for entry in gallery {
            let mut entry_best = 0.0f32;
            for sample in &entry.samples {
                let sim = probe.similarity(sample);
                if sim > entry_best {
                    entry_best = sim;
                }
            }

            if entry_best > best_score {
                best_score = entry_best;
                best_identity = Some(entry.identity_id);
            }
        }

        // Open interval: a score exactly at the threshold is rejected.
        match best_identity {
            Some(identity_id) if best_score > threshold => {
                tracing::debug!(identity = %identity_id, score = best_score, "gallery match");
                MatchOutcome::Match { identity_id, score: best_score }
            }
            _ => MatchOutcome::NoMatch { best_score },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: Vec<f32>) -> Descriptor {
        Descriptor::new(values, 1.0)
    }

    fn entry(id: Uuid, samples: Vec<Vec<f32>>) -> GalleryEntry {
        GalleryEntry {
            identity_id: id,
            samples: samples.into_iter().map(desc).collect(),
        }
    }

    #[test]
    fn test_best_sample_wins_over_average() {
        // One strong sample among weak ones must carry the identity.
        let probe = desc(vec![1.0, 0.0, 0.0]);
        let id = Uuid::new_v4();
        let gallery = vec![entry(
            id,
            vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 0.0]],
        )];

        match BestSampleMatcher.best_match(&probe, &gallery, 0.75) {
            MatchOutcome::Match { identity_id, score } => {
                assert_eq!(identity_id, id);
                assert!((score - 1.0).abs() < 1e-6);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_strongest_candidate_selected() {
        let probe = desc(vec![1.0, 0.0]);
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        let gallery = vec![
            entry(far, vec![vec![0.5, 0.8], vec![0.0, 1.0]]),
            entry(near, vec![vec![0.99, 0.05], vec![0.0, 1.0]]),
        ];

        match BestSampleMatcher.best_match(&probe, &gallery, 0.5) {
            MatchOutcome::Match { identity_id, .. } => assert_eq!(identity_id, near),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_score_at_threshold_is_rejected() {
        // similarity of identical vectors is 1.0; with threshold 1.0 the
        // open-interval rule must reject it.
        let probe = desc(vec![0.0, 1.0]);
        let gallery = vec![entry(Uuid::new_v4(), vec![vec![0.0, 1.0], vec![1.0, 0.0]])];

        let outcome = BestSampleMatcher.best_match(&probe, &gallery, 1.0);
        assert!(matches!(outcome, MatchOutcome::NoMatch { .. }));
    }

    #[test]
    fn test_no_match_reports_best_score() {
        let probe = desc(vec![1.0, 0.0]);
        let gallery = vec![entry(Uuid::new_v4(), vec![vec![0.0, 1.0], vec![0.0, -1.0]])];

        match BestSampleMatcher.best_match(&probe, &gallery, 0.75) {
            MatchOutcome::NoMatch { best_score } => assert!(best_score.abs() < 1e-6),
            other => panic!("expected no-match, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_gallery() {
        let probe = desc(vec![1.0, 0.0]);
        let outcome = BestSampleMatcher.best_match(&probe, &[], 0.5);
        assert_eq!(outcome, MatchOutcome::NoMatch { best_score: 0.0 });
    }

    #[test]
    fn test_mismatched_dimensions_skipped() {
        // The 2-dim sample cannot be compared with a 3-dim probe and must
        // contribute nothing, not poison the candidate.
        let probe = desc(vec![1.0, 0.0, 0.0]);
        let id = Uuid::new_v4();
        let gallery = vec![entry(id, vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]])];

        match BestSampleMatcher.best_match(&probe, &gallery, 0.75) {
            MatchOutcome::Match { identity_id, score } => {
                assert_eq!(identity_id, id);
                assert!((score - 1.0).abs() < 1e-6);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_accepted_match_always_above_threshold() {
        // Property from the contract: an accepted candidate's score is
        // strictly greater than the threshold.
        let probe = desc(vec![0.6, 0.8]);
        let gallery = vec![
            entry(Uuid::new_v4(), vec![vec![0.8, 0.6], vec![1.0, 0.0]]),
            entry(Uuid::new_v4(), vec![vec![0.6, 0.8], vec![0.0, 1.0]]),
        ];

        for threshold in [0.0f32, 0.5, 0.9, 0.999, 1.0] {
            if let MatchOutcome::Match { score, .. } =
                BestSampleMatcher.best_match(&probe, &gallery, threshold)
            {
                assert!(score > threshold);
            }
        }
    }
}
