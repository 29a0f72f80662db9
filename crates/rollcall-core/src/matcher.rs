//! Euclidean nearest-neighbor identity classification.

use crate::roster::EnrolledFace;
use crate::types::{Embedding, Identity};

/// Default distance below which a probe is accepted as an enrolled identity.
/// Calibrated for raw (unnormalized) 128-d descriptors.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.4;

/// Outcome of classifying one probe descriptor against the roster.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Distance to the nearest matchable entry. Infinite when the roster
    /// has no matchable entries at all.
    pub distance: f32,
    /// The accepted identity, or `None` when the nearest entry was not
    /// close enough (or there were no candidates).
    pub identity: Option<Identity>,
}

/// Strategy for resolving a probe descriptor to an enrolled identity.
pub trait Matcher {
    fn classify(&self, probe: &Embedding, roster: &[EnrolledFace]) -> MatchResult;
}

/// Nearest-neighbor matcher over Euclidean distance.
///
/// Acceptance requires the minimum distance to be strictly below the
/// threshold. Ties on the minimum keep the earliest roster entry.
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn classify(&self, probe: &Embedding, roster: &[EnrolledFace]) -> MatchResult {
        let mut best_distance = f32::INFINITY;
        let mut best: Option<&EnrolledFace> = None;

        for entry in roster.iter().filter(|e| e.matchable) {
            let distance = probe.euclidean_distance(&entry.embedding);
            if distance < best_distance {
                best_distance = distance;
                best = Some(entry);
            }
        }

        match best {
            Some(entry) if best_distance < self.threshold => MatchResult {
                distance: best_distance,
                identity: Some(Identity {
                    code: entry.code.clone(),
                    name: entry.name.clone(),
                }),
            },
            _ => MatchResult {
                distance: best_distance,
                identity: None,
            },
        }
    }
}
