//! Nearest-neighbour identity decision against the known-face gallery.

use crate::gallery::KnownFaceSet;
use crate::types::Embedding;

/// Name reported when no gallery entry is close enough.
pub const UNKNOWN: &str = "unknown";

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched name, or [`UNKNOWN`].
    pub name: String,
    /// Distance to the nearest gallery entry, reported even without a match.
    /// `0.0` for an empty gallery.
    pub distance: f32,
    /// Gallery index of the match (if any).
    pub index: Option<usize>,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self {
            name: UNKNOWN.to_string(),
            distance,
            index: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.index.is_some()
    }
}

/// Strategy for comparing a probe embedding against the gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, known: &KnownFaceSet, threshold: f32) -> MatchResult;
}

/// Euclidean nearest neighbour with a strict `distance < threshold` acceptance.
///
/// Ties resolve to the earliest gallery entry. Entries whose dimension differs
/// from the probe, or whose distance is not finite, never take part; if none
/// is comparable the result is `unknown` at `0.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, known: &KnownFaceSet, threshold: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, (_, embedding)) in known.iter().enumerate() {
            let Some(dist) = probe.euclidean_distance(embedding) else {
                continue;
            };
            // Strict comparison keeps the first of equal minima.
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }

        match best {
            None => MatchResult::unknown(0.0),
            Some((idx, dist)) if dist < threshold => MatchResult {
                name: known.names()[idx].clone(),
                distance: dist,
                index: Some(idx),
            },
            Some((_, dist)) => MatchResult::unknown(dist),
        }
    }
}
