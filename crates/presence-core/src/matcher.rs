//! Brute-force identity matching over enrolled embeddings.

use crate::types::{Embedding, MatchResult};

/// Default cosine similarity required for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.75;

/// All enrolled samples for one identity, in enrollment order.
#[derive(Debug, Clone)]
pub struct EnrolledIdentity {
    pub identity: String,
    pub vectors: Vec<Embedding>,
}

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[EnrolledIdentity],
        threshold: f32,
    ) -> Option<MatchResult>;
}

/// Cosine similarity matcher with an exhaustive gallery scan.
///
/// Ties on exactly equal scores go to the first vector encountered, so the
/// winner depends on enrollment order. That is accepted rather than chosen;
/// sessions enroll in roster order, which keeps it stable across runs.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[EnrolledIdentity],
        threshold: f32,
    ) -> Option<MatchResult> {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            for vector in &entry.vectors {
                let sim = probe.similarity(vector);
                if sim > best_sim {
                    best_sim = sim;
                    best_idx = Some(i);
                }
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => Some(MatchResult {
                identity: gallery[idx].identity.clone(),
                similarity: best_sim,
            }),
            _ => None,
        }
    }
}

/// In-memory enrolled set plus the matching strategy.
///
/// Owned by a [`RecognitionSession`](crate::session::RecognitionSession);
/// there is no process-wide store.
pub struct MatchEngine<M: Matcher = CosineMatcher> {
    gallery: Vec<EnrolledIdentity>,
    matcher: M,
}

impl Default for MatchEngine<CosineMatcher> {
    fn default() -> Self {
        Self::new(CosineMatcher)
    }
}

impl<M: Matcher> MatchEngine<M> {
    pub fn new(matcher: M) -> Self {
        Self {
            gallery: Vec::new(),
            matcher,
        }
    }

    /// Append vectors for an identity. No dedup, no limit.
    pub fn enroll(&mut self, identity: &str, vectors: impl IntoIterator<Item = Embedding>) {
        let idx = match self.gallery.iter().position(|e| e.identity == identity) {
            Some(idx) => idx,
            None => {
                self.gallery.push(EnrolledIdentity {
                    identity: identity.to_string(),
                    vectors: Vec::new(),
                });
                self.gallery.len() - 1
            }
        };
        let entry = &mut self.gallery[idx];
        let before = entry.vectors.len();
        entry.vectors.extend(vectors);
        tracing::debug!(
            identity,
            added = entry.vectors.len() - before,
            total = entry.vectors.len(),
            "enrolled vectors"
        );
    }

    /// Drop one identity and all its vectors. Returns whether it was enrolled.
    pub fn remove(&mut self, identity: &str) -> bool {
        let before = self.gallery.len();
        self.gallery.retain(|e| e.identity != identity);
        self.gallery.len() != before
    }

    /// Forget every enrolled identity.
    pub fn clear(&mut self) {
        self.gallery.clear();
    }

    /// Best-matching identity for `query`, if its score reaches `threshold`.
    pub fn recognize(&self, query: &Embedding, threshold: f32) -> Option<MatchResult> {
        self.matcher.compare(query, &self.gallery, threshold)
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.gallery.iter().map(|e| e.identity.as_str())
    }

    /// Number of enrolled identities.
    pub fn len(&self) -> usize {
        self.gallery.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gallery.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_empty_engine_never_matches() {
        let engine: MatchEngine = MatchEngine::default();
        for query in [emb(&[1.0, 0.0]), emb(&[0.0, 0.0]), emb(&[-0.2, 0.7])] {
            assert!(engine.recognize(&query, DEFAULT_MATCH_THRESHOLD).is_none());
        }
    }

    #[test]
    fn test_best_match_scans_every_vector() {
        let mut engine: MatchEngine = MatchEngine::default();
        engine.enroll("1_Decoy", [emb(&[0.0, 1.0, 0.0]), emb(&[0.0, 0.0, 1.0])]);
        engine.enroll("2_Match", [emb(&[0.0, 1.0, 1.0]), emb(&[1.0, 0.0, 0.0])]);

        let result = engine.recognize(&emb(&[1.0, 0.0, 0.0]), 0.5).unwrap();
        assert_eq!(result.identity, "2_Match");
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        let mut engine: MatchEngine = MatchEngine::default();
        engine.enroll("1_Alice", [emb(&[1.0, 1.0])]);
        // cos(45°) ≈ 0.707
        assert!(engine.recognize(&emb(&[1.0, 0.0]), 0.75).is_none());
        assert!(engine.recognize(&emb(&[1.0, 0.0]), 0.70).is_some());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut engine: MatchEngine = MatchEngine::default();
        engine.enroll("1_Alice", [emb(&[1.0, 0.0])]);
        let result = engine.recognize(&emb(&[2.0, 0.0]), 1.0);
        assert_eq!(result.map(|m| m.identity), Some("1_Alice".to_string()));
    }

    #[test]
    fn test_ties_go_to_first_enrolled() {
        let mut engine: MatchEngine = MatchEngine::default();
        engine.enroll("1_First", [emb(&[1.0, 0.0])]);
        engine.enroll("2_Second", [emb(&[1.0, 0.0])]);
        let result = engine.recognize(&emb(&[1.0, 0.0]), 0.5).unwrap();
        assert_eq!(result.identity, "1_First");
    }

    #[test]
    fn test_enroll_appends_to_existing_identity() {
        let mut engine: MatchEngine = MatchEngine::default();
        engine.enroll("1_Alice", [emb(&[1.0, 0.0])]);
        engine.enroll("1_Alice", [emb(&[0.0, 1.0])]);
        assert_eq!(engine.len(), 1);

        let result = engine.recognize(&emb(&[0.0, 1.0]), 0.9).unwrap();
        assert_eq!(result.identity, "1_Alice");
    }

    #[test]
    fn test_clear_and_remove() {
        let mut engine: MatchEngine = MatchEngine::default();
        engine.enroll("1_Alice", [emb(&[1.0, 0.0])]);
        engine.enroll("2_Bob", [emb(&[0.0, 1.0])]);

        assert!(engine.remove("2_Bob"));
        assert!(!engine.remove("2_Bob"));
        assert_eq!(engine.identities().collect::<Vec<_>>(), vec!["1_Alice"]);

        engine.clear();
        assert!(engine.is_empty());
        assert!(engine.recognize(&emb(&[1.0, 0.0]), 0.1).is_none());
    }

    #[test]
    fn test_zero_query_scores_zero() {
        let mut engine: MatchEngine = MatchEngine::default();
        engine.enroll("1_Alice", [emb(&[1.0, 0.0])]);
        assert!(engine.recognize(&emb(&[0.0, 0.0]), 0.01).is_none());
        let result = engine.recognize(&emb(&[0.0, 0.0]), 0.0).unwrap();
        assert_eq!(result.similarity, 0.0);
    }
}
