//! Best-identity matching of detected faces against an enrolled roster.

use crate::types::{DetectedFace, Identity, MatchResult};
use crate::vector;

/// Strategy for matching probe embeddings against a roster of identities.
pub trait Matcher {
    fn match_one(&self, probe: &[f32], roster: &[Identity]) -> MatchResult;

    /// Match every face independently and return annotated copies, left to right.
    fn match_all(&self, faces: &[DetectedFace], roster: &[Identity]) -> Vec<DetectedFace> {
        let mut matched: Vec<DetectedFace> = faces
            .iter()
            .map(|face| DetectedFace {
                matched: self.match_one(&face.embedding, roster),
                ..face.clone()
            })
            .collect();
        matched.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));
        matched
    }
}

/// Flat cosine scan over every stored embedding of every identity.
///
/// A candidate replaces the current best only when strictly better, so ties
/// keep the first one found in roster order.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn match_one(&self, probe: &[f32], roster: &[Identity]) -> MatchResult {
        let mut best = MatchResult::none();

        for identity in roster {
            for (index, stored) in identity.embeddings.iter().enumerate() {
                if let Err(e) = vector::validate(probe, stored) {
                    tracing::trace!(
                        identity = %identity.name,
                        index,
                        error = %e,
                        "skipping embedding"
                    );
                    continue;
                }

                let similarity = vector::similarity_percent(probe, stored);
                if similarity > best.similarity {
                    best = MatchResult {
                        identity_id: Some(identity.id.clone()),
                        name: Some(identity.name.clone()),
                        similarity,
                        embedding_index: Some(index),
                        embedding_count: identity.embeddings.len(),
                    };
                }
            }
        }

        tracing::debug!(
            name = best.name.as_deref().unwrap_or(""),
            similarity = best.similarity,
            "best match"
        );
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FaceBox;

    fn identity(id: &str, name: &str, embeddings: Vec<Vec<f32>>) -> Identity {
        Identity {
            id: id.into(),
            name: name.into(),
            embeddings,
            groups: vec![],
            thumbnail: None,
        }
    }

    fn face(x: f32, embedding: Vec<f32>) -> DetectedFace {
        DetectedFace::new(FaceBox::new(x, 0.2, 0.1, 0.2), embedding)
    }

    #[test]
    fn test_match_one_picks_best_embedding_index() {
        let roster = vec![identity(
            "1",
            "ALICE",
            vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0], vec![0.7, 0.7, 0.0]],
        )];
        let result = CosineMatcher.match_one(&[1.0, 0.0, 0.0], &roster);
        assert_eq!(result.name.as_deref(), Some("ALICE"));
        assert_eq!(result.identity_id.as_deref(), Some("1"));
        assert_eq!(result.embedding_index, Some(1));
        assert_eq!(result.embedding_count, 3);
        assert_eq!(result.similarity, 100);
    }

    #[test]
    fn test_match_one_tie_keeps_first_found() {
        let roster = vec![
            identity("1", "ALICE", vec![vec![1.0, 0.0]]),
            identity("2", "BOB", vec![vec![2.0, 0.0]]),
        ];
        let result = CosineMatcher.match_one(&[1.0, 0.0], &roster);
        assert_eq!(result.name.as_deref(), Some("ALICE"));
    }

    #[test]
    fn test_match_one_scans_whole_roster() {
        let roster = vec![
            identity("1", "DECOY", vec![vec![0.0, 1.0, 0.0]]),
            identity("2", "OTHER", vec![vec![0.0, 0.0, 1.0]]),
            identity("3", "TARGET", vec![vec![1.0, 0.1, 0.0]]),
        ];
        let result = CosineMatcher.match_one(&[1.0, 0.0, 0.0], &roster);
        assert_eq!(result.name.as_deref(), Some("TARGET"));
    }

    #[test]
    fn test_match_one_skips_malformed_embeddings() {
        let roster = vec![
            identity("1", "EMPTY", vec![]),
            identity("2", "WRONG_LEN", vec![vec![1.0, 0.0, 0.0, 0.0], vec![]]),
            identity("3", "GOOD", vec![vec![0.6, 0.8]]),
        ];
        let result = CosineMatcher.match_one(&[1.0, 0.0], &roster);
        assert_eq!(result.name.as_deref(), Some("GOOD"));
        assert_eq!(result.similarity, 60);
    }

    #[test]
    fn test_match_one_no_match() {
        let roster = vec![identity("1", "OPPOSITE", vec![vec![-1.0, 0.0]])];
        let result = CosineMatcher.match_one(&[1.0, 0.0], &roster);
        assert_eq!(result, MatchResult::none());

        assert_eq!(CosineMatcher.match_one(&[1.0, 0.0], &[]), MatchResult::none());
        assert_eq!(CosineMatcher.match_one(&[], &roster), MatchResult::none());
    }

    #[test]
    fn test_match_all_orders_left_to_right() {
        let roster = vec![
            identity("1", "ALICE", vec![vec![1.0, 0.0]]),
            identity("2", "BOB", vec![vec![0.0, 1.0]]),
        ];
        let faces = vec![face(0.7, vec![1.0, 0.0]), face(0.2, vec![0.0, 1.0])];
        let matched = CosineMatcher.match_all(&faces, &roster);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].name(), Some("BOB"));
        assert_eq!(matched[1].name(), Some("ALICE"));
    }

    #[test]
    fn test_match_all_is_idempotent() {
        let roster = vec![
            identity("1", "ALICE", vec![vec![1.0, 0.0], vec![0.9, 0.1]]),
            identity("2", "BOB", vec![vec![0.0, 1.0]]),
        ];
        let faces = vec![face(0.5, vec![0.8, 0.2]), face(0.1, vec![0.1, 0.9])];
        let once = CosineMatcher.match_all(&faces, &roster);
        let twice = CosineMatcher.match_all(&once, &roster);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_match_all_empty() {
        assert!(CosineMatcher.match_all(&[], &[]).is_empty());
    }
}
