//! Per-face admissibility rules for caption inclusion.
//!
//! A face must carry a matched name and satisfy every threshold in
//! [`CaptionConfig`]: similarity, relative size, count cap, border margin
//! and group membership.

use crate::config::CaptionConfig;
use crate::types::{DetectedFace, Identity};
use std::collections::HashMap;

/// Resolves the group memberships of a matched identity by name.
pub trait GroupLookup {
    fn groups_for(&self, name: &str) -> Option<&[String]>;
}

impl GroupLookup for HashMap<String, Vec<String>> {
    fn groups_for(&self, name: &str) -> Option<&[String]> {
        self.get(name).map(Vec::as_slice)
    }
}

impl GroupLookup for [Identity] {
    fn groups_for(&self, name: &str) -> Option<&[String]> {
        self.iter()
            .find(|identity| identity.name == name)
            .map(|identity| identity.groups.as_slice())
    }
}

/// Which individual rules a face satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterReasons {
    pub meets_name: bool,
    pub meets_similarity: bool,
    pub meets_size: bool,
    pub meets_count: bool,
    pub meets_border: bool,
    pub meets_group: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admissibility {
    pub admissible: bool,
    pub reasons: FilterReasons,
}

/// Tallest face height in a photo (0 for no faces).
pub fn tallest_height(faces: &[DetectedFace]) -> f32 {
    faces.iter().map(|f| f.bbox.height).fold(0.0, f32::max)
}

/// Convert a border margin percentage into (x, y) fractional margins.
///
/// The margin is measured on the shorter side, so the pixel inset is equal
/// on all four edges regardless of orientation.
pub fn border_margins(margin_percent: f32, photo_ratio: f32) -> (f32, f32) {
    let margin = margin_percent / 100.0;
    if photo_ratio > 1.0 {
        (margin / photo_ratio, margin)
    } else {
        (margin, margin * photo_ratio)
    }
}

/// Admissibility evaluator bound to one photo's config and tallest face.
pub struct FaceFilter<'a, G: GroupLookup + ?Sized> {
    config: &'a CaptionConfig,
    tallest_height: f32,
    groups: &'a G,
}

impl<'a, G: GroupLookup + ?Sized> FaceFilter<'a, G> {
    pub fn new(config: &'a CaptionConfig, tallest_height: f32, groups: &'a G) -> Self {
        Self {
            config,
            tallest_height,
            groups,
        }
    }

    /// Evaluate one face; `rank` is its 0-based position in the tallest-first ordering.
    pub fn evaluate(&self, face: &DetectedFace, rank: usize) -> Admissibility {
        let name = face.name();
        let reasons = FilterReasons {
            meets_name: name.is_some(),
            meets_similarity: face.matched.similarity >= self.config.similarity_threshold,
            meets_size: self.meets_size(face),
            meets_count: rank < self.config.max_number_of_faces,
            meets_border: self.meets_border(face),
            meets_group: name.map_or(true, |n| self.meets_group(n)),
        };

        Admissibility {
            admissible: reasons.meets_name
                && reasons.meets_similarity
                && reasons.meets_size
                && reasons.meets_count
                && reasons.meets_border
                && reasons.meets_group,
            reasons,
        }
    }

    fn meets_size(&self, face: &DetectedFace) -> bool {
        if self.tallest_height <= 0.0 {
            return self.config.face_size_threshold_percent <= 0.0;
        }
        (face.bbox.height / self.tallest_height) * 100.0 >= self.config.face_size_threshold_percent
    }

    fn meets_border(&self, face: &DetectedFace) -> bool {
        if self.config.border_margin_percent == 0.0 {
            return true;
        }
        let (mx, my) = border_margins(self.config.border_margin_percent, self.config.photo_ratio);
        let b = &face.bbox;
        b.x >= mx && b.right() <= 1.0 - mx && b.y >= my && b.bottom() <= 1.0 - my
    }

    fn meets_group(&self, name: &str) -> bool {
        let filter = &self.config.filter_group;
        if !filter.is_active() {
            return true;
        }
        let groups = self.groups.groups_for(name).unwrap_or(&[]);
        filter.admits(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GroupFilter;
    use crate::types::{FaceBox, MatchResult};

    fn named(name: &str, similarity: u8, bbox: FaceBox) -> DetectedFace {
        DetectedFace {
            bbox,
            embedding: vec![],
            det_score: None,
            matched: MatchResult {
                identity_id: Some("1".into()),
                name: Some(name.into()),
                similarity,
                embedding_index: Some(0),
                embedding_count: 1,
            },
        }
    }

    fn centered(height: f32) -> FaceBox {
        FaceBox::new(0.4, 0.4, 0.1, height)
    }

    fn no_groups() -> HashMap<String, Vec<String>> {
        HashMap::new()
    }

    #[test]
    fn test_admissible_face() {
        let config = CaptionConfig::default();
        let groups = no_groups();
        let filter = FaceFilter::new(&config, 0.2, &groups);
        let verdict = filter.evaluate(&named("ALICE", 80, centered(0.2)), 0);
        assert!(verdict.admissible);
    }

    #[test]
    fn test_unnamed_face_never_admissible() {
        let config = CaptionConfig {
            similarity_threshold: 0,
            ..Default::default()
        };
        let groups = no_groups();
        let filter = FaceFilter::new(&config, 0.2, &groups);
        let face = DetectedFace::new(centered(0.2), vec![1.0]);
        let verdict = filter.evaluate(&face, 0);
        assert!(!verdict.admissible);
        assert!(!verdict.reasons.meets_name);
        assert!(verdict.reasons.meets_similarity);
    }

    #[test]
    fn test_similarity_threshold_inclusive() {
        let config = CaptionConfig {
            similarity_threshold: 60,
            ..Default::default()
        };
        let groups = no_groups();
        let filter = FaceFilter::new(&config, 0.2, &groups);
        assert!(filter.evaluate(&named("A", 60, centered(0.2)), 0).admissible);
        let verdict = filter.evaluate(&named("A", 59, centered(0.2)), 0);
        assert!(!verdict.admissible);
        assert!(!verdict.reasons.meets_similarity);
    }

    #[test]
    fn test_size_relative_to_tallest() {
        let config = CaptionConfig {
            face_size_threshold_percent: 50.0,
            ..Default::default()
        };
        let groups = no_groups();
        let filter = FaceFilter::new(&config, 0.4, &groups);
        assert!(filter.evaluate(&named("A", 90, centered(0.2)), 0).reasons.meets_size);
        assert!(!filter.evaluate(&named("A", 90, centered(0.19)), 0).reasons.meets_size);
    }

    #[test]
    fn test_count_cap_uses_rank() {
        let config = CaptionConfig {
            max_number_of_faces: 2,
            ..Default::default()
        };
        let groups = no_groups();
        let filter = FaceFilter::new(&config, 0.2, &groups);
        assert!(filter.evaluate(&named("A", 90, centered(0.2)), 1).reasons.meets_count);
        assert!(!filter.evaluate(&named("A", 90, centered(0.2)), 2).reasons.meets_count);
    }

    #[test]
    fn test_border_margin_square_photo() {
        let config = CaptionConfig {
            border_margin_percent: 10.0,
            ..Default::default()
        };
        let groups = no_groups();
        let filter = FaceFilter::new(&config, 0.2, &groups);

        let touching = named("A", 90, FaceBox::new(0.0, 0.4, 0.1, 0.2));
        assert!(!filter.evaluate(&touching, 0).reasons.meets_border);

        let inside = named("A", 90, FaceBox::new(0.1, 0.1, 0.3, 0.2));
        assert!(filter.evaluate(&inside, 0).reasons.meets_border);

        let past_bottom = named("A", 90, FaceBox::new(0.4, 0.75, 0.1, 0.2));
        assert!(!filter.evaluate(&past_bottom, 0).reasons.meets_border);
    }

    #[test]
    fn test_border_zero_always_passes() {
        let config = CaptionConfig::default();
        let groups = no_groups();
        let filter = FaceFilter::new(&config, 0.2, &groups);
        let edge = named("A", 90, FaceBox::new(0.0, 0.0, 0.2, 0.2));
        assert!(filter.evaluate(&edge, 0).reasons.meets_border);
    }

    #[test]
    fn test_border_margins_follow_orientation() {
        let (mx, my) = border_margins(10.0, 2.0);
        assert!((mx - 0.05).abs() < 1e-6);
        assert!((my - 0.1).abs() < 1e-6);

        let (mx, my) = border_margins(10.0, 0.5);
        assert!((mx - 0.1).abs() < 1e-6);
        assert!((my - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_group_filters() {
        let mut groups = HashMap::new();
        groups.insert("ALICE".to_string(), vec!["Under 15".to_string()]);
        groups.insert("BOB".to_string(), vec![]);
        let alice = named("ALICE", 90, centered(0.2));
        let bob = named("BOB", 90, centered(0.2));
        let carol = named("CAROL", 90, centered(0.2));

        let config = CaptionConfig {
            filter_group: GroupFilter::Named("under 15".into()),
            ..Default::default()
        };
        let filter = FaceFilter::new(&config, 0.2, &groups);
        assert!(filter.evaluate(&alice, 0).admissible);
        assert!(!filter.evaluate(&bob, 0).admissible);
        assert!(!filter.evaluate(&carol, 0).admissible);

        let config = CaptionConfig {
            filter_group: GroupFilter::NoGroup,
            ..Default::default()
        };
        let filter = FaceFilter::new(&config, 0.2, &groups);
        assert!(!filter.evaluate(&alice, 0).admissible);
        assert!(filter.evaluate(&bob, 0).admissible);
        // Unknown identities have no groups.
        assert!(filter.evaluate(&carol, 0).admissible);
    }

    #[test]
    fn test_tallest_height() {
        let faces = vec![named("A", 90, centered(0.2)), named("B", 90, centered(0.35))];
        assert!((tallest_height(&faces) - 0.35).abs() < 1e-6);
        assert_eq!(tallest_height(&[]), 0.0);
    }
}
