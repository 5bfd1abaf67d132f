//! Per-call caption thresholds.

use serde::{Deserialize, Serialize};

/// Sentinel value selecting identities with no group membership.
pub const NO_GROUP_SENTINEL: &str = "__no_group__";

/// Group restriction applied to matched identities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum GroupFilter {
    #[default]
    Any,
    /// Only identities without any group.
    NoGroup,
    /// Only members of this group (case-insensitive).
    Named(String),
}

impl GroupFilter {
    pub fn is_active(&self) -> bool {
        !matches!(self, GroupFilter::Any)
    }

    /// Whether an identity with the given groups passes this filter.
    pub fn admits(&self, groups: &[String]) -> bool {
        match self {
            GroupFilter::Any => true,
            GroupFilter::NoGroup => groups.is_empty(),
            GroupFilter::Named(name) => {
                let wanted = name.to_uppercase();
                groups.iter().any(|g| g.to_uppercase() == wanted)
            }
        }
    }
}

impl From<Option<String>> for GroupFilter {
    fn from(value: Option<String>) -> Self {
        match value {
            None => GroupFilter::Any,
            Some(s) if s.is_empty() => GroupFilter::Any,
            Some(s) if s == NO_GROUP_SENTINEL => GroupFilter::NoGroup,
            Some(s) => GroupFilter::Named(s),
        }
    }
}

impl From<GroupFilter> for Option<String> {
    fn from(value: GroupFilter) -> Self {
        match value {
            GroupFilter::Any => None,
            GroupFilter::NoGroup => Some(NO_GROUP_SENTINEL.to_string()),
            GroupFilter::Named(s) => Some(s),
        }
    }
}

/// Thresholds and layout switches for one caption-generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    /// Minimum match similarity percentage (0–100).
    pub similarity_threshold: u8,
    /// Minimum face height relative to the tallest face, in percent (0–100).
    pub face_size_threshold_percent: f32,
    /// Keep at most this many faces, tallest first.
    pub max_number_of_faces: usize,
    /// Inset from the photo edges in percent of the shorter side (0–100).
    pub border_margin_percent: f32,
    /// Photo width divided by height.
    pub photo_ratio: f32,
    pub filter_group: GroupFilter,
    /// Two-row standing/crouching layout.
    pub is_football_team: bool,
    pub use_title_case: bool,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 50,
            face_size_threshold_percent: 40.0,
            max_number_of_faces: 20,
            border_margin_percent: 0.0,
            photo_ratio: 1.0,
            filter_group: GroupFilter::Any,
            is_football_team: false,
            use_title_case: false,
        }
    }
}
