use serde::{Deserialize, Serialize};

/// Face bounding box in normalized image coordinates (fractions of width/height, 0..1).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Result of matching one detected face against the roster.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchResult {
    /// ID of the matched identity (if any).
    pub identity_id: Option<String>,
    /// Upper-case name of the matched identity (if any).
    pub name: Option<String>,
    /// Similarity percentage of the best match [0, 100]; 0 when unmatched.
    pub similarity: u8,
    /// Index of the stored embedding that produced the best score.
    pub embedding_index: Option<usize>,
    /// Number of embeddings enrolled for the matched identity.
    pub embedding_count: usize,
}

impl MatchResult {
    /// The zero result: no identity, similarity 0.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_match(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// A face found by the external detector, optionally annotated with its match.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(flatten)]
    pub bbox: FaceBox,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub det_score: Option<f32>,
    #[serde(default)]
    pub matched: MatchResult,
}

impl DetectedFace {
    pub fn new(bbox: FaceBox, embedding: Vec<f32>) -> Self {
        Self {
            bbox,
            embedding,
            det_score: None,
            matched: MatchResult::none(),
        }
    }

    /// Matched name, or `None` for an unrecognized face.
    pub fn name(&self) -> Option<&str> {
        self.matched.name.as_deref().filter(|n| !n.is_empty())
    }
}

/// An enrolled person: one or more embeddings plus group memberships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    /// Upper-case, unique within a roster.
    pub name: String,
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}
