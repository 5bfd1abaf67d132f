//! autocaption-core — Face matching and caption synthesis.
//!
//! Matches detected face embeddings against an enrolled roster by cosine
//! similarity, filters faces for caption admissibility, and renders the
//! left-to-right caption (including the two-row team layout). Pure and
//! synchronous: no I/O, no global state.

pub mod caption;
pub mod config;
pub mod detection;
pub mod filter;
pub mod matcher;
pub mod roster;
pub mod types;
pub mod vector;

pub use caption::{compose, persons, Connectives};
pub use config::{CaptionConfig, GroupFilter};
pub use detection::{DetectionError, DetectionResponse};
pub use filter::{Admissibility, FaceFilter, GroupLookup};
pub use matcher::{CosineMatcher, Matcher};
pub use roster::{IdentityRecord, Roster, RosterError};
pub use types::{DetectedFace, FaceBox, Identity, MatchResult};
