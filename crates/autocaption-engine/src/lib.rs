//! autocaption-engine — Recognition passes over a photo gallery.
//!
//! Wraps detector calls and roster matching in a bounded-concurrency
//! priority queue so a whole folder can be recognized without saturating
//! the external recognition service.

pub mod config;
pub mod detector;
pub mod queue;
pub mod recognition;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use detector::{Detection, Detector, DetectorError, HttpDetector, SidecarDetector};
pub use queue::{QueueError, QueueStats, RecognitionQueue};
pub use recognition::{PhotoOutcome, Recognizer};
pub use store::{load_roster, save_roster, StoreError};
