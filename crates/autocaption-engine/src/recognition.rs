//! Gallery recognition passes.
//!
//! Each photo becomes one queue task: detect faces, then match them against
//! the roster snapshot taken when the task starts. Outcomes are kept per
//! photo so the host can caption them later.

use crate::detector::{Detector, DetectorError};
use crate::queue::{QueueStats, RecognitionQueue};
use autocaption_core::{CosineMatcher, DetectedFace, Matcher, Roster};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// Recognition result for one photo.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoOutcome {
    /// Matched faces, left to right. Empty on error.
    pub faces: Vec<DetectedFace>,
    pub photo_ratio: f32,
    pub error: bool,
}

impl PhotoOutcome {
    fn failed() -> Self {
        Self {
            faces: Vec::new(),
            photo_ratio: 1.0,
            error: true,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Photos in flight. One lock covers both sets so a photo is never in neither
/// while moving from queued to running.
#[derive(Default)]
struct InFlight {
    queued: HashSet<PathBuf>,
    running: HashSet<PathBuf>,
}

impl InFlight {
    fn contains(&self, photo: &Path) -> bool {
        self.queued.contains(photo) || self.running.contains(photo)
    }
}

struct Shared<D> {
    detector: D,
    roster: RwLock<Arc<Roster>>,
    detection_timeout: Duration,
    outcomes: Mutex<HashMap<PathBuf, PhotoOutcome>>,
    in_flight: Mutex<InFlight>,
    /// Bumped by `abort`; tasks from an older generation resolve early.
    generation: AtomicU64,
}

impl<D: Detector> Shared<D> {
    fn roster_snapshot(&self) -> Arc<Roster> {
        let guard = self.roster.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    async fn recognize(&self, photo: PathBuf, generation: u64) -> Result<(), DetectorError> {
        {
            let mut in_flight = lock(&self.in_flight);
            in_flight.queued.remove(&photo);
            in_flight.running.insert(photo.clone());
        }

        let result = self.run(&photo, generation).await;
        lock(&self.in_flight).running.remove(&photo);

        match result {
            Ok(Some(outcome)) => {
                tracing::debug!(
                    photo = %photo.display(),
                    faces = outcome.faces.len(),
                    recognized = outcome.faces.iter().filter(|f| f.name().is_some()).count(),
                    "photo recognized"
                );
                lock(&self.outcomes).insert(photo, outcome);
                Ok(())
            }
            Ok(None) => {
                tracing::debug!(photo = %photo.display(), "recognition aborted");
                Ok(())
            }
            Err(e) => {
                lock(&self.outcomes).insert(photo, PhotoOutcome::failed());
                Err(e)
            }
        }
    }

    /// `Ok(None)` when the pass was aborted.
    async fn run(
        &self,
        photo: &Path,
        generation: u64,
    ) -> Result<Option<PhotoOutcome>, DetectorError> {
        if self.is_stale(generation) {
            return Ok(None);
        }
        let roster = self.roster_snapshot();

        let detection = tokio::time::timeout(self.detection_timeout, self.detector.detect(photo))
            .await
            .map_err(|_| DetectorError::Timeout(self.detection_timeout))??;

        if self.is_stale(generation) {
            return Ok(None);
        }

        let faces = CosineMatcher.match_all(&detection.faces, roster.identities());
        Ok(Some(PhotoOutcome {
            faces,
            photo_ratio: detection.photo_ratio(),
            error: false,
        }))
    }
}

/// Drives detection and matching for a gallery of photos through a [`RecognitionQueue`].
pub struct Recognizer<D> {
    shared: Arc<Shared<D>>,
    queue: RecognitionQueue,
}

impl<D: Detector> Recognizer<D> {
    pub fn new(
        detector: D,
        roster: Roster,
        queue: RecognitionQueue,
        detection_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                detector,
                roster: RwLock::new(Arc::new(roster)),
                detection_timeout,
                outcomes: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(InFlight::default()),
                generation: AtomicU64::new(0),
            }),
            queue,
        }
    }

    /// Replace the roster. Tasks already running keep their snapshot.
    pub fn set_roster(&self, roster: Roster) {
        let mut guard = self.shared.roster.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(roster);
    }

    pub fn roster(&self) -> Arc<Roster> {
        self.shared.roster_snapshot()
    }

    /// Enqueue one photo. Returns false if it is already queued or running.
    pub fn submit(&self, photo: PathBuf, priority: i32) -> bool {
        {
            let mut in_flight = lock(&self.shared.in_flight);
            if in_flight.contains(&photo) {
                return false;
            }
            in_flight.queued.insert(photo.clone());
        }

        let generation = self.shared.generation.load(Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        self.queue.enqueue(
            move || async move { shared.recognize(photo, generation).await },
            priority,
        );
        true
    }

    /// Start a fresh pass: drop pending work, reset progress, enqueue every photo.
    pub fn start_pass<I>(&self, photos: I) -> usize
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.queue.clear();
        lock(&self.shared.in_flight).queued.clear();
        self.queue.reset_counters();

        let submitted = photos
            .into_iter()
            .filter(|photo| self.submit(photo.clone(), 0))
            .count();
        tracing::info!(
            photos = submitted,
            concurrency = self.queue.concurrency(),
            "recognition pass started"
        );
        submitted
    }

    /// Abandon the current work: pending photos are dropped and running ones
    /// resolve early without an outcome. Photos submitted afterwards run normally.
    pub fn abort(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.queue.clear();
        lock(&self.shared.in_flight).queued.clear();
        tracing::info!("recognition pass aborted");
    }

    pub fn outcome(&self, photo: &Path) -> Option<PhotoOutcome> {
        lock(&self.shared.outcomes).get(photo).cloned()
    }

    /// All outcomes, ordered by photo path.
    pub fn outcomes(&self) -> Vec<(PathBuf, PhotoOutcome)> {
        let mut all: Vec<_> = lock(&self.shared.outcomes)
            .iter()
            .map(|(path, outcome)| (path.clone(), outcome.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn progress(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueStats> {
        self.queue.subscribe()
    }

    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detection;
    use autocaption_core::{FaceBox, IdentityRecord};
    use std::sync::atomic::AtomicUsize;

    /// Serves canned detections; photos named `fail*` error, `slow*` sleep.
    struct CannedDetector {
        calls: AtomicUsize,
    }

    impl Detector for CannedDetector {
        async fn detect(&self, photo: &Path) -> Result<Detection, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let stem = photo.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem.starts_with("fail") {
                return Err(DetectorError::Io {
                    path: photo.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
                });
            }
            if stem.starts_with("slow") {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok(Detection {
                faces: vec![
                    DetectedFace::new(FaceBox::new(0.6, 0.2, 0.1, 0.2), vec![0.0, 1.0]),
                    DetectedFace::new(FaceBox::new(0.1, 0.2, 0.1, 0.2), vec![1.0, 0.0]),
                ],
                width: 1200,
                height: 800,
            })
        }
    }

    fn roster() -> Roster {
        let records: Vec<IdentityRecord> = serde_json::from_str(
            r#"[{"id": 1, "name": "alice", "descriptor": [1, 0]},
                {"id": 2, "name": "bob", "descriptor": [[0, 1]]}]"#,
        )
        .unwrap();
        Roster::from_records(records)
    }

    fn recognizer(timeout: Duration) -> Recognizer<CannedDetector> {
        Recognizer::new(
            CannedDetector {
                calls: AtomicUsize::new(0),
            },
            roster(),
            RecognitionQueue::new(2).unwrap(),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_pass_matches_every_photo() {
        let rec = recognizer(Duration::from_secs(5));
        let photos: Vec<PathBuf> = ["a.jpg", "b.jpg", "fail.jpg"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(rec.start_pass(photos), 3);
        rec.wait_idle().await;

        assert_eq!(rec.progress().processed, 3);
        let a = rec.outcome(Path::new("a.jpg")).unwrap();
        assert!(!a.error);
        assert!((a.photo_ratio - 1.5).abs() < 1e-6);
        let names: Vec<_> = a.faces.iter().filter_map(|f| f.name()).collect();
        assert_eq!(names, vec!["ALICE", "BOB"]);

        let failed = rec.outcome(Path::new("fail.jpg")).unwrap();
        assert!(failed.error);
        assert!(failed.faces.is_empty());
        assert_eq!(rec.outcomes().len(), 3);
    }

    #[tokio::test]
    async fn test_submit_guards_duplicates() {
        let rec = recognizer(Duration::from_secs(5));
        assert!(rec.submit(PathBuf::from("slow.jpg"), 0));
        assert!(!rec.submit(PathBuf::from("slow.jpg"), 9));
        rec.wait_idle().await;
        assert_eq!(rec.shared.detector.calls.load(Ordering::SeqCst), 1);

        // Finished photos can be re-run.
        assert!(rec.submit(PathBuf::from("slow.jpg"), 0));
        rec.wait_idle().await;
        assert_eq!(rec.shared.detector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_marks_error() {
        let rec = recognizer(Duration::from_millis(10));
        rec.submit(PathBuf::from("slow.jpg"), 0);
        rec.wait_idle().await;
        assert!(rec.outcome(Path::new("slow.jpg")).unwrap().error);
    }

    #[tokio::test]
    async fn test_abort_drops_pending_and_skips_results() {
        let rec = recognizer(Duration::from_secs(5));
        let photos: Vec<PathBuf> = (0..6)
            .map(|i| PathBuf::from(format!("slow-{i}.jpg")))
            .collect();
        rec.start_pass(photos);
        assert_eq!(rec.progress().active, 2);

        rec.abort();
        assert_eq!(rec.progress().pending, 0);
        rec.wait_idle().await;

        assert_eq!(rec.progress().processed, 2);
        assert!(rec.outcomes().is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_abort_is_recognized() {
        let rec = recognizer(Duration::from_secs(5));
        rec.abort();

        assert!(rec.submit(PathBuf::from("a.jpg"), 0));
        rec.wait_idle().await;

        let a = rec.outcome(Path::new("a.jpg")).unwrap();
        assert!(!a.error);
        assert_eq!(a.faces.len(), 2);
        assert_eq!(rec.shared.detector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_spares_later_submissions() {
        let rec = recognizer(Duration::from_secs(5));
        rec.submit(PathBuf::from("slow-old.jpg"), 0);
        rec.abort();
        rec.submit(PathBuf::from("slow-new.jpg"), 0);
        rec.wait_idle().await;

        assert!(rec.outcome(Path::new("slow-old.jpg")).is_none());
        assert!(rec.outcome(Path::new("slow-new.jpg")).is_some());
    }

    #[tokio::test]
    async fn test_guard_holds_while_running() {
        let rec = recognizer(Duration::from_secs(5));
        assert!(rec.submit(PathBuf::from("slow.jpg"), 0));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let in_flight = lock(&rec.shared.in_flight);
        assert!(in_flight.running.contains(Path::new("slow.jpg")));
        assert!(!in_flight.queued.contains(Path::new("slow.jpg")));
        drop(in_flight);

        assert!(!rec.submit(PathBuf::from("slow.jpg"), 0));
        rec.wait_idle().await;
        assert!(lock(&rec.shared.in_flight).running.is_empty());
    }

    #[tokio::test]
    async fn test_roster_swap_applies_to_next_pass() {
        let rec = recognizer(Duration::from_secs(5));
        rec.set_roster(Roster::new());
        rec.start_pass(vec![PathBuf::from("a.jpg")]);
        rec.wait_idle().await;
        let a = rec.outcome(Path::new("a.jpg")).unwrap();
        assert!(a.faces.iter().all(|f| f.name().is_none()));
        assert!(rec.roster().is_empty());
    }
}
