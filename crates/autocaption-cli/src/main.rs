use anyhow::{bail, Context, Result};
use autocaption_core::roster::{check_enrollable, normalize_name, EnrollOutcome};
use autocaption_core::{caption, CaptionConfig, CosineMatcher, GroupFilter, Matcher, Roster};
use autocaption_engine::detector::{
    sidecar_path, Detection, Detector, HttpDetector, SidecarDetector,
};
use autocaption_engine::{
    config, load_roster, save_roster, EngineConfig, RecognitionQueue, Recognizer,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

const PHOTO_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tif", "tiff"];

#[derive(Parser)]
#[command(name = "autocaption", about = "Face-matching photo captioner")]
struct Cli {
    /// Roster JSON file (default: $AUTOCAPTION_ROSTER_PATH or the data directory)
    #[arg(long, global = true)]
    roster: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ThresholdArgs {
    /// TOML file with caption thresholds
    #[arg(long)]
    thresholds: Option<PathBuf>,
    /// Minimum similarity percentage
    #[arg(long)]
    similarity: Option<u8>,
    /// Minimum face height relative to the tallest face, in percent
    #[arg(long)]
    face_size: Option<f32>,
    /// Maximum number of faces, tallest first
    #[arg(long)]
    max_faces: Option<usize>,
    /// Border margin in percent of the shorter side
    #[arg(long)]
    border: Option<f32>,
    /// Only caption members of this group
    #[arg(long, conflicts_with = "no_group")]
    group: Option<String>,
    /// Only caption people without a group
    #[arg(long)]
    no_group: bool,
    /// Two-row team photo layout
    #[arg(long)]
    team: bool,
    /// "Mario Rossi" instead of "MARIO ROSSI"
    #[arg(long)]
    title_case: bool,
}

impl ThresholdArgs {
    fn resolve(&self, env: &EngineConfig) -> Result<CaptionConfig> {
        let path = self.thresholds.as_deref().or(env.thresholds_path.as_deref());
        let mut cfg = config::load_thresholds(path)?;

        if let Some(v) = self.similarity {
            cfg.similarity_threshold = v;
        }
        if let Some(v) = self.face_size {
            cfg.face_size_threshold_percent = v;
        }
        if let Some(v) = self.max_faces {
            cfg.max_number_of_faces = v;
        }
        if let Some(v) = self.border {
            cfg.border_margin_percent = v;
        }
        if let Some(group) = &self.group {
            cfg.filter_group = GroupFilter::Named(group.clone());
        }
        if self.no_group {
            cfg.filter_group = GroupFilter::NoGroup;
        }
        cfg.is_football_team |= self.team;
        cfg.use_title_case |= self.title_case;

        if cfg.max_number_of_faces == 0 {
            bail!("max faces must be at least 1");
        }
        Ok(cfg)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum DetectorKind {
    /// Upload photos to the recognition server
    Http,
    /// Read stored `<photo>.json` replies
    Sidecar,
}

#[derive(Subcommand)]
enum Commands {
    /// Match the faces of a detector reply against the roster
    Match {
        /// Recognition-server reply (JSON)
        detection: PathBuf,
    },
    /// Compose the caption for a detector reply
    Caption {
        detection: PathBuf,
        #[command(flatten)]
        thresholds: ThresholdArgs,
    },
    /// List admissible people, one per line
    Persons {
        detection: PathBuf,
        #[command(flatten)]
        thresholds: ThresholdArgs,
    },
    /// Recognize and caption every photo in a folder
    Batch {
        /// Folder of photos
        dir: PathBuf,
        /// Where face detections come from
        #[arg(long, value_enum, default_value_t = DetectorKind::Http)]
        detector: DetectorKind,
        /// Recognition server URL (default: $AUTOCAPTION_SERVER_URL)
        #[arg(long)]
        server_url: Option<String>,
        /// Concurrent detector calls
        #[arg(long)]
        concurrency: Option<usize>,
        #[command(flatten)]
        thresholds: ThresholdArgs,
    },
    /// Enroll a detected face under a name
    Enroll {
        detection: PathBuf,
        /// Face index, left to right
        #[arg(long)]
        face: usize,
        #[arg(long)]
        name: String,
        /// Group membership (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,
    },
    /// List roster groups
    Groups,
    /// Check that the recognition server is up
    Health {
        #[arg(long)]
        server_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let env = EngineConfig::from_env();
    let roster_path = cli.roster.clone().unwrap_or_else(|| env.roster_path.clone());
    let roster = load_roster(&roster_path)?;

    match cli.command {
        Commands::Match { detection } => {
            let detection = read_detection(&detection)?;
            let faces = CosineMatcher.match_all(&detection.faces, roster.identities());
            println!("{}", serde_json::to_string_pretty(&faces)?);
        }
        Commands::Caption {
            detection,
            thresholds,
        } => {
            let mut cfg = thresholds.resolve(&env)?;
            let detection = read_detection(&detection)?;
            cfg.photo_ratio = detection.photo_ratio();
            let matching = matching_roster(&roster, &cfg);
            let faces = CosineMatcher.match_all(&detection.faces, matching.identities());
            println!("{}", caption::compose(&faces, &cfg, &roster));
        }
        Commands::Persons {
            detection,
            thresholds,
        } => {
            let mut cfg = thresholds.resolve(&env)?;
            let detection = read_detection(&detection)?;
            cfg.photo_ratio = detection.photo_ratio();
            let matching = matching_roster(&roster, &cfg);
            let faces = CosineMatcher.match_all(&detection.faces, matching.identities());
            for name in caption::persons(&faces, &cfg, &roster) {
                println!("{name}");
            }
        }
        Commands::Batch {
            dir,
            detector,
            server_url,
            concurrency,
            thresholds,
        } => {
            let cfg = thresholds.resolve(&env)?;
            let concurrency = concurrency.unwrap_or(env.concurrency);
            match detector {
                DetectorKind::Sidecar => {
                    let photos = gallery(&dir, true)?;
                    run_batch(SidecarDetector, photos, concurrency, &env, roster, cfg).await?;
                }
                DetectorKind::Http => {
                    let detector = http_detector(server_url, &env)?;
                    ensure_healthy(&detector).await?;
                    let photos = gallery(&dir, false)?;
                    run_batch(detector, photos, concurrency, &env, roster, cfg).await?;
                }
            }
        }
        Commands::Enroll {
            detection,
            face,
            name,
            groups,
        } => {
            let mut roster = roster;
            let detection = read_detection(&detection)?;
            let faces = CosineMatcher.match_all(&detection.faces, roster.identities());
            let Some(target) = faces.get(face) else {
                bail!("face {face} out of range ({} detected)", faces.len());
            };
            check_enrollable(target)?;

            match roster.enroll(&name, target.embedding.clone(), groups)? {
                EnrollOutcome::Created { id } => {
                    println!("enrolled {} as {id}", normalize_name(&name))
                }
                EnrollOutcome::Extended { id, embeddings } => {
                    println!("added embedding to {id} ({embeddings} total)")
                }
            }
            save_roster(&roster, &roster_path)?;
        }
        Commands::Groups => {
            for group in roster.group_names() {
                println!("{group}");
            }
        }
        Commands::Health { server_url } => {
            let detector = http_detector(server_url, &env)?;
            ensure_healthy(&detector).await?;
            println!("recognition server at {} is healthy", detector.base_url());
        }
    }

    Ok(())
}

fn read_detection(path: &Path) -> Result<Detection> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading detection {}", path.display()))?;
    Ok(SidecarDetector::parse(path, &raw)?)
}

/// With a group filter active, match only against that group's members.
fn matching_roster(roster: &Roster, cfg: &CaptionConfig) -> Roster {
    if cfg.filter_group.is_active() {
        roster.restrict_to_group(&cfg.filter_group)
    } else {
        roster.clone()
    }
}

fn http_detector(server_url: Option<String>, env: &EngineConfig) -> Result<HttpDetector> {
    let url = server_url.unwrap_or_else(|| env.server_url.clone());
    HttpDetector::new(url, env.detection_timeout).context("building HTTP client")
}

async fn ensure_healthy(detector: &HttpDetector) -> Result<()> {
    let healthy = detector
        .health()
        .await
        .with_context(|| format!("contacting recognition server at {}", detector.base_url()))?;
    if !healthy {
        bail!("recognition server at {} is not ready", detector.base_url());
    }
    Ok(())
}

/// Photos in `dir`, sorted. With `need_sidecar`, photos without a stored
/// reply are skipped.
fn gallery(dir: &Path, need_sidecar: bool) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
    let mut photos = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_photo = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| PHOTO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if !is_photo {
            continue;
        }
        if need_sidecar && !sidecar_path(&path).exists() {
            tracing::warn!(photo = %path.display(), "no detector reply; skipping");
            continue;
        }
        photos.push(path);
    }
    photos.sort();
    Ok(photos)
}

async fn run_batch<D: Detector>(
    detector: D,
    photos: Vec<PathBuf>,
    concurrency: usize,
    env: &EngineConfig,
    roster: Roster,
    cfg: CaptionConfig,
) -> Result<()> {
    let total = photos.len();

    let queue = RecognitionQueue::new(concurrency)?;
    let recognizer = Recognizer::new(
        detector,
        matching_roster(&roster, &cfg),
        queue,
        env.detection_timeout,
    );

    let mut progress = recognizer.subscribe();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let stats = *progress.borrow_and_update();
            tracing::info!(
                processed = stats.processed,
                active = stats.active,
                pending = stats.pending,
                total,
                "recognition progress"
            );
        }
    });

    recognizer.start_pass(photos);
    tokio::select! {
        _ = recognizer.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted; finishing running photos");
            recognizer.abort();
            recognizer.wait_idle().await;
        }
    }
    reporter.abort();

    let mut failed = 0usize;
    for (photo, outcome) in recognizer.outcomes() {
        if outcome.error {
            failed += 1;
            tracing::warn!(photo = %photo.display(), "recognition failed");
            continue;
        }
        let photo_cfg = CaptionConfig {
            photo_ratio: outcome.photo_ratio,
            ..cfg.clone()
        };
        let text = caption::compose(&outcome.faces, &photo_cfg, &roster);
        let name = photo
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        println!("{name}\t{text}");
    }

    tracing::info!(
        total,
        failed,
        processed = recognizer.progress().processed,
        "batch complete"
    );
    Ok(())
}
