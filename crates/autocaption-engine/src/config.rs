use autocaption_core::CaptionConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrent detection requests (default: 3).
    pub concurrency: usize,
    /// Timeout for one detector call.
    pub detection_timeout: Duration,
    /// Base URL of the recognition server.
    pub server_url: String,
    /// Path to the roster JSON file.
    pub roster_path: PathBuf,
    /// Optional TOML file with caption thresholds.
    pub thresholds_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from `AUTOCAPTION_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("autocaption");

        let roster_path = std::env::var("AUTOCAPTION_ROSTER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("roster.json"));

        Self {
            concurrency: env_usize("AUTOCAPTION_CONCURRENCY", 3),
            detection_timeout: Duration::from_secs(env_u64(
                "AUTOCAPTION_DETECTION_TIMEOUT_SECS",
                30,
            )),
            server_url: std::env::var("AUTOCAPTION_SERVER_URL")
                .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string()),
            roster_path,
            thresholds_path: std::env::var("AUTOCAPTION_THRESHOLDS_PATH")
                .ok()
                .map(PathBuf::from),
        }
    }
}

/// Parse caption thresholds from TOML; missing keys take their defaults.
pub fn parse_thresholds(raw: &str, path: &Path) -> Result<CaptionConfig, ConfigError> {
    toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load caption thresholds, falling back to defaults when no file is given.
pub fn load_thresholds(path: Option<&Path>) -> Result<CaptionConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(CaptionConfig::default());
    };
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_thresholds(&raw, path)?;
    tracing::debug!(path = %path.display(), ?config, "loaded caption thresholds");
    Ok(config)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autocaption_core::GroupFilter;

    #[test]
    fn test_parse_thresholds_partial() {
        let cfg = parse_thresholds(
            r#"
similarity_threshold = 65
border_margin_percent = 5.0
filter_group = "Under 15"
is_football_team = true
"#,
            Path::new("thresholds.toml"),
        )
        .unwrap();
        assert_eq!(cfg.similarity_threshold, 65);
        assert!((cfg.border_margin_percent - 5.0).abs() < 1e-6);
        assert_eq!(cfg.filter_group, GroupFilter::Named("Under 15".into()));
        assert!(cfg.is_football_team);
        assert_eq!(cfg.max_number_of_faces, 20);
    }

    #[test]
    fn test_parse_thresholds_rejects_bad_types() {
        let err =
            parse_thresholds("similarity_threshold = \"high\"", Path::new("t.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_thresholds_default_without_file() {
        assert_eq!(load_thresholds(None).unwrap(), CaptionConfig::default());
    }
}
