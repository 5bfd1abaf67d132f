//! Roster persistence as a JSON array of identity records.

use autocaption_core::{IdentityRecord, Roster};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
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
        source: serde_json::Error,
    },
    #[error("encoding roster: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Load the roster; a missing file is an empty roster.
pub fn load_roster(path: &Path) -> Result<Roster, StoreError> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no roster file; starting empty");
        return Ok(Roster::new());
    }
    let raw = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records: Vec<IdentityRecord> =
        serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Roster::from_records(records))
}

pub fn save_roster(roster: &Roster, path: &Path) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let data = serde_json::to_string_pretty(&roster.to_records()).map_err(StoreError::Encode)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, data).map_err(io_err)?;
    tracing::info!(path = %path.display(), identities = roster.len(), "roster saved");
    Ok(())
}
