//! Face detector seam.
//!
//! The real detector is the external recognition server, reached over HTTP by
//! [`HttpDetector`]. [`SidecarDetector`] reads the same JSON reply stored next
//! to each photo, which keeps offline passes reproducible.

use autocaption_core::detection::{self, DetectionError, DetectionResponse};
use autocaption_core::DetectedFace;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
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
    #[error("invalid detection: {0}")]
    Detection(#[from] DetectionError),
    #[error("recognition server request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("face detection timed out after {0:?}")]
    Timeout(Duration),
}

/// Faces found in one photo, boxes normalized to the image size.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub faces: Vec<DetectedFace>,
    pub width: u32,
    pub height: u32,
}

impl Detection {
    pub fn photo_ratio(&self) -> f32 {
        detection::photo_ratio(self.width, self.height)
    }

    /// Decode a recognition-server reply. `source` names the reply in errors.
    pub fn from_reply(source: &Path, raw: &str) -> Result<Self, DetectorError> {
        let response: DetectionResponse =
            serde_json::from_str(raw).map_err(|e| DetectorError::Parse {
                path: source.to_path_buf(),
                source: e,
            })?;
        let (width, height) = response.dimensions()?;
        let faces = response.into_faces(width, height)?;
        Ok(Self {
            faces,
            width,
            height,
        })
    }
}

/// Source of detected faces and embeddings for a photo.
pub trait Detector: Send + Sync + 'static {
    fn detect(&self, photo: &Path) -> impl Future<Output = Result<Detection, DetectorError>> + Send;
}

/// Path of the stored detector reply for a photo (`<photo>.json`).
pub fn sidecar_path(photo: &Path) -> PathBuf {
    let mut path = photo.as_os_str().to_owned();
    path.push(".json");
    PathBuf::from(path)
}

/// Detector backed by stored recognition-server replies.
#[derive(Debug, Clone, Default)]
pub struct SidecarDetector;

impl SidecarDetector {
    /// Parse a stored reply without going through a photo path.
    pub fn parse(path: &Path, raw: &str) -> Result<Detection, DetectorError> {
        Detection::from_reply(path, raw)
    }
}

impl Detector for SidecarDetector {
    async fn detect(&self, photo: &Path) -> Result<Detection, DetectorError> {
        let path = sidecar_path(photo);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| DetectorError::Io {
                path: path.clone(),
                source,
            })?;
        let detection = Self::parse(&path, &raw)?;
        tracing::info!(
            photo = %photo.display(),
            faces = detection.faces.len(),
            width = detection.width,
            height = detection.height,
            "detected faces"
        );
        Ok(detection)
    }
}

#[derive(Debug, Deserialize)]
struct HealthReply {
    status: String,
    service: String,
}

/// Detector that uploads each photo to the recognition server's
/// `POST /detect_faces` endpoint as a multipart `file` field.
#[derive(Debug, Clone)]
pub struct HttpDetector {
    client: Client,
    base_url: String,
}

impl HttpDetector {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DetectorError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("autocaption/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`: true when the server reports a healthy recognition service.
    pub async fn health(&self) -> Result<bool, DetectorError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "recognition server unhealthy");
            return Ok(false);
        }
        let reply: HealthReply = response.json().await?;
        Ok(reply.status == "healthy" && reply.service == "recognition")
    }
}

fn image_mime(photo: &Path) -> &'static str {
    let ext = photo
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("tif" | "tiff") => "image/tiff",
        _ => "image/jpeg",
    }
}

impl Detector for HttpDetector {
    async fn detect(&self, photo: &Path) -> Result<Detection, DetectorError> {
        let bytes = tokio::fs::read(photo)
            .await
            .map_err(|source| DetectorError::Io {
                path: photo.to_path_buf(),
                source,
            })?;
        let file_name = photo
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.jpg".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(image_mime(photo))?;

        let raw = self
            .client
            .post(format!("{}/detect_faces", self.base_url))
            .multipart(Form::new().part("file", part))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let detection = Detection::from_reply(photo, &raw)?;
        tracing::info!(
            photo = %photo.display(),
            faces = detection.faces.len(),
            width = detection.width,
            height = detection.height,
            "detected faces"
        );
        Ok(detection)
    }
}
