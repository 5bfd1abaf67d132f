//! Recognition-server response decoding.
//!
//! The server reports absolute pixel corners per face; the core works in
//! fractions of the image size, so boxes are normalized on the way in.

use crate::types::{DetectedFace, FaceBox};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DetectionError {
    #[error("invalid image size {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },
    #[error("response carries no image size")]
    MissingImageSize,
}

/// One face as reported by the recognition server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFace {
    /// Absolute pixel corners [x1, y1, x2, y2].
    pub bbox: [f32; 4],
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub det_score: Option<f32>,
}

/// Response body of the server's face-detection endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResponse {
    #[serde(default)]
    pub faces: Vec<RawFace>,
    #[serde(default)]
    pub count: Option<usize>,
    /// [width, height] of the decoded image.
    #[serde(default)]
    pub image_size: Option<[u32; 2]>,
}

impl DetectionResponse {
    /// Image dimensions reported by the server.
    pub fn dimensions(&self) -> Result<(u32, u32), DetectionError> {
        let [width, height] = self.image_size.ok_or(DetectionError::MissingImageSize)?;
        Ok((width, height))
    }

    /// Normalize faces against the given image size, sorted left to right.
    pub fn into_faces(self, width: u32, height: u32) -> Result<Vec<DetectedFace>, DetectionError> {
        if width == 0 || height == 0 {
            return Err(DetectionError::InvalidImageSize { width, height });
        }
        if let Some(count) = self.count.filter(|&c| c != self.faces.len()) {
            tracing::warn!(count, faces = self.faces.len(), "face count disagrees with payload");
        }

        let (w, h) = (width as f32, height as f32);
        let mut faces: Vec<DetectedFace> = self
            .faces
            .into_iter()
            .map(|raw| {
                let [x1, y1, x2, y2] = raw.bbox;
                let bbox = FaceBox {
                    x: x1 / w,
                    y: y1 / h,
                    width: (x2 - x1) / w,
                    height: (y2 - y1) / h,
                };
                DetectedFace {
                    det_score: raw.det_score,
                    ..DetectedFace::new(bbox, raw.embedding)
                }
            })
            .collect();
        faces.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));
        Ok(faces)
    }
}

/// Photo aspect ratio (width / height).
pub fn photo_ratio(width: u32, height: u32) -> f32 {
    if height == 0 {
        return 1.0;
    }
    width as f32 / height as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "faces": [
            {"bbox": [600, 100, 700, 250], "embedding": [0.1, 0.2], "det_score": 0.9},
            {"bbox": [100, 200, 180, 300], "embedding": [0.3, 0.4], "det_score": null}
        ],
        "count": 2,
        "image_size": [800, 400]
    }"#;

    #[test]
    fn test_into_faces_normalizes_and_sorts() {
        let response: DetectionResponse = serde_json::from_str(RESPONSE).unwrap();
        assert_eq!(response.dimensions(), Ok((800, 400)));

        let faces = response.into_faces(800, 400).unwrap();
        assert_eq!(faces.len(), 2);

        let left = &faces[0].bbox;
        assert!((left.x - 0.125).abs() < 1e-6);
        assert!((left.y - 0.5).abs() < 1e-6);
        assert!((left.width - 0.1).abs() < 1e-6);
        assert!((left.height - 0.25).abs() < 1e-6);
        assert_eq!(faces[0].det_score, None);
        assert_eq!(faces[0].embedding, vec![0.3, 0.4]);

        assert_eq!(faces[1].det_score, Some(0.9));
        assert!(faces[1].name().is_none());
    }

    #[test]
    fn test_zero_size_rejected() {
        let response: DetectionResponse = serde_json::from_str(RESPONSE).unwrap();
        assert_eq!(
            response.into_faces(0, 400).unwrap_err(),
            DetectionError::InvalidImageSize {
                width: 0,
                height: 400,
            }
        );
    }

    #[test]
    fn test_missing_image_size() {
        let response: DetectionResponse = serde_json::from_str(r#"{"faces": []}"#).unwrap();
        assert_eq!(response.dimensions(), Err(DetectionError::MissingImageSize));
    }

    #[test]
    fn test_photo_ratio() {
        assert!((photo_ratio(800, 400) - 2.0).abs() < 1e-6);
        assert!((photo_ratio(300, 600) - 0.5).abs() < 1e-6);
        assert_eq!(photo_ratio(100, 0), 1.0);
    }
}
