//! Head orientation from a single profile-face classifier.
//!
//! The classifier only knows one canonical side (a face turned to the left).
//! Right-turned faces are found by running it again on the mirrored frame and
//! mapping the boxes back.

use crate::common::Result;
use crate::core::geometry::{BoundingBox, Detection};
use image::{DynamicImage, GrayImage, imageops};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Left,
    Right,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Left => "left",
            Orientation::Right => "right",
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detects faces turned to the classifier's canonical (left) side.
pub trait ProfileClassifier: Send + Sync {
    fn detect_profiles(&self, gray: &GrayImage) -> Result<Vec<Detection>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationReading {
    pub orientation: Option<Orientation>,
    pub bbox: Option<BoundingBox>,
    pub confidence: f32,
}

impl OrientationReading {
    pub fn none() -> Self {
        Self { orientation: None, bbox: None, confidence: 0.0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationBatch {
    pub orientations: Vec<Option<Orientation>>,
    pub boxes: Vec<Option<BoundingBox>>,
    pub left_frames: Vec<usize>,
    pub right_frames: Vec<usize>,
}

impl OrientationBatch {
    /// Fraction of frames where either profile was seen.
    pub fn detection_ratio(&self) -> f32 {
        if self.orientations.is_empty() {
            return 0.0;
        }
        (self.left_frames.len() + self.right_frames.len()) as f32 / self.orientations.len() as f32
    }
}

#[derive(Clone)]
pub struct OrientationEstimator {
    classifier: Arc<dyn ProfileClassifier>,
}

impl OrientationEstimator {
    pub fn new(classifier: Arc<dyn ProfileClassifier>) -> Self {
        Self { classifier }
    }

    pub fn evaluate(&self, frame: &DynamicImage) -> Result<OrientationReading> {
        self.evaluate_gray(&frame.to_luma8())
    }

    pub fn evaluate_gray(&self, gray: &GrayImage) -> Result<OrientationReading> {
        if gray.width() == 0 || gray.height() == 0 {
            return Ok(OrientationReading::none());
        }

        let mut candidates: Vec<(Orientation, Detection)> = self
            .classifier
            .detect_profiles(gray)?
            .into_iter()
            .map(|d| (Orientation::Left, d))
            .collect();

        let width = gray.width() as f32;
        let mirrored = imageops::flip_horizontal(gray);
        candidates.extend(
            self.classifier
                .detect_profiles(&mirrored)?
                .into_iter()
                .map(|d| {
                    let bbox = d.bbox.mirror(width);
                    (Orientation::Right, Detection { bbox, ..d })
                }),
        );

        // One face cannot be turned both ways; the largest box wins and ties keep the first.
        let best = candidates.into_iter().fold(None::<(Orientation, Detection)>, |best, candidate| {
            match best {
                Some(current) if current.1.bbox.area() >= candidate.1.bbox.area() => Some(current),
                _ => Some(candidate),
            }
        });

        Ok(match best {
            Some((orientation, detection)) => {
                tracing::debug!("Orientation {} at {:?} (confidence {:.3})", orientation, detection.bbox, detection.confidence);
                OrientationReading {
                    orientation: Some(orientation),
                    bbox: Some(detection.bbox),
                    confidence: detection.confidence,
                }
            }
            None => OrientationReading::none(),
        })
    }

    /// Classifies each frame in order. A classifier failure on one frame is
    /// logged and recorded as no orientation for that frame.
    pub fn evaluate_batch(&self, frames: &[DynamicImage]) -> OrientationBatch {
        let mut batch = OrientationBatch::default();

        for (i, frame) in frames.iter().enumerate() {
            let reading = self.evaluate(frame).unwrap_or_else(|e| {
                tracing::warn!("Orientation detection failed on frame {}: {}", i, e);
                OrientationReading::none()
            });

            match reading.orientation {
                Some(Orientation::Left) => batch.left_frames.push(i),
                Some(Orientation::Right) => batch.right_frames.push(i),
                None => {}
            }
            batch.orientations.push(reading.orientation);
            batch.boxes.push(reading.bbox);
        }

        batch
    }
}
