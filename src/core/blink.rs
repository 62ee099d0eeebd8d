//! Blink detection from the Eye Aspect Ratio (EAR).
//!
//! The estimator itself holds no per-stream state: the consecutive-closed
//! counter and the blink total travel in and out through [`BlinkState`], so
//! a caller can feed one frame at a time or a whole batch and get the same
//! counts.

use crate::common::config::BlinkConfig;
use crate::common::{LivenessError, Result};
use crate::core::geometry::Point;
use crate::core::landmarks::{EyeLandmarks, LandmarkDetector};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// EAR reported when no face or eyes were found. Real eyes stay well below it.
pub const NO_FACE_EAR: f32 = 1.0;

/// Per-eye threshold is this fraction of the average threshold.
const SINGLE_EYE_FACTOR: f32 = 0.8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlinkState {
    /// Consecutive frames with closed eyes.
    pub counter: u32,
    /// Completed blinks.
    pub total: u32,
}

impl BlinkState {
    pub fn new(counter: u32, total: u32) -> Self {
        Self { counter, total }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeMeasurement {
    pub left_ear: f32,
    pub right_ear: f32,
}

impl EyeMeasurement {
    pub fn from_landmarks(eyes: &EyeLandmarks) -> Self {
        Self {
            left_ear: eye_aspect_ratio(&eyes.left),
            right_ear: eye_aspect_ratio(&eyes.right),
        }
    }

    pub fn average(&self) -> f32 {
        (self.left_ear + self.right_ear) / 2.0
    }

    pub fn min(&self) -> f32 {
        self.left_ear.min(self.right_ear)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkReading {
    pub state: BlinkState,
    pub ear: f32,
    pub is_blinking: bool,
}

impl BlinkReading {
    pub fn face_detected(&self) -> bool {
        self.ear < NO_FACE_EAR
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlinkBatch {
    pub new_blinks: u32,
    pub ear_values: Vec<f32>,
    pub face_detected: Vec<bool>,
    /// Frames on which a blink completed (the reopening frame).
    pub blink_frames: Vec<usize>,
    pub face_detection_ratio: f32,
    pub final_state: BlinkState,
}

/// EAR of one eye given `[outer, top1, top2, inner, bottom1, bottom2]`.
///
/// A degenerate eye with coincident corners reads as open.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> f32 {
    let [outer, top1, top2, inner, bottom1, bottom2] = eye;

    let width = outer.distance(inner);
    if width == 0.0 {
        return NO_FACE_EAR;
    }

    (top1.distance(bottom2) + top2.distance(bottom1)) / (2.0 * width)
}

#[derive(Clone)]
pub struct BlinkEstimator {
    landmarks: Arc<dyn LandmarkDetector>,
    config: BlinkConfig,
}

impl BlinkEstimator {
    pub fn new(landmarks: Arc<dyn LandmarkDetector>, config: BlinkConfig) -> Self {
        Self { landmarks, config }
    }

    pub fn config(&self) -> &BlinkConfig {
        &self.config
    }

    /// Eye measurement for one frame; `Ok(None)` when no face was found.
    /// Non-finite landmarks or ratios are an error.
    pub fn measure(&self, frame: &DynamicImage) -> Result<Option<EyeMeasurement>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(None);
        }
        let Some(eyes) = self.landmarks.detect_eyes(frame)? else {
            return Ok(None);
        };

        let finite = |p: &Point| p.x.is_finite() && p.y.is_finite();
        if !eyes.left.iter().chain(eyes.right.iter()).all(finite) {
            return Err(LivenessError::Landmarks("non-finite eye landmark".into()));
        }

        let measurement = EyeMeasurement::from_landmarks(&eyes);
        if !measurement.left_ear.is_finite() || !measurement.right_ear.is_finite() {
            return Err(LivenessError::Landmarks(format!(
                "non-finite eye aspect ratio ({}, {})",
                measurement.left_ear, measurement.right_ear
            )));
        }
        Ok(Some(measurement))
    }

    /// Applies one measurement to the running state.
    pub fn advance(&self, state: BlinkState, measurement: Option<&EyeMeasurement>) -> BlinkReading {
        let Some(measurement) = measurement else {
            return BlinkReading { state, ear: NO_FACE_EAR, is_blinking: false };
        };

        let threshold = self.config.ear_threshold;
        let avg_ear = measurement.average();
        let min_ear = measurement.min();

        // The min check catches one-eyed and unsynchronised blinks
        let is_blinking = avg_ear < threshold || min_ear < threshold * SINGLE_EYE_FACTOR;

        let mut next = state;
        if is_blinking {
            next.counter += 1;
            tracing::debug!(
                "Eyes closed - counter {}/{}, avg EAR {:.3}, min EAR {:.3}",
                next.counter, self.config.consecutive_frames, avg_ear, min_ear
            );
        } else {
            if next.counter >= self.config.consecutive_frames {
                next.total += 1;
                tracing::debug!("Blink detected, total {} (closed for {} frames)", next.total, next.counter);
            }
            next.counter = 0;
        }

        BlinkReading { state: next, ear: avg_ear, is_blinking }
    }

    /// Measures one frame and advances the state. Landmark failures are
    /// logged and treated as a frame without a face.
    pub fn evaluate(&self, frame: &DynamicImage, state: BlinkState) -> BlinkReading {
        let measurement = self.measure(frame).unwrap_or_else(|e| {
            tracing::warn!("Blink measurement failed, treating frame as faceless: {}", e);
            None
        });
        self.advance(state, measurement.as_ref())
    }

    /// Folds the frames in order. The fold is inherently sequential: each
    /// frame's transition depends on the previous counter.
    pub fn evaluate_batch(&self, frames: &[DynamicImage], initial: BlinkState) -> BlinkBatch {
        let mut batch = BlinkBatch {
            final_state: initial,
            ..Default::default()
        };

        for (i, frame) in frames.iter().enumerate() {
            let reading = self.evaluate(frame, batch.final_state);

            if reading.state.total > batch.final_state.total {
                batch.blink_frames.push(i);
            }
            batch.ear_values.push(reading.ear);
            batch.face_detected.push(reading.face_detected());
            batch.final_state = reading.state;
        }

        let with_face = batch.face_detected.iter().filter(|f| **f).count();
        batch.face_detection_ratio = if frames.is_empty() {
            0.0
        } else {
            with_face as f32 / frames.len() as f32
        };
        batch.new_blinks = batch.final_state.total.saturating_sub(initial.total);

        tracing::debug!("Batch blink detection: {} blinks in {} frames", batch.new_blinks, frames.len());
        batch
    }
}
