//! In-process stand-ins for the ONNX models.
//!
//! Frames are small synthetic RGB images:
//! - the red channel of pixel (0, 0) carries the eye aspect ratio times 100
//!   (0 means no face),
//! - a white block is the head, and a mid-grey marker inside it shows which
//!   way it is turned. A marker on the left half reads as a left profile.

#![allow(dead_code)]

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use sup_liveness::common::config::BlinkConfig;
use sup_liveness::common::Result;
use sup_liveness::core::geometry::{BoundingBox, Detection, Point};
use sup_liveness::core::landmarks::{EyeLandmarks, LandmarkDetector};
use sup_liveness::core::orientation::ProfileClassifier;
use sup_liveness::core::{
    BlinkEstimator, ChallengeManager, Clock, LivenessVerifier, Orientation, OrientationEstimator,
    SessionAggregator,
};
use std::sync::Arc;
use std::time::Duration;

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;
const HEAD_X: (u32, u32) = (10, 34);
const HEAD_Y: (u32, u32) = (8, 40);

pub struct EarFromRed;

impl LandmarkDetector for EarFromRed {
    fn detect_eyes(&self, frame: &DynamicImage) -> Result<Option<EyeLandmarks>> {
        let red = frame.to_rgb8().get_pixel(0, 0)[0];
        if red == 0 {
            return Ok(None);
        }
        let ear = red as f32 / 100.0;
        Ok(Some(EyeLandmarks { left: eye(ear), right: eye(ear) }))
    }
}

/// A 30px wide eye whose aspect ratio is `ear`.
fn eye(ear: f32) -> [Point; 6] {
    let half = ear * 30.0 / 2.0;
    [
        Point::new(0.0, 0.0),
        Point::new(10.0, -half),
        Point::new(20.0, -half),
        Point::new(30.0, 0.0),
        Point::new(20.0, half),
        Point::new(10.0, half),
    ]
}

pub struct MarkerProfiles;

impl ProfileClassifier for MarkerProfiles {
    fn detect_profiles(&self, gray: &GrayImage) -> Result<Vec<Detection>> {
        let mut head: Option<(u32, u32, u32, u32)> = None;
        let mut marker_xs = Vec::new();

        for (x, y, pixel) in gray.enumerate_pixels() {
            let v = pixel[0];
            if v >= 200 {
                head = Some(match head {
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                    None => (x, y, x, y),
                });
            } else if (100..=160).contains(&v) {
                marker_xs.push(x);
            }
        }

        let Some((x0, y0, x1, y1)) = head else {
            return Ok(Vec::new());
        };
        let centre = (x0 + x1) as f32 / 2.0;
        if marker_xs.is_empty() || marker_xs.iter().any(|x| *x as f32 >= centre) {
            return Ok(Vec::new());
        }

        Ok(vec![Detection {
            bbox: BoundingBox::new(x0 as f32, y0 as f32, (x1 + 1) as f32, (y1 + 1) as f32),
            confidence: 0.9,
        }])
    }
}

/// Synthetic frame. `ear: None` means no face for the blink estimator.
pub fn frame(ear: Option<f32>, pose: Option<Orientation>) -> DynamicImage {
    let mut img = RgbImage::new(WIDTH, HEIGHT);

    if let Some(ear) = ear {
        img.put_pixel(0, 0, Rgb([(ear * 100.0).round() as u8, 0, 0]));
    }

    if let Some(pose) = pose {
        for y in HEAD_Y.0..HEAD_Y.1 {
            for x in HEAD_X.0..HEAD_X.1 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let marker_x = match pose {
            Orientation::Left => HEAD_X.0 + 2,
            Orientation::Right => HEAD_X.1 - 6,
        };
        for y in 20..24 {
            for x in marker_x..marker_x + 4 {
                img.put_pixel(x, y, Rgb([128, 128, 128]));
            }
        }
    }

    DynamicImage::ImageRgb8(img)
}

/// Frames with an open-eyed face and the given poses.
pub fn open_eyed(poses: &[Option<Orientation>]) -> Vec<DynamicImage> {
    poses.iter().map(|pose| frame(Some(0.30), *pose)).collect()
}

/// Where the head block sits in every synthetic frame.
pub fn head_box() -> BoundingBox {
    BoundingBox::new(HEAD_X.0 as f32, HEAD_Y.0 as f32, HEAD_X.1 as f32, HEAD_Y.1 as f32)
}

pub fn aggregator() -> SessionAggregator {
    SessionAggregator::new(
        BlinkEstimator::new(Arc::new(EarFromRed), BlinkConfig::default()),
        OrientationEstimator::new(Arc::new(MarkerProfiles)),
    )
}

pub fn verifier_with_clock(clock: Arc<dyn Clock>, min_frames: usize) -> (LivenessVerifier, Arc<ChallengeManager>) {
    let manager = Arc::new(ChallengeManager::with_clock(
        "integration-secret",
        Duration::from_secs(120),
        clock,
    ));
    (LivenessVerifier::new(manager.clone(), aggregator(), min_frames), manager)
}

pub fn verifier(min_frames: usize) -> (LivenessVerifier, Arc<ChallengeManager>) {
    let manager = Arc::new(ChallengeManager::new("integration-secret", Duration::from_secs(120)));
    (LivenessVerifier::new(manager.clone(), aggregator(), min_frames), manager)
}
