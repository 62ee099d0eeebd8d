use crate::core::blink::{BlinkEstimator, BlinkState};
use crate::core::geometry::BoundingBox;
use crate::core::orientation::{Orientation, OrientationEstimator, OrientationReading};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Everything extracted from one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSignal {
    pub ear: f32,
    pub is_blinking: bool,
    pub orientation: Option<Orientation>,
    pub bbox: Option<BoundingBox>,
    pub face_detected: bool,
}

/// Aggregate of one frame sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub new_blinks: u32,
    /// One entry per input frame, `None` where no profile was seen.
    pub orientations: Vec<Option<Orientation>>,
    pub face_detection_ratio: f32,
    pub ear_values: Vec<f32>,
    pub blink_frames: Vec<usize>,
    pub left_frames: Vec<usize>,
    pub right_frames: Vec<usize>,
    /// Counters to carry into the next call when streaming.
    pub final_state: BlinkState,
    pub frame_count: usize,
}

impl SessionStats {
    pub fn saw(&self, orientation: Orientation) -> bool {
        self.orientations.contains(&Some(orientation))
    }

    /// Most frequent non-null orientation; ties go to whichever appeared first.
    pub fn primary_orientation(&self) -> Option<Orientation> {
        let left = self.left_frames.len();
        let right = self.right_frames.len();

        match left.cmp(&right) {
            std::cmp::Ordering::Greater => Some(Orientation::Left),
            std::cmp::Ordering::Less => Some(Orientation::Right),
            std::cmp::Ordering::Equal => self.orientations.iter().flatten().next().copied(),
        }
    }
}

/// Runs both estimators over the same frames. Holds no state between calls;
/// blink continuity goes through the `BlinkState` passed in and returned.
#[derive(Clone)]
pub struct SessionAggregator {
    blink: BlinkEstimator,
    orientation: OrientationEstimator,
}

impl SessionAggregator {
    pub fn new(blink: BlinkEstimator, orientation: OrientationEstimator) -> Self {
        Self { blink, orientation }
    }

    pub fn aggregate(&self, frames: &[DynamicImage], initial: BlinkState) -> SessionStats {
        let blinks = self.blink.evaluate_batch(frames, initial);
        let orientations = self.orientation.evaluate_batch(frames);

        tracing::debug!(
            "Aggregated {} frames: {} new blinks, {} left, {} right, face ratio {:.2}",
            frames.len(),
            blinks.new_blinks,
            orientations.left_frames.len(),
            orientations.right_frames.len(),
            blinks.face_detection_ratio
        );

        SessionStats {
            new_blinks: blinks.new_blinks,
            orientations: orientations.orientations,
            face_detection_ratio: blinks.face_detection_ratio,
            ear_values: blinks.ear_values,
            blink_frames: blinks.blink_frames,
            left_frames: orientations.left_frames,
            right_frames: orientations.right_frames,
            final_state: blinks.final_state,
            frame_count: frames.len(),
        }
    }

    /// Single-frame step for streaming callers.
    pub fn signal(&self, frame: &DynamicImage, state: BlinkState) -> (FrameSignal, BlinkState) {
        let blink = self.blink.evaluate(frame, state);
        let orientation = self.orientation.evaluate(frame).unwrap_or_else(|e| {
            tracing::warn!("Orientation detection failed: {}", e);
            OrientationReading::none()
        });

        let signal = FrameSignal {
            ear: blink.ear,
            is_blinking: blink.is_blinking,
            orientation: orientation.orientation,
            bbox: orientation.bbox,
            face_detected: blink.face_detected(),
        };
        (signal, blink.state)
    }
}
