pub mod blink;
pub mod challenge;
pub mod detector;
pub mod frames;
pub mod geometry;
pub mod landmarks;
pub mod liveness;
pub mod orientation;
pub mod session;

pub use blink::{eye_aspect_ratio, BlinkEstimator, BlinkReading, BlinkState};
pub use challenge::{Challenge, ChallengeManager, ChallengeStatus, Clock, ManualClock, SystemClock, Task, Verdict};
pub use detector::YoloDetector;
pub use frames::{decode_frames, load_frames_from_dir};
pub use geometry::{BoundingBox, Detection, Point};
pub use landmarks::{EyeLandmarks, LandmarkDetector, OnnxLandmarker};
pub use liveness::{DetectionDetails, LivenessVerifier, VerificationOutcome};
pub use orientation::{Orientation, OrientationEstimator, ProfileClassifier};
pub use session::{FrameSignal, SessionAggregator, SessionStats};
