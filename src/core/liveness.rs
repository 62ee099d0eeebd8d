use crate::common::{resolve_model_path, Config, Result};
use crate::core::blink::{BlinkEstimator, BlinkState};
use crate::core::challenge::{Challenge, ChallengeManager, ChallengeStatus, Rejection};
use crate::core::detector::YoloDetector;
use crate::core::landmarks::OnnxLandmarker;
use crate::core::orientation::{Orientation, OrientationEstimator};
use crate::core::session::{FrameSignal, SessionAggregator, SessionStats};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Summary of what was seen in a frame sequence, independent of any challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionDetails {
    pub blinks: u32,
    /// Most common orientation over the sequence.
    pub orientation: Option<Orientation>,
    pub orientations: Vec<Option<Orientation>>,
    /// True when more than half the frames had a face.
    pub face_detected: bool,
}

impl DetectionDetails {
    pub fn from_stats(stats: &SessionStats) -> Self {
        Self {
            blinks: stats.new_blinks,
            orientation: stats.primary_orientation(),
            orientations: stats.orientations.clone(),
            face_detected: stats.face_detection_ratio > 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub status: ChallengeStatus,
    pub message: String,
    /// Absent when the request was rejected before any frame was analysed.
    pub details: Option<DetectionDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SessionStats>,
}

impl VerificationOutcome {
    fn without_analysis(status: ChallengeStatus, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), details: None, stats: None }
    }

    pub fn passed(&self) -> bool {
        self.status == ChallengeStatus::Pass
    }
}

/// Entry point for liveness checks: verifies frame sequences against issued
/// challenges, or just reports what the detectors see.
pub struct LivenessVerifier {
    challenges: Arc<ChallengeManager>,
    aggregator: SessionAggregator,
    min_frames: usize,
}

impl LivenessVerifier {
    pub fn new(challenges: Arc<ChallengeManager>, aggregator: SessionAggregator, min_frames: usize) -> Self {
        Self { challenges, aggregator, min_frames }
    }

    /// Loads the landmark and profile models named in `config`. Relative
    /// model paths resolve against `models_base`.
    pub fn from_config(config: &Config, models_base: &Path, challenges: Arc<ChallengeManager>) -> Result<Self> {
        tracing::info!("Initializing liveness verifier");

        let landmarks = Arc::new(OnnxLandmarker::new(config, models_base)?);
        let profiles = Arc::new(YoloDetector::new(
            "profile_detector",
            &resolve_model_path(&config.models.profile_detector_path, models_base),
            &config.profile_detector,
            &config.performance,
        )?);

        let aggregator = SessionAggregator::new(
            BlinkEstimator::new(landmarks, config.blink),
            OrientationEstimator::new(profiles),
        );

        tracing::info!(
            "Liveness verifier ready (EAR threshold {:.2}, min frames {})",
            config.blink.ear_threshold,
            config.detection.min_frames
        );
        Ok(Self::new(challenges, aggregator, config.detection.min_frames))
    }

    pub fn challenges(&self) -> &Arc<ChallengeManager> {
        &self.challenges
    }

    pub fn min_frames(&self) -> usize {
        self.min_frames
    }

    /// Verifies `frames` against the active challenge `challenge_id`.
    pub fn verify(&self, challenge_id: &str, frames: &[DynamicImage]) -> VerificationOutcome {
        self.run(challenge_id, None, frames)
    }

    /// Verifies `frames` against a token handed back by the client.
    pub fn verify_token(&self, token: &Challenge, frames: &[DynamicImage]) -> VerificationOutcome {
        self.run(&token.id, Some(token), frames)
    }

    /// Runs both estimators with no challenge involved. Blink counting
    /// resumes from `initial_blink_count`.
    pub fn detect(&self, frames: &[DynamicImage], initial_blink_count: u32) -> SessionStats {
        self.aggregator.aggregate(frames, BlinkState::new(0, initial_blink_count))
    }

    pub fn signal(&self, frame: &DynamicImage, state: BlinkState) -> (FrameSignal, BlinkState) {
        self.aggregator.signal(frame, state)
    }

    fn run(&self, challenge_id: &str, token: Option<&Challenge>, frames: &[DynamicImage]) -> VerificationOutcome {
        if frames.is_empty() || frames.len() < self.min_frames {
            tracing::warn!(
                "Rejecting verification of {}: {} frames, need {}",
                challenge_id,
                frames.len(),
                self.min_frames
            );
            return VerificationOutcome::without_analysis(
                ChallengeStatus::Fail,
                format!("Insufficient frames: need at least {}, got {}", self.min_frames.max(1), frames.len()),
            );
        }

        let lookup = match token {
            Some(token) => self.challenges.lookup_token(token),
            None => self.challenges.lookup(challenge_id),
        };
        if let Err(rejection) = lookup {
            return rejected(rejection);
        }

        let stats = self.aggregator.aggregate(frames, BlinkState::default());
        let verdict = match token {
            Some(token) => self.challenges.evaluate_token(token, &stats),
            None => self.challenges.evaluate(challenge_id, &stats),
        };

        VerificationOutcome {
            status: verdict.status,
            message: verdict.message,
            details: Some(DetectionDetails::from_stats(&stats)),
            stats: Some(stats),
        }
    }
}

fn rejected(rejection: Rejection) -> VerificationOutcome {
    VerificationOutcome::without_analysis(rejection.status(), rejection.public_message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::BlinkConfig;
    use crate::core::challenge::{ManualClock, Task};
    use crate::core::geometry::Detection;
    use crate::core::landmarks::{EyeLandmarks, LandmarkDetector};
    use crate::core::orientation::ProfileClassifier;
    use image::GrayImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl LandmarkDetector for Counting {
        fn detect_eyes(&self, _frame: &DynamicImage) -> Result<Option<EyeLandmarks>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    impl ProfileClassifier for Counting {
        fn detect_profiles(&self, _gray: &GrayImage) -> Result<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn verifier(detector: Arc<Counting>) -> (LivenessVerifier, Arc<ChallengeManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let manager = Arc::new(ChallengeManager::with_clock("k", Duration::from_secs(120), clock.clone()));
        let aggregator = SessionAggregator::new(
            BlinkEstimator::new(detector.clone(), BlinkConfig::default()),
            OrientationEstimator::new(detector),
        );
        (LivenessVerifier::new(manager.clone(), aggregator, 3), manager, clock)
    }

    fn frames(n: usize) -> Vec<DynamicImage> {
        vec![DynamicImage::new_rgb8(8, 8); n]
    }

    #[test]
    fn too_few_frames_leaves_challenge_alone() {
        let detector = Arc::new(Counting::default());
        let (verifier, manager, _) = verifier(detector.clone());
        let challenge = manager.generate_with_tasks(vec![Task::Blink]).unwrap();

        let outcome = verifier.verify(&challenge.id, &frames(2));
        assert_eq!(outcome.status, ChallengeStatus::Fail);
        assert!(outcome.message.contains("at least 3"));
        assert!(outcome.details.is_none());

        let outcome = verifier.verify(&challenge.id, &[]);
        assert_eq!(outcome.status, ChallengeStatus::Fail);

        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.lookup(&challenge.id).unwrap().status, ChallengeStatus::Pending);
    }

    #[test]
    fn rejection_skips_detectors() {
        let detector = Arc::new(Counting::default());
        let (verifier, manager, clock) = verifier(detector.clone());

        let outcome = verifier.verify("missing", &frames(5));
        assert_eq!(outcome.status, ChallengeStatus::Invalid);

        let challenge = manager.generate(1).unwrap();
        clock.advance(Duration::from_secs(500));
        let outcome = verifier.verify_token(&challenge, &frames(5));
        assert_eq!(outcome.status, ChallengeStatus::Expired);

        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_evidence_fails_with_details() {
        let detector = Arc::new(Counting::default());
        let (verifier, manager, _) = verifier(detector);
        let challenge = manager.generate_with_tasks(vec![Task::Blink]).unwrap();

        let outcome = verifier.verify(&challenge.id, &frames(4));
        assert_eq!(outcome.status, ChallengeStatus::Fail);
        let details = outcome.details.unwrap();
        assert_eq!(details.blinks, 0);
        assert_eq!(details.orientations, vec![None; 4]);
        assert!(!details.face_detected);
    }

    #[test]
    fn details_serialize_with_wire_names() {
        let stats = SessionStats {
            new_blinks: 2,
            orientations: vec![None, Some(Orientation::Left)],
            left_frames: vec![1],
            face_detection_ratio: 0.75,
            ..Default::default()
        };
        let json = serde_json::to_value(DetectionDetails::from_stats(&stats)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "blinks": 2,
                "orientation": "left",
                "orientations": [null, "left"],
                "face_detected": true
            })
        );
    }
}
