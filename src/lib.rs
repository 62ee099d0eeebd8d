// Core modules
pub mod core;
pub mod cli;
pub mod common;

// Re-export commonly used types
pub use common::{Config, DevMode, LivenessError, Result};
pub use core::{
    BlinkEstimator, BlinkState, Challenge, ChallengeManager, ChallengeStatus, DetectionDetails,
    LivenessVerifier, Orientation, OrientationEstimator, SessionAggregator, SessionStats, Task,
    VerificationOutcome,
};
