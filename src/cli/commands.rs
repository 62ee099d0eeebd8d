use crate::cli::annotate::save_annotated;
use crate::common::{system_config_file, system_data_dir, Config, DevMode, Result};
use crate::core::blink::BlinkState;
use crate::core::challenge::{Challenge, ChallengeManager, Task};
use crate::core::frames::load_frames_from_dir;
use crate::core::liveness::{DetectionDetails, LivenessVerifier, VerificationOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Picks the config file: an explicit path, the repo copy in dev mode, the
/// system file when installed.
pub fn load_config(explicit: Option<&Path>, dev_mode: &DevMode) -> Result<Config> {
    if let Some(path) = explicit {
        return Config::load_from_path(path);
    }

    let system = system_config_file();
    if !dev_mode.is_enabled() && system.exists() {
        return Config::load_from_path(&system);
    }
    Config::load()
}

fn models_base(dev_mode: &DevMode) -> PathBuf {
    if dev_mode.is_enabled() {
        PathBuf::from(".")
    } else {
        system_data_dir()
    }
}

fn build_verifier(config: &Config, dev_mode: &DevMode, manager: Arc<ChallengeManager>) -> Result<LivenessVerifier> {
    LivenessVerifier::from_config(config, &models_base(dev_mode), manager)
}

fn issue(manager: &ChallengeManager, config: &Config, task_count: Option<usize>, tasks: &[Task]) -> Result<Challenge> {
    if tasks.is_empty() {
        manager.generate(task_count.unwrap_or(config.challenge.default_task_count))
    } else {
        manager.generate_with_tasks(tasks.to_vec())
    }
}

/// Prints a freshly signed challenge token as JSON. The manager is dropped
/// on return, so the token only shows the wire format.
pub fn challenge(config: &Config, task_count: Option<usize>, tasks: &[Task]) -> Result<()> {
    let manager = ChallengeManager::from_config(&config.challenge);
    let challenge = issue(&manager, config, task_count, tasks)?;

    println!("{}", to_json(&challenge)?);
    eprintln!("Sample token, valid for {}s but not verifiable after this process exits:", manager.ttl().as_secs());
    for instruction in challenge.instructions() {
        eprintln!("  - {}", instruction);
    }
    Ok(())
}

pub fn detect(config: &Config, dev_mode: &DevMode, frames_dir: &Path, initial_blinks: u32) -> Result<()> {
    let manager = Arc::new(ChallengeManager::from_config(&config.challenge));
    let verifier = build_verifier(config, dev_mode, manager)?;
    let frames = load_frames_from_dir(frames_dir)?;

    println!("Analysing {} frames from {}...", frames.len(), frames_dir.display());
    let stats = verifier.detect(&frames, initial_blinks);
    let details = DetectionDetails::from_stats(&stats);

    println!("{}", to_json(&details)?);
    println!(
        "Blinks: {} (total {}), left frames: {}, right frames: {}, face ratio: {:.2}",
        stats.new_blinks,
        stats.final_state.total,
        stats.left_frames.len(),
        stats.right_frames.len(),
        stats.face_detection_ratio
    );
    Ok(())
}

/// Issues a challenge and verifies the frames in `frames_dir` against it in
/// the same process. Returns whether it passed.
pub fn verify(
    config: &Config,
    dev_mode: &DevMode,
    frames_dir: &Path,
    task_count: Option<usize>,
    tasks: &[Task],
) -> Result<bool> {
    let manager = Arc::new(ChallengeManager::from_config(&config.challenge));
    let verifier = build_verifier(config, dev_mode, manager.clone())?;

    let challenge = issue(&manager, config, task_count, tasks)?;
    println!("Challenge {}:", challenge.id);
    for instruction in challenge.instructions() {
        println!("  - {}", instruction);
    }

    let frames = load_frames_from_dir(frames_dir)?;
    println!("Verifying {} frames from {}...", frames.len(), frames_dir.display());

    let outcome = verifier.verify_token(&challenge, &frames);
    print_outcome(&outcome)?;
    Ok(outcome.passed())
}

/// Per-frame EAR and orientation table. In dev mode each frame is also saved
/// with its annotations.
pub fn signals(config: &Config, dev_mode: &DevMode, frames_dir: &Path) -> Result<()> {
    let manager = Arc::new(ChallengeManager::from_config(&config.challenge));
    let verifier = build_verifier(config, dev_mode, manager)?;
    let frames = load_frames_from_dir(frames_dir)?;

    println!("{:>5}  {:>6}  {:>8}  {:>11}  {:>4}  {:>6}", "frame", "ear", "blinking", "orientation", "face", "blinks");

    let mut state = BlinkState::default();
    for (i, frame) in frames.iter().enumerate() {
        let (signal, next) = verifier.signal(frame, state);
        state = next;

        println!(
            "{:>5}  {:>6.3}  {:>8}  {:>11}  {:>4}  {:>6}",
            i,
            signal.ear,
            if signal.is_blinking { "yes" } else { "no" },
            signal.orientation.map(|o| o.as_str()).unwrap_or("-"),
            if signal.face_detected { "yes" } else { "no" },
            state.total
        );

        save_annotated(dev_mode, frame, &signal, i)?;
    }

    if let Some(dir) = dev_mode.debug_dir() {
        println!("\nAnnotated frames saved to {}", dir.display());
    }
    Ok(())
}

fn print_outcome(outcome: &VerificationOutcome) -> Result<()> {
    println!("\nStatus: {}", outcome.status);
    println!("{}", outcome.message);
    if let Some(details) = &outcome.details {
        println!("{}", to_json(details)?);
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| anyhow::Error::from(e).into())
}
