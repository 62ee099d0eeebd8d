use std::path::PathBuf;
use std::fs;
use crate::common::error::Result;

#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        if enabled {
            fs::create_dir_all(base_dir.join("debug"))?;

            tracing::info!("Development mode enabled - data will be saved to: {}", base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn disabled() -> Self {
        Self { enabled: false, base_dir: PathBuf::new() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn debug_dir(&self) -> Option<PathBuf> {
        self.enabled.then(|| self.base_dir.join("debug"))
    }

    /// Timestamped path for an annotated debug frame, or `None` outside dev mode.
    pub fn get_debug_path(&self, prefix: &str, frame_index: usize) -> Option<PathBuf> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.debug_dir()
            .map(|dir| dir.join(format!("{}_{}_{:03}.png", prefix, timestamp, frame_index)))
    }
}
