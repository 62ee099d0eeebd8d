pub mod config;
pub mod dev_mode;
pub mod error;
pub mod paths;

pub use config::Config;
pub use dev_mode::DevMode;
pub use error::{LivenessError, Result};
pub use paths::{resolve_model_path, system_config_file, system_data_dir};
