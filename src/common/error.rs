use thiserror::Error;

#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Landmark error: {0}")]
    Landmarks(String),

    #[error("Frame {index} could not be decoded: {reason}")]
    FrameDecode { index: usize, reason: String },

    #[error("No usable frames in batch of {0}")]
    NoUsableFrames(usize),

    #[error("Challenge task count must be at least 1, got {0}")]
    InvalidTaskCount(usize),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LivenessError>;
