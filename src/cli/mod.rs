pub mod annotate;
pub mod commands;

pub use annotate::{annotate_frame, save_annotated};
