use crate::common::{LivenessError, Result};
use image::DynamicImage;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Decodes one transport-encoded frame.
pub fn decode_frame(index: usize, bytes: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(bytes).map_err(|e| LivenessError::FrameDecode {
        index,
        reason: e.to_string(),
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(LivenessError::FrameDecode { index, reason: "empty image".into() });
    }
    Ok(image)
}

/// Decodes a batch, skipping frames that fail. Only a batch with no usable
/// frame at all is an error.
pub fn decode_frames<B: AsRef<[u8]>>(encoded: &[B]) -> Result<Vec<DynamicImage>> {
    collect_usable(
        encoded.len(),
        encoded
            .iter()
            .enumerate()
            .map(|(i, bytes)| decode_frame(i, bytes.as_ref())),
    )
}

/// Loads every image file in `dir`, ordered by file name.
pub fn load_frames_from_dir(dir: &Path) -> Result<Vec<DynamicImage>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    tracing::debug!("Found {} frame files in {}", paths.len(), dir.display());

    collect_usable(
        paths.len(),
        paths.iter().enumerate().map(|(i, path)| {
            let bytes = std::fs::read(path).map_err(|e| LivenessError::FrameDecode {
                index: i,
                reason: format!("{}: {}", path.display(), e),
            })?;
            decode_frame(i, &bytes)
        }),
    )
}

fn collect_usable(
    total: usize,
    results: impl Iterator<Item = Result<DynamicImage>>,
) -> Result<Vec<DynamicImage>> {
    let mut frames = Vec::with_capacity(total);
    for result in results {
        match result {
            Ok(frame) => frames.push(frame),
            Err(e) => tracing::warn!("Skipping frame: {}", e),
        }
    }

    if frames.is_empty() {
        return Err(LivenessError::NoUsableFrames(total));
    }
    if frames.len() < total {
        tracing::info!("Decoded {}/{} frames", frames.len(), total);
    }
    Ok(frames)
}
