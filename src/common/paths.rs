use std::path::PathBuf;

// System locations; development runs use DevMode paths instead.

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/supliveness/liveness.toml")
}

/// Base for relative model paths outside dev mode.
pub fn system_data_dir() -> PathBuf {
    PathBuf::from("/usr/share/supliveness")
}

/// Resolves a possibly relative model path against `base`.
pub fn resolve_model_path(path: &std::path::Path, base: &std::path::Path) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}
