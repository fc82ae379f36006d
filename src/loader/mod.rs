//! Model config loading
//!
//! Locates a model file on disk and parses it with the matching format.

mod detect;

pub use detect::{detect_config_source, find_configs_in_dir, ConfigFormat, ConfigSource};

use std::path::Path;

use crate::config::ModelConfig;
use crate::error::{Error, Result};

/// Load a model config from a file or directory
///
/// The format is detected from the file extension.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ModelConfig> {
    let source = detect_config_source(path)?;
    let content = std::fs::read_to_string(&source.path).map_err(|e| Error::Io {
        path: source.path.clone(),
        source: e,
    })?;
    tracing::debug!(
        "Loading {} config from {}",
        source.format.name(),
        source.path.display()
    );
    source.format.parse(&content)
}
