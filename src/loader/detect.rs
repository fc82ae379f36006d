//! Config format and source detection

use std::path::{Path, PathBuf};

use crate::config::ModelConfig;
use crate::error::{Error, Result};

/// Serialization of a model file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(ConfigFormat::Yaml),
            Some("json") => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    /// Parse and validate file contents in this format
    pub fn parse(&self, content: &str) -> Result<ModelConfig> {
        match self {
            ConfigFormat::Yaml => ModelConfig::from_yaml_str(content),
            ConfigFormat::Json => ModelConfig::from_json_str(content),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Json => "JSON",
        }
    }
}

/// Detected config file
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub format: ConfigFormat,
}

/// Detect the config file and its format from a path
///
/// The path can be:
/// - A `.yaml`, `.yml` or `.json` file
/// - A directory containing `model.yaml`, `model.yml` or `model.json`
/// - A directory containing some other config file (first in glob order)
pub fn detect_config_source<P: AsRef<Path>>(path: P) -> Result<ConfigSource> {
    let path = path.as_ref();

    if path.is_file() {
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            Error::schema(format!(
                "unsupported config file extension: {}",
                path.display()
            ))
        })?;
        Ok(ConfigSource {
            path: path.to_path_buf(),
            format,
        })
    } else if path.is_dir() {
        detect_config_in_directory(path)
    } else {
        Err(Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        })
    }
}

fn detect_config_in_directory(dir: &Path) -> Result<ConfigSource> {
    for name in ["model.yaml", "model.yml", "model.json"] {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return detect_config_source(candidate);
        }
    }

    find_configs_in_dir(dir)
        .into_iter()
        .next()
        .map(detect_config_source)
        .unwrap_or_else(|| {
            Err(Error::schema(format!(
                "no model config found in directory: {}",
                dir.display()
            )))
        })
}

/// All config files directly under `dir`, in glob order
pub fn find_configs_in_dir(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for ext in ["yaml", "yml", "json"] {
        let pattern = dir.join(format!("*.{}", ext));
        let Some(pattern) = pattern.to_str() else {
            continue;
        };
        if let Ok(paths) = glob::glob(pattern) {
            found.extend(paths.filter_map(|r| r.ok()).filter(|p| p.is_file()));
        }
    }
    found.sort();
    found
}
