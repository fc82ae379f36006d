//! CLI commands

mod check;
mod fmt;
mod info;
mod list;

pub use check::check;
pub use fmt::fmt;
pub use info::info;
pub use list::list;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{AssemblyPolicy, ModelConfig, Scale};
use crate::loader::detect_config_source;

/// archgraph - assemble and inspect YOLO-style model architecture files
#[derive(Parser)]
#[command(name = "archgraph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assemble a model and print its layer table
    Info {
        /// Model name or path
        model: String,

        /// Standard size preset (n, s, m, l, x); overrides the file's multipliers
        #[arg(long, short)]
        scale: Option<Scale>,

        /// Override depth_multiple
        #[arg(long)]
        depth_multiple: Option<f64>,

        /// Override width_multiple
        #[arg(long)]
        width_multiple: Option<f64>,

        /// Override the number of classes
        #[arg(long)]
        nc: Option<usize>,

        /// Assembly policy file (YAML)
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// Validate and assemble one or more models
    Check {
        /// Model names or paths
        #[arg(required = true)]
        models: Vec<String>,

        /// Assembly policy file (YAML)
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// List available models
    List {
        /// Show detailed information
        #[arg(long, short)]
        verbose: bool,
    },

    /// Re-serialize a model file in canonical form
    Fmt {
        /// Model name or path
        model: String,

        /// Write JSON instead of YAML
        #[arg(long)]
        json: bool,

        /// Output file (stdout when absent)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

/// Directory searched for model names that are not paths
pub(crate) fn model_dir() -> PathBuf {
    std::env::var("ARCHGRAPH_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./models"))
}

/// Resolve a model argument to a path: a direct path, a file or directory
/// under the model directory, or a bare name with a config extension.
pub(crate) fn find_model_path(model: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(model);
    if direct.exists() {
        return Ok(direct);
    }

    let model_dir = model_dir();
    let in_dir = model_dir.join(model);
    if in_dir.exists() {
        return Ok(in_dir);
    }
    for ext in ["yaml", "yml", "json"] {
        let candidate = model_dir.join(format!("{}.{}", model, ext));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(anyhow!("Model not found: {}", model))
}

/// Locate and parse a model file.
pub(crate) async fn read_config(model: &str) -> Result<(PathBuf, ModelConfig)> {
    let path = find_model_path(model)?;
    let source = detect_config_source(&path)?;
    let content = tokio::fs::read_to_string(&source.path)
        .await
        .with_context(|| format!("Failed to read {}", source.path.display()))?;
    let config = source
        .format
        .parse(&content)
        .with_context(|| format!("Invalid model file {}", source.path.display()))?;
    Ok((source.path, config))
}

pub(crate) async fn read_policy(path: Option<&Path>) -> Result<AssemblyPolicy> {
    let Some(path) = path else {
        return Ok(AssemblyPolicy::default());
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read policy {}", path.display()))?;
    let policy = AssemblyPolicy::from_yaml_str(&content)
        .with_context(|| format!("Invalid policy file {}", path.display()))?;
    tracing::info!("Using assembly policy from {}", path.display());
    Ok(policy)
}
