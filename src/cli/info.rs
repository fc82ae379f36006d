//! Model info command

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::Scale;
use crate::engine::Assembler;

use super::{read_config, read_policy};

/// Assemble a model and print its layer table
pub async fn info(
    model: String,
    scale: Option<Scale>,
    depth_multiple: Option<f64>,
    width_multiple: Option<f64>,
    nc: Option<usize>,
    policy: Option<PathBuf>,
) -> Result<()> {
    let (path, mut config) = read_config(&model).await?;
    let policy = read_policy(policy.as_deref()).await?;

    if let Some(scale) = scale {
        tracing::info!("Applying scale preset {}", scale);
        config = config.with_scale(scale);
    }
    if depth_multiple.is_some() || width_multiple.is_some() {
        config = config.with_multiples(
            depth_multiple.unwrap_or(config.depth_multiple),
            width_multiple.unwrap_or(config.width_multiple),
        );
    }
    if let Some(nc) = nc {
        config = config.with_num_classes(nc);
    }

    println!("Model: {}\n", model);
    println!("Path: {}", path.display());
    println!("Classes: {}", config.nc);
    println!("Input channels: {}\n", config.input_channels());

    let graph = Assembler::new(policy)
        .assemble(&config)
        .with_context(|| format!("Failed to assemble {}", path.display()))?;

    println!("{}", graph);
    println!("\nSaved outputs: {:?}", graph.save());

    Ok(())
}
