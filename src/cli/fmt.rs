//! Format model command

use std::path::PathBuf;

use anyhow::{Context, Result};

use super::read_config;

/// Re-serialize a model file as canonical YAML or JSON
pub async fn fmt(model: String, json: bool, output: Option<PathBuf>) -> Result<()> {
    let (path, config) = read_config(&model).await?;

    let text = if json {
        config.to_json_string()?
    } else {
        config.to_yaml_string()?
    };

    match output {
        Some(out) => {
            tokio::fs::write(&out, text)
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            tracing::info!("Wrote {} as {}", path.display(), out.display());
        }
        None => print!("{}", text),
    }

    Ok(())
}
