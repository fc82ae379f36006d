//! Check models command

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::engine::Assembler;

use super::{read_config, read_policy};

/// Validate and assemble each model, reporting one line per file
pub async fn check(models: Vec<String>, policy: Option<PathBuf>) -> Result<()> {
    let assembler = Assembler::new(read_policy(policy.as_deref()).await?);

    let mut failed = 0;
    for model in &models {
        let result = match read_config(model).await {
            Ok((_, config)) => assembler.assemble(&config).map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(graph) => println!("OK    {} ({} layers)", model, graph.len()),
            Err(e) => {
                failed += 1;
                println!("FAIL  {}: {:#}", model, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} models failed", failed, models.len());
    }
    Ok(())
}
