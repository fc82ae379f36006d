//! List models command

use std::path::Path;

use anyhow::Result;

use crate::engine::assemble;
use crate::loader::{find_configs_in_dir, load_config};

use super::model_dir;

/// List available models
pub async fn list(verbose: bool) -> Result<()> {
    let model_dir = model_dir();

    if !model_dir.exists() {
        println!("No models directory found at: {}", model_dir.display());
        println!(
            "\nSet ARCHGRAPH_MODEL_DIR environment variable or create a ./models directory."
        );
        return Ok(());
    }

    println!("Models in {}:\n", model_dir.display());

    let configs = find_configs_in_dir(&model_dir);
    for path in &configs {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if verbose {
            print_model_details(path, &name);
        } else {
            println!("  {}", name);
        }
    }

    if configs.is_empty() {
        println!("  No models found.");
        println!("\nTo add models:");
        println!(
            "  - Place .yaml, .yml or .json model files in {}",
            model_dir.display()
        );
    }

    Ok(())
}

fn print_model_details(path: &Path, name: &str) {
    println!("  {}", name);
    println!("    Path: {}", path.display());

    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("    Invalid: {}\n", e);
            return;
        }
    };
    println!("    Classes: {}", config.nc);
    println!(
        "    Multiples: depth {}, width {}",
        config.depth_multiple, config.width_multiple
    );
    println!("    Layers: {}", config.num_layers());

    match assemble(&config) {
        Ok(graph) => {
            if let Some((_, detect)) = graph.detect() {
                println!("    Detect scales: {}", detect.nl());
            }
        }
        Err(e) => println!("    Does not assemble: {}", e),
    }

    println!();
}
