//! archgraph - model graph assembler for YOLO-style architecture files
//!
//! A model file declares global hyperparameters (class count, depth and
//! width multipliers, anchors) and two ordered layer lists, backbone and
//! head. archgraph validates the file, resolves each layer's sources,
//! applies depth and width scaling and produces a typed `ModelGraph` with
//! per-layer channels, strides and the set of outputs an executor must keep.
//!
//! # Architecture
//!
//! - **config**: serde schema for model files and the assembly policy
//! - **model**: closed catalogue of module kinds and their typed descriptors
//! - **engine**: the assembler and the resulting graph
//! - **loader**: locating and parsing files on disk
//! - **cli**: `info`, `check`, `list` and `fmt` commands
//!
//! # Example
//!
//! ```bash
//! # Print the assembled layer table at the medium preset
//! archgraph info models/yolov5s-attention.yaml --scale m
//!
//! # Validate every model in a directory
//! archgraph check models/*.yaml
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod model;

// Re-export key types
pub use config::{AssemblyPolicy, ModelConfig, Scale};
pub use engine::{assemble, Assembler, ModelGraph};
pub use error::{Error, Result};
pub use loader::{load_config, ConfigFormat, ConfigSource};
