//! Graph assembly
//!
//! - Assembler: turns a `ModelConfig` into a `ModelGraph`
//! - ModelGraph: layers in execution order with resolved routing

mod assembler;
mod graph;

pub use assembler::{assemble, Assembler};
pub use graph::{BuiltLayer, InputRef, ModelGraph};
