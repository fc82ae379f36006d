//! Module catalogue.
//!
//! `ModuleKind` is the closed set of names a model file may use; `Module`
//! is the typed, fully resolved form of one layer produced by the assembler.

mod args;
pub mod detect;
mod kind;
mod module;

pub(crate) use args::ArgReader;
pub(crate) use module::BuildInputs;

pub use detect::Detect;
pub use kind::{Family, ModuleKind};
pub use module::{
    AttentionBlock, BottleneckBlock, Concat, ConvBlock, CrossConvBlock, CspBlock,
    GhostBottleneckBlock, Module, Resample, SppBlock, Upsample, WeightedAdd,
};
