//! Assembled computation graph

use std::fmt;

use crate::config::Source;
use crate::error::LayerPosition;
use crate::model::{Detect, Module};

/// Where a layer reads a tensor from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputRef {
    /// The model input image
    Input,
    /// Output of an earlier layer
    Layer(usize),
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRef::Input => f.write_str("input"),
            InputRef::Layer(i) => write!(f, "{}", i),
        }
    }
}

/// One assembled layer.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltLayer {
    pub position: LayerPosition,
    /// Module name as written in the file
    pub name: String,
    /// Source as declared
    pub source: Source,
    /// Resolved inputs, in declaration order
    pub from: Vec<InputRef>,
    /// Repeat as declared
    pub declared_repeat: u32,
    /// Repeat after depth scaling
    pub repeat: usize,
    pub module: Module,
    /// `None` for the detection head
    pub out_channels: Option<usize>,
    /// Downsampling factor of the output relative to the input, if known
    pub stride: Option<usize>,
}

impl BuiltLayer {
    pub fn index(&self) -> usize {
        self.position.index
    }

    /// Number of chained copies an executor instantiates. CSP blocks fold
    /// the repeat into their own depth and appear once.
    pub fn instances(&self) -> usize {
        match self.module {
            Module::Csp(_) => 1,
            _ => self.repeat,
        }
    }
}

/// Output of the assembler: layers in execution order plus routing data.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelGraph {
    pub(crate) layers: Vec<BuiltLayer>,
    pub(crate) save: Vec<usize>,
    pub(crate) input_channels: usize,
    pub(crate) depth_multiple: f64,
    pub(crate) width_multiple: f64,
}

impl ModelGraph {
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[BuiltLayer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&BuiltLayer> {
        self.layers.get(index)
    }

    /// Layers whose outputs must be kept after the next layer has run,
    /// sorted ascending.
    pub fn save(&self) -> &[usize] {
        &self.save
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn depth_multiple(&self) -> f64 {
        self.depth_multiple
    }

    pub fn width_multiple(&self) -> f64 {
        self.width_multiple
    }

    /// The detection head and its layer, if the model has one.
    pub fn detect(&self) -> Option<(&BuiltLayer, &Detect)> {
        self.layers
            .iter()
            .rev()
            .find_map(|l| l.module.as_detect().map(|d| (l, d)))
    }

    /// Layers that read the output of `index`.
    pub fn consumers(&self, index: usize) -> Vec<usize> {
        self.layers
            .iter()
            .filter(|l| l.from.contains(&InputRef::Layer(index)))
            .map(|l| l.index())
            .collect()
    }
}

impl fmt::Display for ModelGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>3}  {:>16}  {:>2}  {:<16}  {:>6}  {:>6}  arguments",
            "", "from", "n", "module", "ch", "stride"
        )?;
        for layer in &self.layers {
            let ch = layer
                .out_channels
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            let stride = layer
                .stride
                .map(|s| s.to_string())
                .unwrap_or_else(|| "?".to_string());
            writeln!(
                f,
                "{:>3}  {:>16}  {:>2}  {:<16}  {:>6}  {:>6}  {}",
                layer.index(),
                layer.source.to_string(),
                layer.repeat,
                layer.name,
                ch,
                stride,
                layer.module.arguments()
            )?;
        }
        write!(
            f,
            "{} layers, depth_multiple {}, width_multiple {}",
            self.layers.len(),
            self.depth_multiple,
            self.width_multiple
        )?;
        if let Some((_, detect)) = self.detect() {
            let strides: Vec<String> = detect
                .strides
                .iter()
                .map(|s| s.map(|s| s.to_string()).unwrap_or_else(|| "?".to_string()))
                .collect();
            write!(
                f,
                "\nDetect: {} classes, {} scales x {} anchors, strides [{}]",
                detect.nc,
                detect.nl(),
                detect.na(),
                strides.join(", ")
            )?;
        }
        Ok(())
    }
}
