//! Configuration system for archgraph
//!
//! `ModelConfig` is the typed form of a model file: global hyperparameters
//! plus the backbone and head layer lists. `AssemblyPolicy` holds the
//! scaling rules applied when the layers are assembled into a graph.

mod anchors;
mod layer;
pub mod policy;

pub use anchors::{Anchors, Dim};
pub use layer::{Arg, LayerRef, LayerSpec, Source};
pub use policy::{AssemblyPolicy, ChannelRounding, Scale};

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, LayerPosition, Result};

/// Which layer list an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Backbone,
    Head,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Backbone => f.write_str("backbone"),
            Section::Head => f.write_str("head"),
        }
    }
}

/// Model architecture file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of classes
    pub nc: usize,

    /// Repeat count multiplier
    pub depth_multiple: f64,

    /// Channel count multiplier
    pub width_multiple: f64,

    /// Input channels (3 when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ch: Option<usize>,

    pub anchors: Anchors,

    pub backbone: Vec<LayerSpec>,

    pub head: Vec<LayerSpec>,
}

/// Model file with layer entries left undecoded, so each entry can be
/// decoded on its own and errors can name the layer.
#[derive(Deserialize)]
struct RawModelConfig<L> {
    nc: usize,
    depth_multiple: f64,
    width_multiple: f64,
    #[serde(default)]
    ch: Option<usize>,
    anchors: Anchors,
    backbone: Vec<L>,
    head: Vec<L>,
}

impl<L> RawModelConfig<L> {
    fn into_config<E, F>(self, decode: F) -> Result<ModelConfig>
    where
        E: fmt::Display,
        F: Fn(L) -> std::result::Result<LayerSpec, E>,
    {
        let head_offset = self.backbone.len();
        let decode_section = |section: Section, layers: Vec<L>, offset: usize| {
            layers
                .into_iter()
                .enumerate()
                .map(|(local, layer)| {
                    decode(layer).map_err(|e| {
                        let position = LayerPosition {
                            section,
                            local,
                            index: offset + local,
                        };
                        Error::schema_at(position, e.to_string())
                    })
                })
                .collect::<Result<Vec<_>>>()
        };
        Ok(ModelConfig {
            nc: self.nc,
            depth_multiple: self.depth_multiple,
            width_multiple: self.width_multiple,
            ch: self.ch,
            anchors: self.anchors,
            backbone: decode_section(Section::Backbone, self.backbone, 0)?,
            head: decode_section(Section::Head, self.head, head_offset)?,
        })
    }
}

fn default_input_channels() -> usize {
    3
}

impl ModelConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = read(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = read(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse and validate YAML. Malformed layer entries are reported with
    /// their position.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let raw: RawModelConfig<serde_yaml::Value> = serde_yaml::from_str(content)?;
        let config = raw.into_config(serde_yaml::from_value::<LayerSpec>)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawModelConfig<serde_json::Value> = serde_json::from_str(content)?;
        let config = raw.into_config(serde_json::from_value::<LayerSpec>)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the configuration as YAML
    pub fn save_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_yaml_string()?).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Top-level checks. Per-layer problems surface during assembly.
    pub fn validate(&self) -> Result<()> {
        if self.nc == 0 {
            return Err(Error::schema("nc must be positive"));
        }
        check_multiple("depth_multiple", self.depth_multiple)?;
        check_multiple("width_multiple", self.width_multiple)?;
        if self.ch == Some(0) {
            return Err(Error::schema("ch must be positive"));
        }
        self.anchors.validate()?;
        if self.backbone.is_empty() {
            return Err(Error::schema("backbone must contain at least one layer"));
        }
        Ok(())
    }

    /// Input tensor channels
    pub fn input_channels(&self) -> usize {
        self.ch.unwrap_or_else(default_input_channels)
    }

    /// Total number of layers (backbone + head)
    pub fn num_layers(&self) -> usize {
        self.backbone.len() + self.head.len()
    }

    /// Outputs per anchor times anchors per scale: `na * (nc + 5)`
    pub fn detect_outputs(&self) -> usize {
        self.anchors
            .per_scale()
            .saturating_mul(self.nc.saturating_add(5))
    }

    /// Layers in execution order, backbone first.
    pub fn layers(&self) -> impl Iterator<Item = (LayerPosition, &LayerSpec)> {
        let backbone = self.backbone.iter().enumerate().map(|(i, l)| {
            (
                LayerPosition {
                    section: Section::Backbone,
                    local: i,
                    index: i,
                },
                l,
            )
        });
        let offset = self.backbone.len();
        let head = self.head.iter().enumerate().map(move |(i, l)| {
            (
                LayerPosition {
                    section: Section::Head,
                    local: i,
                    index: offset + i,
                },
                l,
            )
        });
        backbone.chain(head)
    }

    /// Copy with the multipliers of a standard scale preset
    pub fn with_scale(&self, scale: Scale) -> Self {
        let (depth, width) = scale.multiples();
        self.with_multiples(depth, width)
    }

    pub fn with_multiples(&self, depth_multiple: f64, width_multiple: f64) -> Self {
        Self {
            depth_multiple,
            width_multiple,
            ..self.clone()
        }
    }

    pub fn with_num_classes(&self, nc: usize) -> Self {
        Self {
            nc,
            ..self.clone()
        }
    }
}

fn check_multiple(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::schema(format!(
            "{} must be a positive number, got {}",
            name, value
        )))
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}
