//! Multi-scale detection head

use crate::config::{Anchors, Arg, Dim};
use crate::error::{Error, Result};

use super::args::ArgReader;

/// Detection head over one feature map per scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Detect {
    /// Number of classes
    pub nc: usize,
    pub anchors: Anchors,
    /// Input channels per scale
    pub ch: Vec<usize>,
    /// Input stride per scale, when statically known
    pub strides: Vec<Option<usize>>,
}

impl Detect {
    /// Build from `[nc, anchors]`. The symbols `nc` and `anchors` resolve to
    /// the model's top-level values; literals are accepted as well.
    pub(crate) fn from_args(
        reader: &ArgReader<'_>,
        model_nc: usize,
        model_anchors: &Anchors,
        ch: Vec<usize>,
        strides: Vec<Option<usize>>,
    ) -> Result<Self> {
        let position = reader.position();

        let nc = match reader.raw(0) {
            Some(a) if a.as_symbol() == Some("nc") => model_nc,
            Some(Arg::Int(v)) if *v > 0 => *v as usize,
            other => {
                return Err(Error::schema_at(
                    position,
                    format!("Detect class count must be 'nc' or a positive integer, got {}", show(other)),
                ))
            }
        };

        let anchors = match reader.raw(1) {
            Some(a) if a.as_symbol() == Some("anchors") => model_anchors.clone(),
            Some(Arg::Int(v)) if *v > 0 => Anchors::Count(*v as usize),
            Some(Arg::List(scales)) => anchors_from_list(scales).ok_or_else(|| {
                Error::schema_at(position, "Detect anchors must be a list of number lists")
            })?,
            other => {
                return Err(Error::schema_at(
                    position,
                    format!("Detect anchors must be 'anchors', a count or a list, got {}", show(other)),
                ))
            }
        };
        anchors
            .validate()
            .map_err(|e| Error::schema_at(position, e.to_string()))?;

        if let Some(scales) = anchors.num_scales() {
            if scales != ch.len() {
                return Err(Error::schema_at(
                    position,
                    format!(
                        "Detect has {} sources but {} anchor scales",
                        ch.len(),
                        scales
                    ),
                ));
            }
        }

        Ok(Self {
            nc,
            anchors,
            ch,
            strides,
        })
    }

    /// Number of detection scales
    pub fn nl(&self) -> usize {
        self.ch.len()
    }

    /// Anchors per scale
    pub fn na(&self) -> usize {
        self.anchors.per_scale()
    }

    /// Outputs per anchor: box (4), objectness (1) and class scores
    pub fn outputs_per_anchor(&self) -> usize {
        self.nc.saturating_add(5)
    }

    /// Output channels of each scale's 1x1 prediction conv
    pub fn no(&self) -> usize {
        self.na().saturating_mul(self.outputs_per_anchor())
    }
}

fn anchors_from_list(scales: &[Arg]) -> Option<Anchors> {
    scales
        .iter()
        .map(|scale| match scale {
            Arg::List(dims) => dims
                .iter()
                .map(|d| match d {
                    Arg::Int(v) => Some(Dim::Int(*v)),
                    Arg::Float(v) => Some(Dim::Float(*v)),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(Anchors::PerScale)
}

fn show(arg: Option<&Arg>) -> String {
    arg.map(|a| a.to_string()).unwrap_or_else(|| "nothing".to_string())
}
