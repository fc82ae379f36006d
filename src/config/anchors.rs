//! Anchor box priors

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One anchor dimension. Integers are kept as integers so files round-trip
/// without turning `10` into `10.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Int(i64),
    Float(f64),
}

impl Dim {
    pub fn value(&self) -> f64 {
        match self {
            Dim::Int(v) => *v as f64,
            Dim::Float(v) => *v,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Int(v) => write!(f, "{}", v),
            Dim::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Anchor configuration.
///
/// Either explicit `[w0,h0, w1,h1, ...]` lists, one per detection scale, or a
/// bare count of anchors per scale whose sizes are fitted later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Anchors {
    Count(usize),
    PerScale(Vec<Vec<Dim>>),
}

impl Anchors {
    /// Number of detection scales, if the anchors fix it.
    pub fn num_scales(&self) -> Option<usize> {
        match self {
            Anchors::Count(_) => None,
            Anchors::PerScale(scales) => Some(scales.len()),
        }
    }

    /// Number of anchors at each scale.
    pub fn per_scale(&self) -> usize {
        match self {
            Anchors::Count(n) => *n,
            Anchors::PerScale(scales) => scales.first().map(|s| s.len() / 2).unwrap_or(0),
        }
    }

    /// `(width, height)` pairs for one scale.
    pub fn pairs(&self, scale: usize) -> Vec<(f64, f64)> {
        match self {
            Anchors::Count(_) => Vec::new(),
            Anchors::PerScale(scales) => scales
                .get(scale)
                .map(|dims| {
                    dims.chunks_exact(2)
                        .map(|p| (p[0].value(), p[1].value()))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Anchors::Count(0) => Err(Error::schema("anchors: count must be positive")),
            Anchors::Count(_) => Ok(()),
            Anchors::PerScale(scales) => {
                let first = scales
                    .first()
                    .ok_or_else(|| Error::schema("anchors: at least one scale is required"))?;
                for (i, dims) in scales.iter().enumerate() {
                    if dims.is_empty() || dims.len() % 2 != 0 {
                        return Err(Error::schema(format!(
                            "anchors[{}]: expected non-empty width/height pairs, got {} values",
                            i,
                            dims.len()
                        )));
                    }
                    if dims.len() != first.len() {
                        return Err(Error::schema(format!(
                            "anchors[{}]: {} anchors, but anchors[0] has {}",
                            i,
                            dims.len() / 2,
                            first.len() / 2
                        )));
                    }
                    if let Some(d) = dims.iter().find(|d| d.value().is_nan() || d.value() <= 0.0) {
                        return Err(Error::schema(format!(
                            "anchors[{}]: dimension {} is not positive",
                            i, d
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}
