//! Typed module descriptors
//!
//! Each variant carries the fully resolved constructor arguments of one
//! layer: input channels are filled in from the source layers and channel
//! counts are already width-scaled.

use std::fmt;

use crate::error::{Error, Result};

use super::args::ArgReader;
use super::detect::Detect;
use super::kind::ModuleKind;

/// Convolution with batch norm and activation (`Conv`, `DWConv`,
/// `GhostConv`, `Focus`).
#[derive(Debug, Clone, PartialEq)]
pub struct ConvBlock {
    pub kind: ModuleKind,
    pub c1: usize,
    pub c2: usize,
    pub k: usize,
    pub s: usize,
    /// Explicit padding; `None` pads to "same"
    pub p: Option<usize>,
    pub g: usize,
    pub act: bool,
}

impl ConvBlock {
    fn from_args(kind: ModuleKind, c1: usize, c2: usize, r: &ArgReader<'_>) -> Result<Self> {
        let k = r.usize_or(1, "k", 1)?;
        let s = r.usize_or(2, "s", 1)?;
        let (p, g, act) = match kind {
            ModuleKind::DWConv => (None, gcd(c1, c2), r.bool_or(3, "act", true)?),
            ModuleKind::GhostConv => (None, r.usize_or(3, "g", 1)?, r.bool_or(4, "act", true)?),
            _ => (
                r.int_opt(3, "p")?.map(|p| p.max(0) as usize),
                r.usize_or(4, "g", 1)?,
                r.bool_or(5, "act", true)?,
            ),
        };
        if c1 % g != 0 || c2 % g != 0 {
            return Err(Error::schema_at(
                r.position(),
                format!("{} groups {} do not divide channels {} -> {}", kind, g, c1, c2),
            ));
        }
        Ok(Self {
            kind,
            c1,
            c2,
            k,
            s,
            p,
            g,
            act,
        })
    }

    /// Padding actually applied
    pub fn padding(&self) -> usize {
        self.p.unwrap_or(self.k / 2)
    }
}

/// Cross convolution: a `1xk` then `kx1` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossConvBlock {
    pub c1: usize,
    pub c2: usize,
    pub k: usize,
    pub s: usize,
    pub g: usize,
    pub e: f64,
    pub shortcut: bool,
}

/// Residual bottleneck.
#[derive(Debug, Clone, PartialEq)]
pub struct BottleneckBlock {
    pub c1: usize,
    pub c2: usize,
    pub shortcut: bool,
    pub g: usize,
    pub e: f64,
}

impl BottleneckBlock {
    /// Residual add is only possible when the shape is preserved
    pub fn has_residual(&self) -> bool {
        self.shortcut && self.c1 == self.c2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GhostBottleneckBlock {
    pub c1: usize,
    pub c2: usize,
    pub k: usize,
    pub s: usize,
}

/// CSP bottleneck stack. `n` is the depth-scaled repeat.
#[derive(Debug, Clone, PartialEq)]
pub struct CspBlock {
    pub kind: ModuleKind,
    pub c1: usize,
    pub c2: usize,
    pub n: usize,
    /// Pooling kernels of the inner pyramid (`C3SPP` only)
    pub kernels: Option<Vec<usize>>,
    pub shortcut: bool,
    pub g: usize,
    pub e: f64,
}

impl CspBlock {
    /// Hidden channels of the split branches
    pub fn hidden(&self) -> usize {
        (self.c2 as f64 * self.e) as usize
    }
}

/// Spatial pyramid pooling. `fast` is the chained single-kernel variant.
#[derive(Debug, Clone, PartialEq)]
pub struct SppBlock {
    pub c1: usize,
    pub c2: usize,
    pub kernels: Vec<usize>,
    pub fast: bool,
}

/// Channel or coordinate attention.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionBlock {
    pub kind: ModuleKind,
    pub c1: usize,
    pub c2: usize,
    /// Reduction ratio (`SE`, `CoordAtt`) or 1-D kernel size (`ECA`)
    pub param: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Upsample {
    pub size: Option<usize>,
    pub scale_factor: Option<f64>,
    pub mode: String,
}

/// Concatenation over the channel dimension. BiFPN variants carry one
/// learnable weight per branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Concat {
    pub kind: ModuleKind,
    pub dim: i64,
    pub branches: usize,
    pub weighted: bool,
}

/// Weighted element-wise sum followed by a 1x1 conv.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedAdd {
    pub c1: usize,
    pub c2: usize,
    pub branches: usize,
}

/// An assembled module.
#[derive(Debug, Clone, PartialEq)]
pub enum Module {
    Conv(ConvBlock),
    CrossConv(CrossConvBlock),
    Bottleneck(BottleneckBlock),
    GhostBottleneck(GhostBottleneckBlock),
    Csp(CspBlock),
    Spp(SppBlock),
    Attention(AttentionBlock),
    Upsample(Upsample),
    Concat(Concat),
    WeightedAdd(WeightedAdd),
    Contract { gain: usize },
    Expand { gain: usize },
    BatchNorm { c: usize },
    Detect(Detect),
}

/// How a module changes spatial resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resample {
    Keep,
    Down(usize),
    Up(f64),
    /// Output size fixed independently of the input
    Unknown,
}

/// Resolved inputs for building a non-head module.
pub(crate) struct BuildInputs<'a> {
    /// Output channels of each source
    pub channels: &'a [usize],
    /// Width-scaled first argument, for kinds that take one
    pub c2: Option<usize>,
    /// Effective repeat after depth scaling
    pub depth: usize,
}

impl Module {
    /// Build any kind except `Detect`, which needs model-level context.
    pub(crate) fn build(kind: ModuleKind, r: &ArgReader<'_>, inputs: &BuildInputs<'_>) -> Result<Self> {
        let position = r.position();
        let c1 = inputs.channels.first().copied().unwrap_or(0);
        let c2 = || {
            inputs.c2.ok_or_else(|| {
                Error::schema_at(position, format!("{} requires an output channel count", kind))
            })
        };

        let module = match kind {
            ModuleKind::Conv | ModuleKind::DWConv | ModuleKind::GhostConv | ModuleKind::Focus => {
                Module::Conv(ConvBlock::from_args(kind, c1, c2()?, r)?)
            }
            ModuleKind::CrossConv => Module::CrossConv(CrossConvBlock {
                c1,
                c2: c2()?,
                k: r.usize_or(1, "k", 3)?,
                s: r.usize_or(2, "s", 1)?,
                g: r.usize_or(3, "g", 1)?,
                e: r.float_or(4, "e", 1.0)?,
                shortcut: r.bool_or(5, "shortcut", false)?,
            }),
            ModuleKind::Bottleneck => Module::Bottleneck(BottleneckBlock {
                c1,
                c2: c2()?,
                shortcut: r.bool_or(1, "shortcut", true)?,
                g: r.usize_or(2, "g", 1)?,
                e: r.float_or(3, "e", 0.5)?,
            }),
            ModuleKind::GhostBottleneck => {
                let s = r.usize_or(2, "s", 1)?;
                if s != 1 && s != 2 {
                    return Err(Error::schema_at(
                        position,
                        format!("GhostBottleneck stride must be 1 or 2, got {}", s),
                    ));
                }
                Module::GhostBottleneck(GhostBottleneckBlock {
                    c1,
                    c2: c2()?,
                    k: r.usize_or(1, "k", 3)?,
                    s,
                })
            }
            ModuleKind::Spp => Module::Spp(SppBlock {
                c1,
                c2: c2()?,
                kernels: r.usize_list_or(1, "k", &[5, 9, 13])?,
                fast: false,
            }),
            ModuleKind::Sppf => Module::Spp(SppBlock {
                c1,
                c2: c2()?,
                kernels: vec![r.usize_or(1, "k", 5)?],
                fast: true,
            }),
            ModuleKind::Se | ModuleKind::Eca | ModuleKind::CoordAtt => {
                let c2 = c2()?;
                if c2 != c1 {
                    return Err(Error::schema_at(
                        position,
                        format!(
                            "{} preserves channels, but input has {} and output is declared as {}",
                            kind, c1, c2
                        ),
                    ));
                }
                let default = match kind {
                    ModuleKind::Se => 16,
                    ModuleKind::Eca => 3,
                    _ => 32,
                };
                let name = match kind {
                    ModuleKind::Eca => "k_size",
                    ModuleKind::Se => "r",
                    _ => "reduction",
                };
                Module::Attention(AttentionBlock {
                    kind,
                    c1,
                    c2,
                    param: r.usize_or(1, name, default)?,
                })
            }
            ModuleKind::Upsample => {
                let size = r.usize_opt(0, "size")?;
                let scale_factor = r.float_opt(1, "scale_factor")?;
                if size.is_none() && scale_factor.is_none() {
                    return Err(Error::schema_at(
                        position,
                        "nn.Upsample needs either a size or a scale_factor",
                    ));
                }
                if let Some(f) = scale_factor {
                    if f.is_nan() || f <= 0.0 {
                        return Err(Error::schema_at(
                            position,
                            format!("nn.Upsample scale_factor must be positive, got {}", f),
                        ));
                    }
                }
                Module::Upsample(Upsample {
                    size,
                    scale_factor,
                    mode: r.str_or(2, "mode", "nearest")?,
                })
            }
            ModuleKind::Concat | ModuleKind::BiFpnConcat2 | ModuleKind::BiFpnConcat3 => {
                let dim = r.int_opt(0, "dimension")?.unwrap_or(1);
                if dim != 1 {
                    return Err(Error::schema_at(
                        position,
                        format!("{} only supports channel concatenation (dimension 1), got {}", kind, dim),
                    ));
                }
                if inputs
                    .channels
                    .iter()
                    .try_fold(0usize, |acc, &c| acc.checked_add(c))
                    .is_none()
                {
                    return Err(Error::schema_at(
                        position,
                        format!("{} output channel count overflows", kind),
                    ));
                }
                Module::Concat(Concat {
                    kind,
                    dim,
                    branches: inputs.channels.len(),
                    weighted: kind != ModuleKind::Concat,
                })
            }
            ModuleKind::BiFpnAdd2 => {
                if let Some(&other) = inputs.channels.iter().find(|&&c| c != c1) {
                    return Err(Error::schema_at(
                        position,
                        format!("BiFPN_Add2 inputs must have equal channels, got {} and {}", c1, other),
                    ));
                }
                Module::WeightedAdd(WeightedAdd {
                    c1,
                    c2: c1,
                    branches: inputs.channels.len(),
                })
            }
            ModuleKind::Contract => {
                let gain = r.usize_or(0, "gain", 2)?;
                if gain_area(gain).and_then(|area| c1.checked_mul(area)).is_none() {
                    return Err(Error::schema_at(
                        position,
                        format!("Contract gain {} on {} channels overflows", gain, c1),
                    ));
                }
                Module::Contract { gain }
            }
            ModuleKind::Expand => {
                let gain = r.usize_or(0, "gain", 2)?;
                if !matches!(gain_area(gain), Some(area) if c1 % area == 0) {
                    return Err(Error::schema_at(
                        position,
                        format!("Expand gain {} does not divide {} channels", gain, c1),
                    ));
                }
                Module::Expand { gain }
            }
            ModuleKind::BatchNorm2d => Module::BatchNorm { c: c1 },
            ModuleKind::C3Spp => Module::Csp(CspBlock {
                kind,
                c1,
                c2: c2()?,
                n: inputs.depth,
                kernels: Some(r.usize_list_or(1, "k", &[5, 9, 13])?),
                shortcut: r.bool_or(2, "shortcut", true)?,
                g: r.usize_or(3, "g", 1)?,
                e: r.float_or(4, "e", 0.5)?,
            }),
            ModuleKind::BottleneckCsp
            | ModuleKind::C3
            | ModuleKind::C3x
            | ModuleKind::C3Tr
            | ModuleKind::C3Ghost
            | ModuleKind::C3Cbam
            | ModuleKind::C3Ca
            | ModuleKind::C3Se
            | ModuleKind::C3Eca => Module::Csp(CspBlock {
                kind,
                c1,
                c2: c2()?,
                n: inputs.depth,
                kernels: None,
                shortcut: r.bool_or(1, "shortcut", true)?,
                g: r.usize_or(2, "g", 1)?,
                e: r.float_or(3, "e", 0.5)?,
            }),
            ModuleKind::Detect => {
                return Err(Error::schema_at(
                    position,
                    "Detect must be built with model context",
                ))
            }
        };
        Ok(module)
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            Module::Conv(m) => m.kind,
            Module::CrossConv(_) => ModuleKind::CrossConv,
            Module::Bottleneck(_) => ModuleKind::Bottleneck,
            Module::GhostBottleneck(_) => ModuleKind::GhostBottleneck,
            Module::Csp(m) => m.kind,
            Module::Spp(m) if m.fast => ModuleKind::Sppf,
            Module::Spp(_) => ModuleKind::Spp,
            Module::Attention(m) => m.kind,
            Module::Upsample(_) => ModuleKind::Upsample,
            Module::Concat(m) => m.kind,
            Module::WeightedAdd(_) => ModuleKind::BiFpnAdd2,
            Module::Contract { .. } => ModuleKind::Contract,
            Module::Expand { .. } => ModuleKind::Expand,
            Module::BatchNorm { .. } => ModuleKind::BatchNorm2d,
            Module::Detect(_) => ModuleKind::Detect,
        }
    }

    /// Output channels given the channels of each input. `None` for the head.
    pub fn out_channels(&self, inputs: &[usize]) -> Option<usize> {
        let c1 = inputs.first().copied().unwrap_or(0);
        match self {
            Module::Conv(m) => Some(m.c2),
            Module::CrossConv(m) => Some(m.c2),
            Module::Bottleneck(m) => Some(m.c2),
            Module::GhostBottleneck(m) => Some(m.c2),
            Module::Csp(m) => Some(m.c2),
            Module::Spp(m) => Some(m.c2),
            Module::Attention(m) => Some(m.c2),
            Module::Upsample(_) | Module::BatchNorm { .. } => Some(c1),
            Module::Concat(_) => Some(inputs.iter().fold(0usize, |acc, &c| acc.saturating_add(c))),
            Module::WeightedAdd(m) => Some(m.c2),
            Module::Contract { gain } => Some(c1.saturating_mul(gain.saturating_mul(*gain))),
            Module::Expand { gain } => Some(c1 / gain.saturating_mul(*gain).max(1)),
            Module::Detect(_) => None,
        }
    }

    /// Spatial effect of one instance.
    pub fn resample(&self) -> Resample {
        match self {
            Module::Conv(m) if m.kind == ModuleKind::Focus => {
                m.s.checked_mul(2).map_or(Resample::Unknown, Resample::Down)
            }
            Module::Conv(m) => down(m.s),
            Module::CrossConv(m) => down(m.s),
            Module::GhostBottleneck(m) => down(m.s),
            Module::Contract { gain } => down(*gain),
            Module::Expand { gain } => Resample::Up(*gain as f64),
            Module::Upsample(m) => match (m.size, m.scale_factor) {
                (None, Some(f)) => Resample::Up(f),
                _ => Resample::Unknown,
            },
            _ => Resample::Keep,
        }
    }

    pub fn as_detect(&self) -> Option<&Detect> {
        match self {
            Module::Detect(d) => Some(d),
            _ => None,
        }
    }

    /// Constructor arguments after resolution, in declaration order.
    pub fn arguments(&self) -> String {
        let items: Vec<String> = match self {
            Module::Conv(m) => {
                let mut v = vec![m.c1.to_string(), m.c2.to_string(), m.k.to_string(), m.s.to_string()];
                match m.kind {
                    ModuleKind::DWConv | ModuleKind::GhostConv => {}
                    _ => {
                        if let Some(p) = m.p {
                            v.push(p.to_string());
                        }
                    }
                }
                v
            }
            Module::CrossConv(m) => vec![
                m.c1.to_string(),
                m.c2.to_string(),
                m.k.to_string(),
                m.s.to_string(),
                m.g.to_string(),
                m.e.to_string(),
                py_bool(m.shortcut),
            ],
            Module::Bottleneck(m) => vec![m.c1.to_string(), m.c2.to_string(), py_bool(m.shortcut)],
            Module::GhostBottleneck(m) => {
                vec![m.c1.to_string(), m.c2.to_string(), m.k.to_string(), m.s.to_string()]
            }
            Module::Csp(m) => {
                let mut v = vec![m.c1.to_string(), m.c2.to_string()];
                if let Some(k) = &m.kernels {
                    v.push(format!("{:?}", k));
                }
                v.push(m.n.to_string());
                if !m.shortcut {
                    v.push(py_bool(false));
                }
                v
            }
            Module::Spp(m) if m.fast => {
                vec![m.c1.to_string(), m.c2.to_string(), m.kernels[0].to_string()]
            }
            Module::Spp(m) => vec![m.c1.to_string(), m.c2.to_string(), format!("{:?}", m.kernels)],
            Module::Attention(m) => vec![m.c1.to_string(), m.c2.to_string(), m.param.to_string()],
            Module::Upsample(m) => vec![
                m.size.map(|s| s.to_string()).unwrap_or_else(|| "None".to_string()),
                m.scale_factor
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "None".to_string()),
                format!("'{}'", m.mode),
            ],
            Module::Concat(m) => vec![m.dim.to_string()],
            Module::WeightedAdd(m) => vec![m.c1.to_string(), m.c2.to_string()],
            Module::Contract { gain } | Module::Expand { gain } => vec![gain.to_string()],
            Module::BatchNorm { c } => vec![c.to_string()],
            Module::Detect(d) => vec![
                d.nc.to_string(),
                format!("{}x{} anchors", d.nl(), d.na()),
                format!("{:?}", d.ch),
            ],
        };
        format!("[{}]", items.join(", "))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind(), self.arguments())
    }
}

fn down(s: usize) -> Resample {
    if s > 1 {
        Resample::Down(s)
    } else {
        Resample::Keep
    }
}

/// `gain^2`, the channel factor of a space-to-depth move
fn gain_area(gain: usize) -> Option<usize> {
    gain.checked_mul(gain)
}

fn py_bool(b: bool) -> String {
    if b { "True" } else { "False" }.to_string()
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a.max(1)
    } else {
        gcd(b, a % b)
    }
}
