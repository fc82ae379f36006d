//! Layer entries: `[source, repeat, module, args]`

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single reference to a layer output.
///
/// Encoded in files as a signed integer: `-1` is the previous layer,
/// `-k` the layer `k` positions back, and a non-negative value an absolute
/// layer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum LayerRef {
    /// The immediately preceding layer (or the input tensor for layer 0)
    Previous,
    /// `k` layers back, `k >= 2`
    Back(usize),
    /// Absolute layer index
    Index(usize),
}

impl TryFrom<i64> for LayerRef {
    type Error = String;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(LayerRef::Previous),
            v if v < -1 => usize::try_from(v.unsigned_abs())
                .map(LayerRef::Back)
                .map_err(|_| format!("layer reference {} out of range", v)),
            v => usize::try_from(v)
                .map(LayerRef::Index)
                .map_err(|_| format!("layer reference {} out of range", v)),
        }
    }
}

impl From<LayerRef> for i64 {
    fn from(r: LayerRef) -> Self {
        match r {
            LayerRef::Previous => -1,
            LayerRef::Back(k) => 0i64.checked_sub_unsigned(k as u64).unwrap_or(i64::MIN),
            LayerRef::Index(i) => i as i64,
        }
    }
}

impl fmt::Display for LayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

/// The `source` field of a layer entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Single(LayerRef),
    Many(Vec<LayerRef>),
}

impl Source {
    /// All references in declaration order.
    pub fn refs(&self) -> &[LayerRef] {
        match self {
            Source::Single(r) => std::slice::from_ref(r),
            Source::Many(refs) => refs,
        }
    }

    pub fn is_many(&self) -> bool {
        matches!(self, Source::Many(_))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Single(r) => write!(f, "{}", r),
            Source::Many(refs) => {
                write!(f, "[")?;
                for (i, r) in refs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", r)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A module constructor argument as written in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Arg>),
}

impl Arg {
    /// `null` or the Python-style `None` sentinel.
    pub fn is_none(&self) -> bool {
        match self {
            Arg::Null => true,
            Arg::Str(s) => s == "None",
            _ => false,
        }
    }

    /// A bare symbol such as `nc` or `anchors`.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Null => write!(f, "None"),
            Arg::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Arg::Int(i) => write!(f, "{}", i),
            Arg::Float(x) => write!(f, "{}", x),
            Arg::Str(s) => write!(f, "'{}'", s),
            Arg::List(items) => {
                write!(f, "[")?;
                for (i, a) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, "]")
            }
        }
    }
}

type RawLayer = (Source, u32, String, Vec<Arg>);

/// One `[source, repeat, module, args]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawLayer", into = "RawLayer")]
pub struct LayerSpec {
    pub source: Source,
    pub repeat: u32,
    /// Module name exactly as written, e.g. `Conv` or `nn.Upsample`
    pub module: String,
    pub args: Vec<Arg>,
}

impl From<RawLayer> for LayerSpec {
    fn from((source, repeat, module, args): RawLayer) -> Self {
        Self {
            source,
            repeat,
            module,
            args,
        }
    }
}

impl From<LayerSpec> for RawLayer {
    fn from(l: LayerSpec) -> Self {
        (l.source, l.repeat, l.module, l.args)
    }
}

impl LayerSpec {
    pub fn new(source: Source, repeat: u32, module: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            source,
            repeat,
            module: module.into(),
            args,
        }
    }
}
