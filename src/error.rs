//! Error types for loading and assembling model configurations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::Section;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Where a layer sits in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerPosition {
    /// Section the layer was declared in
    pub section: Section,
    /// Index within that section
    pub local: usize,
    /// Index over backbone followed by head
    pub index: usize,
}

impl fmt::Display for LayerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer {} ({}[{}])", self.index, self.section, self.local)
    }
}

/// Accepted argument count range for a module kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: usize,
}

impl Arity {
    pub const fn exactly(n: usize) -> Self {
        Self { min: n, max: n }
    }

    pub const fn between(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn accepts(&self, n: usize) -> bool {
        (self.min..=self.max).contains(&n)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else if self.max == usize::MAX {
            write!(f, "at least {}", self.min)
        } else {
            write!(f, "{} to {}", self.min, self.max)
        }
    }
}

/// Configuration and assembly errors. All of them are fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error("schema error{}: {message}", at(.position))]
    Schema {
        position: Option<LayerPosition>,
        message: String,
    },

    #[error("{position}: unresolved source reference {reference}: {reason}")]
    UnresolvedReference {
        position: LayerPosition,
        reference: i64,
        reason: String,
    },

    #[error("{position}: unknown module type '{name}'")]
    UnknownModule { position: LayerPosition, name: String },

    #[error("{position}: {module} expects {expected} arguments, got {actual}")]
    ArgumentArity {
        position: LayerPosition,
        module: &'static str,
        expected: Arity,
        actual: usize,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn at(position: &Option<LayerPosition>) -> String {
    match position {
        Some(p) => format!(" at {}", p),
        None => String::new(),
    }
}

impl Error {
    /// Top-level schema error not tied to a layer.
    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema {
            position: None,
            message: message.into(),
        }
    }

    /// Schema error for a specific layer.
    pub fn schema_at(position: LayerPosition, message: impl Into<String>) -> Self {
        Error::Schema {
            position: Some(position),
            message: message.into(),
        }
    }

    /// Position of the offending layer, if the error is tied to one.
    pub fn position(&self) -> Option<LayerPosition> {
        match self {
            Error::Schema { position, .. } => *position,
            Error::UnresolvedReference { position, .. }
            | Error::UnknownModule { position, .. }
            | Error::ArgumentArity { position, .. } => Some(*position),
            Error::Io { .. } => None,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::schema(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::schema(e.to_string())
    }
}
