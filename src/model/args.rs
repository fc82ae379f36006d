//! Positional argument decoding for module constructors

use crate::config::Arg;
use crate::error::{Error, LayerPosition, Result};

use super::ModuleKind;

/// Reads typed positional arguments for one layer, reporting type errors
/// against that layer's position.
pub(crate) struct ArgReader<'a> {
    args: &'a [Arg],
    kind: ModuleKind,
    position: LayerPosition,
}

impl<'a> ArgReader<'a> {
    /// Checks the argument count against the kind's arity up front.
    pub fn new(kind: ModuleKind, args: &'a [Arg], position: LayerPosition) -> Result<Self> {
        let expected = kind.arity();
        if !expected.accepts(args.len()) {
            return Err(Error::ArgumentArity {
                position,
                module: kind.name(),
                expected,
                actual: args.len(),
            });
        }
        Ok(Self {
            args,
            kind,
            position,
        })
    }

    pub fn position(&self) -> LayerPosition {
        self.position
    }

    /// Argument `i`, treating a trailing `None` as absent.
    fn get(&self, i: usize) -> Option<&'a Arg> {
        self.args.get(i).filter(|a| !a.is_none())
    }

    pub fn raw(&self, i: usize) -> Option<&'a Arg> {
        self.args.get(i)
    }

    fn mismatch(&self, i: usize, name: &str, expected: &str) -> Error {
        Error::schema_at(
            self.position,
            format!(
                "{} argument {} ({}) must be {}, got {}",
                self.kind.name(),
                i,
                name,
                expected,
                self.args[i]
            ),
        )
    }

    /// Positive integer argument.
    pub fn usize_opt(&self, i: usize, name: &str) -> Result<Option<usize>> {
        match self.get(i) {
            None => Ok(None),
            Some(Arg::Int(v)) if *v > 0 => Ok(Some(*v as usize)),
            Some(_) => Err(self.mismatch(i, name, "a positive integer")),
        }
    }

    pub fn usize_or(&self, i: usize, name: &str, default: usize) -> Result<usize> {
        Ok(self.usize_opt(i, name)?.unwrap_or(default))
    }

    pub fn usize_req(&self, i: usize, name: &str) -> Result<usize> {
        self.usize_opt(i, name)?.ok_or_else(|| {
            Error::schema_at(
                self.position,
                format!("{} argument {} ({}) is required", self.kind.name(), i, name),
            )
        })
    }

    /// Integer argument that may be zero (padding, dimension).
    pub fn int_opt(&self, i: usize, name: &str) -> Result<Option<i64>> {
        match self.get(i) {
            None => Ok(None),
            Some(Arg::Int(v)) => Ok(Some(*v)),
            Some(_) => Err(self.mismatch(i, name, "an integer")),
        }
    }

    pub fn float_or(&self, i: usize, name: &str, default: f64) -> Result<f64> {
        match self.get(i) {
            None => Ok(default),
            Some(Arg::Int(v)) => Ok(*v as f64),
            Some(Arg::Float(v)) => Ok(*v),
            Some(_) => Err(self.mismatch(i, name, "a number")),
        }
    }

    pub fn float_opt(&self, i: usize, name: &str) -> Result<Option<f64>> {
        match self.get(i) {
            None => Ok(None),
            Some(_) => self.float_or(i, name, 0.0).map(Some),
        }
    }

    pub fn bool_or(&self, i: usize, name: &str, default: bool) -> Result<bool> {
        match self.get(i) {
            None => Ok(default),
            Some(Arg::Bool(b)) => Ok(*b),
            Some(_) => Err(self.mismatch(i, name, "True or False")),
        }
    }

    pub fn str_or(&self, i: usize, name: &str, default: &str) -> Result<String> {
        match self.get(i) {
            None => Ok(default.to_string()),
            Some(Arg::Str(s)) => Ok(s.clone()),
            Some(_) => Err(self.mismatch(i, name, "a string")),
        }
    }

    /// A list of positive integers, or a single one.
    pub fn usize_list_or(&self, i: usize, name: &str, default: &[usize]) -> Result<Vec<usize>> {
        match self.get(i) {
            None => Ok(default.to_vec()),
            Some(Arg::Int(v)) if *v > 0 => Ok(vec![*v as usize]),
            Some(Arg::List(items)) if !items.is_empty() => items
                .iter()
                .map(|a| match a {
                    Arg::Int(v) if *v > 0 => Ok(*v as usize),
                    _ => Err(self.mismatch(i, name, "a list of positive integers")),
                })
                .collect(),
            Some(_) => Err(self.mismatch(i, name, "a list of positive integers")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Section;

    fn pos() -> LayerPosition {
        LayerPosition {
            section: Section::Backbone,
            local: 4,
            index: 4,
        }
    }

    #[test]
    fn test_arity_checked_on_construction() {
        let args = vec![Arg::Int(64); 7];
        let err = ArgReader::new(ModuleKind::Conv, &args, pos()).err().unwrap();
        assert!(matches!(err, Error::ArgumentArity { actual: 7, .. }));

        let err = ArgReader::new(ModuleKind::Conv, &[], pos()).err().unwrap();
        assert!(matches!(err, Error::ArgumentArity { actual: 0, .. }));
    }

    #[test]
    fn test_defaults_and_none() {
        let args = vec![Arg::Int(64), Arg::Int(3), Arg::Str("None".to_string())];
        let r = ArgReader::new(ModuleKind::Conv, &args, pos()).unwrap();
        assert_eq!(r.usize_req(0, "c2").unwrap(), 64);
        assert_eq!(r.usize_or(1, "k", 1).unwrap(), 3);
        assert_eq!(r.usize_or(2, "s", 1).unwrap(), 1);
        assert_eq!(r.usize_or(5, "g", 1).unwrap(), 1);
    }

    #[test]
    fn test_type_mismatch_is_schema_error() {
        let args = vec![Arg::Str("wide".to_string())];
        let r = ArgReader::new(ModuleKind::Conv, &args, pos()).unwrap();
        let err = r.usize_req(0, "c2").unwrap_err();
        assert!(matches!(err, Error::Schema { position: Some(p), .. } if p.index == 4));
    }

    #[test]
    fn test_kernel_list() {
        let args = vec![
            Arg::Int(1024),
            Arg::List(vec![Arg::Int(5), Arg::Int(9), Arg::Int(13)]),
        ];
        let r = ArgReader::new(ModuleKind::Spp, &args, pos()).unwrap();
        assert_eq!(r.usize_list_or(1, "k", &[5]).unwrap(), vec![5, 9, 13]);
    }
}
