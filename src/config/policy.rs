//! Depth and width scaling policy

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ModuleKind;

/// How scaled channel counts snap to the divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRounding {
    /// Round up to the next multiple (`ceil(x / d) * d`)
    #[default]
    Ceil,
    /// Round to the nearest multiple, halves up
    Nearest,
}

/// Rules applied by the assembler when scaling a base architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyPolicy {
    /// Scaled channel counts are multiples of this
    #[serde(default = "default_channel_divisor")]
    pub channel_divisor: usize,

    #[serde(default)]
    pub rounding: ChannelRounding,

    /// Module kinds that always run once, whatever the declared repeat
    #[serde(default = "default_repeat_exempt")]
    pub repeat_exempt: Vec<ModuleKind>,
}

fn default_channel_divisor() -> usize {
    8
}

fn default_repeat_exempt() -> Vec<ModuleKind> {
    vec![
        ModuleKind::Detect,
        ModuleKind::Concat,
        ModuleKind::BiFpnConcat2,
        ModuleKind::BiFpnConcat3,
        ModuleKind::BiFpnAdd2,
        ModuleKind::Upsample,
        ModuleKind::Contract,
        ModuleKind::Expand,
        ModuleKind::BatchNorm2d,
    ]
}

impl Default for AssemblyPolicy {
    fn default() -> Self {
        Self {
            channel_divisor: default_channel_divisor(),
            rounding: ChannelRounding::default(),
            repeat_exempt: default_repeat_exempt(),
        }
    }
}

impl AssemblyPolicy {
    /// Load a policy from a YAML file. Missing keys take their defaults.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let policy: Self = serde_yaml::from_str(content)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_divisor == 0 {
            return Err(Error::schema("policy: channel_divisor must be positive"));
        }
        Ok(())
    }

    pub fn is_repeat_exempt(&self, kind: ModuleKind) -> bool {
        self.repeat_exempt.contains(&kind)
    }

    /// Effective repeat count: `max(1, round(n * depth))`, ties to even.
    /// Exempt kinds always get 1.
    pub fn scale_repeat(&self, kind: ModuleKind, n: u32, depth_multiple: f64) -> usize {
        if self.is_repeat_exempt(kind) {
            return 1;
        }
        let scaled = (f64::from(n) * depth_multiple).round_ties_even();
        (scaled as usize).max(1)
    }

    /// Scale a channel count by `width_multiple` and snap it to the divisor.
    pub fn scale_channels(&self, channels: usize, width_multiple: f64) -> usize {
        let d = self.channel_divisor as f64;
        let x = channels as f64 * width_multiple / d;
        let units = match self.rounding {
            ChannelRounding::Ceil => x.ceil(),
            ChannelRounding::Nearest => x.round(),
        };
        (units.max(1.0) as usize).saturating_mul(self.channel_divisor)
    }
}

/// Standard model size presets as `(depth_multiple, width_multiple)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    N,
    S,
    M,
    L,
    X,
}

impl Scale {
    pub fn multiples(&self) -> (f64, f64) {
        match self {
            Scale::N => (0.33, 0.25),
            Scale::S => (0.33, 0.50),
            Scale::M => (0.67, 0.75),
            Scale::L => (1.0, 1.0),
            Scale::X => (1.33, 1.25),
        }
    }
}

impl FromStr for Scale {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "n" | "nano" => Ok(Scale::N),
            "s" | "small" => Ok(Scale::S),
            "m" | "medium" => Ok(Scale::M),
            "l" | "large" => Ok(Scale::L),
            "x" | "xlarge" => Ok(Scale::X),
            other => Err(format!("unknown scale '{}', expected one of n, s, m, l, x", other)),
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scale::N => "n",
            Scale::S => "s",
            Scale::M => "m",
            Scale::L => "l",
            Scale::X => "x",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_scaling() {
        let policy = AssemblyPolicy::default();
        assert_eq!(policy.scale_repeat(ModuleKind::C3, 3, 0.33), 1);
        assert_eq!(policy.scale_repeat(ModuleKind::C3, 9, 0.33), 3);
        assert_eq!(policy.scale_repeat(ModuleKind::C3, 6, 0.33), 2);
        assert_eq!(policy.scale_repeat(ModuleKind::C3, 0, 1.0), 1);
        assert_eq!(policy.scale_repeat(ModuleKind::Conv, 3, 1.33), 4);
    }

    #[test]
    fn test_depth_scaling_ties_to_even() {
        let policy = AssemblyPolicy::default();
        assert_eq!(policy.scale_repeat(ModuleKind::C3, 5, 0.5), 2);
        assert_eq!(policy.scale_repeat(ModuleKind::C3, 3, 0.5), 2);
    }

    #[test]
    fn test_exempt_kinds_ignore_multiplier() {
        let policy = AssemblyPolicy::default();
        assert_eq!(policy.scale_repeat(ModuleKind::Concat, 3, 1.0), 1);
        assert_eq!(policy.scale_repeat(ModuleKind::Detect, 1, 2.0), 1);
        assert_eq!(policy.scale_repeat(ModuleKind::Upsample, 4, 0.33), 1);
    }

    #[test]
    fn test_width_scaling() {
        let policy = AssemblyPolicy::default();
        assert_eq!(policy.scale_channels(64, 0.5), 32);
        assert_eq!(policy.scale_channels(196, 1.0), 200);
        assert_eq!(policy.scale_channels(1024, 0.25), 256);
        assert_eq!(policy.scale_channels(64, 0.25), 16);
        assert_eq!(policy.scale_channels(4, 0.25), 8);
        assert_eq!(policy.scale_channels(usize::MAX, 1e10), usize::MAX);
    }

    #[test]
    fn test_nearest_rounding() {
        let policy = AssemblyPolicy {
            rounding: ChannelRounding::Nearest,
            ..Default::default()
        };
        assert_eq!(policy.scale_channels(193, 1.0), 192);
        assert_eq!(policy.scale_channels(196, 1.0), 200);
        assert_eq!(policy.scale_channels(199, 1.0), 200);
    }

    #[test]
    fn test_policy_yaml_defaults() {
        let policy = AssemblyPolicy::from_yaml_str("rounding: nearest\n").unwrap();
        assert_eq!(policy.channel_divisor, 8);
        assert_eq!(policy.rounding, ChannelRounding::Nearest);
        assert!(policy.is_repeat_exempt(ModuleKind::Concat));
    }

    #[test]
    fn test_policy_custom_exempt_set() {
        let policy =
            AssemblyPolicy::from_yaml_str("repeat_exempt: [Detect, nn.Upsample]\n").unwrap();
        assert!(policy.is_repeat_exempt(ModuleKind::Upsample));
        assert!(!policy.is_repeat_exempt(ModuleKind::Concat));
        assert_eq!(policy.scale_repeat(ModuleKind::Concat, 2, 1.0), 2);
    }

    #[test]
    fn test_policy_from_file() {
        let path = std::env::temp_dir().join(format!("archgraph-policy-{}.yaml", std::process::id()));
        std::fs::write(&path, "channel_divisor: 16\nrounding: ceil\n").unwrap();
        let policy = AssemblyPolicy::from_yaml(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(policy.channel_divisor, 16);
        assert_eq!(policy.scale_channels(40, 1.0), 48);

        assert!(matches!(
            AssemblyPolicy::from_yaml(&path),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_policy_zero_divisor_rejected() {
        assert!(AssemblyPolicy::from_yaml_str("channel_divisor: 0\n").is_err());
    }

    #[test]
    fn test_scale_presets() {
        assert_eq!("s".parse::<Scale>().unwrap().multiples(), (0.33, 0.50));
        assert_eq!("large".parse::<Scale>().unwrap(), Scale::L);
        assert!("q".parse::<Scale>().is_err());
    }
}
