//! Supported module kinds

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Arity;

/// How a kind treats its channel argument and inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Single input, first argument is the scaled output channel count
    ConvLike,
    /// CSP block; the effective repeat becomes its own depth argument
    Csp,
    /// Re-weights its input; output channels equal input channels
    Attention,
    /// Channel-preserving resize or normalization
    PassThrough,
    /// Fan-in over several sources
    Merge,
    /// Moves data between spatial and channel dimensions
    Reshape,
    /// Detection head
    Head,
}

/// Closed set of module kinds a configuration may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum ModuleKind {
    Conv,
    DWConv,
    GhostConv,
    Focus,
    CrossConv,
    Bottleneck,
    GhostBottleneck,
    BottleneckCsp,
    C3,
    C3x,
    C3Tr,
    C3Spp,
    C3Ghost,
    C3Cbam,
    C3Ca,
    C3Se,
    C3Eca,
    Spp,
    Sppf,
    Se,
    Eca,
    CoordAtt,
    Upsample,
    Concat,
    BiFpnConcat2,
    BiFpnConcat3,
    BiFpnAdd2,
    Contract,
    Expand,
    BatchNorm2d,
    Detect,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 31] = [
        ModuleKind::Conv,
        ModuleKind::DWConv,
        ModuleKind::GhostConv,
        ModuleKind::Focus,
        ModuleKind::CrossConv,
        ModuleKind::Bottleneck,
        ModuleKind::GhostBottleneck,
        ModuleKind::BottleneckCsp,
        ModuleKind::C3,
        ModuleKind::C3x,
        ModuleKind::C3Tr,
        ModuleKind::C3Spp,
        ModuleKind::C3Ghost,
        ModuleKind::C3Cbam,
        ModuleKind::C3Ca,
        ModuleKind::C3Se,
        ModuleKind::C3Eca,
        ModuleKind::Spp,
        ModuleKind::Sppf,
        ModuleKind::Se,
        ModuleKind::Eca,
        ModuleKind::CoordAtt,
        ModuleKind::Upsample,
        ModuleKind::Concat,
        ModuleKind::BiFpnConcat2,
        ModuleKind::BiFpnConcat3,
        ModuleKind::BiFpnAdd2,
        ModuleKind::Contract,
        ModuleKind::Expand,
        ModuleKind::BatchNorm2d,
        ModuleKind::Detect,
    ];

    /// Canonical name as written in model files
    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Conv => "Conv",
            ModuleKind::DWConv => "DWConv",
            ModuleKind::GhostConv => "GhostConv",
            ModuleKind::Focus => "Focus",
            ModuleKind::CrossConv => "CrossConv",
            ModuleKind::Bottleneck => "Bottleneck",
            ModuleKind::GhostBottleneck => "GhostBottleneck",
            ModuleKind::BottleneckCsp => "BottleneckCSP",
            ModuleKind::C3 => "C3",
            ModuleKind::C3x => "C3x",
            ModuleKind::C3Tr => "C3TR",
            ModuleKind::C3Spp => "C3SPP",
            ModuleKind::C3Ghost => "C3Ghost",
            ModuleKind::C3Cbam => "C3CBAM",
            ModuleKind::C3Ca => "C3CA",
            ModuleKind::C3Se => "C3SE",
            ModuleKind::C3Eca => "C3ECA",
            ModuleKind::Spp => "SPP",
            ModuleKind::Sppf => "SPPF",
            ModuleKind::Se => "SE",
            ModuleKind::Eca => "ECA",
            ModuleKind::CoordAtt => "CoordAtt",
            ModuleKind::Upsample => "nn.Upsample",
            ModuleKind::Concat => "Concat",
            ModuleKind::BiFpnConcat2 => "BiFPN_Concat2",
            ModuleKind::BiFpnConcat3 => "BiFPN_Concat3",
            ModuleKind::BiFpnAdd2 => "BiFPN_Add2",
            ModuleKind::Contract => "Contract",
            ModuleKind::Expand => "Expand",
            ModuleKind::BatchNorm2d => "nn.BatchNorm2d",
            ModuleKind::Detect => "Detect",
        }
    }

    /// Resolve a module name. `nn.` prefixes are optional.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name || k.name().strip_prefix("nn.") == Some(name))
    }

    pub fn family(&self) -> Family {
        match self {
            ModuleKind::Conv
            | ModuleKind::DWConv
            | ModuleKind::GhostConv
            | ModuleKind::Focus
            | ModuleKind::CrossConv
            | ModuleKind::Bottleneck
            | ModuleKind::GhostBottleneck
            | ModuleKind::Spp
            | ModuleKind::Sppf => Family::ConvLike,
            ModuleKind::BottleneckCsp
            | ModuleKind::C3
            | ModuleKind::C3x
            | ModuleKind::C3Tr
            | ModuleKind::C3Spp
            | ModuleKind::C3Ghost
            | ModuleKind::C3Cbam
            | ModuleKind::C3Ca
            | ModuleKind::C3Se
            | ModuleKind::C3Eca => Family::Csp,
            ModuleKind::Se | ModuleKind::Eca | ModuleKind::CoordAtt => Family::Attention,
            ModuleKind::Upsample | ModuleKind::BatchNorm2d => Family::PassThrough,
            ModuleKind::Concat
            | ModuleKind::BiFpnConcat2
            | ModuleKind::BiFpnConcat3
            | ModuleKind::BiFpnAdd2 => Family::Merge,
            ModuleKind::Contract | ModuleKind::Expand => Family::Reshape,
            ModuleKind::Detect => Family::Head,
        }
    }

    /// Accepted number of arguments in the file
    pub fn arity(&self) -> Arity {
        match self {
            ModuleKind::Conv | ModuleKind::Focus | ModuleKind::CrossConv => Arity::between(1, 6),
            ModuleKind::GhostConv => Arity::between(1, 5),
            ModuleKind::DWConv
            | ModuleKind::Bottleneck
            | ModuleKind::BottleneckCsp
            | ModuleKind::C3
            | ModuleKind::C3x
            | ModuleKind::C3Tr
            | ModuleKind::C3Ghost
            | ModuleKind::C3Cbam
            | ModuleKind::C3Ca
            | ModuleKind::C3Se
            | ModuleKind::C3Eca => Arity::between(1, 4),
            ModuleKind::C3Spp => Arity::between(1, 5),
            ModuleKind::GhostBottleneck => Arity::between(1, 3),
            ModuleKind::Spp | ModuleKind::Sppf => Arity::between(1, 2),
            ModuleKind::Se | ModuleKind::Eca | ModuleKind::CoordAtt => Arity::between(1, 2),
            ModuleKind::Upsample => Arity::between(0, 3),
            ModuleKind::Concat | ModuleKind::BiFpnConcat2 | ModuleKind::BiFpnConcat3 => {
                Arity::between(0, 1)
            }
            ModuleKind::BiFpnAdd2 => Arity::between(0, 2),
            ModuleKind::Contract | ModuleKind::Expand => Arity::between(0, 1),
            ModuleKind::BatchNorm2d => Arity::exactly(0),
            ModuleKind::Detect => Arity::exactly(2),
        }
    }

    /// Accepted number of source references
    pub fn inputs(&self) -> Arity {
        match self {
            ModuleKind::BiFpnConcat2 | ModuleKind::BiFpnAdd2 => Arity::exactly(2),
            ModuleKind::BiFpnConcat3 => Arity::exactly(3),
            ModuleKind::Concat | ModuleKind::Detect => Arity::between(1, usize::MAX),
            _ => Arity::exactly(1),
        }
    }
}

impl TryFrom<String> for ModuleKind {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::from_name(&name).ok_or_else(|| format!("unknown module type '{}'", name))
    }
}

impl From<ModuleKind> for &'static str {
    fn from(kind: ModuleKind) -> Self {
        kind.name()
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in ModuleKind::ALL {
            assert_eq!(ModuleKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_nn_prefix_optional() {
        assert_eq!(ModuleKind::from_name("Upsample"), Some(ModuleKind::Upsample));
        assert_eq!(ModuleKind::from_name("nn.Upsample"), Some(ModuleKind::Upsample));
        assert_eq!(
            ModuleKind::from_name("BatchNorm2d"),
            Some(ModuleKind::BatchNorm2d)
        );
        assert_eq!(ModuleKind::from_name("nn.Conv"), None);
        assert_eq!(ModuleKind::from_name("Transformer"), None);
    }

    #[test]
    fn test_families() {
        assert_eq!(ModuleKind::C3Cbam.family(), Family::Csp);
        assert_eq!(ModuleKind::from_name("C3SPP"), Some(ModuleKind::C3Spp));
        assert_eq!(ModuleKind::C3Spp.family(), Family::Csp);
        assert_eq!(ModuleKind::C3Spp.arity(), Arity::between(1, 5));
        assert_eq!(ModuleKind::Sppf.family(), Family::ConvLike);
        assert_eq!(ModuleKind::BiFpnAdd2.family(), Family::Merge);
        assert_eq!(ModuleKind::CoordAtt.family(), Family::Attention);
    }

    #[test]
    fn test_arity_ranges() {
        for kind in ModuleKind::ALL {
            let arity = kind.arity();
            assert!(arity.min <= arity.max, "{}", kind);
        }
        assert_eq!(ModuleKind::C3.arity(), Arity::between(1, 4));
        assert_eq!(ModuleKind::Detect.arity(), Arity::exactly(2));
        assert_eq!(ModuleKind::BiFpnConcat3.inputs(), Arity::exactly(3));
    }

    #[test]
    fn test_serde_by_name() {
        let kinds: Vec<ModuleKind> = serde_yaml::from_str("[Concat, nn.Upsample, C3CA]").unwrap();
        assert_eq!(
            kinds,
            vec![ModuleKind::Concat, ModuleKind::Upsample, ModuleKind::C3Ca]
        );
        assert!(serde_yaml::from_str::<Vec<ModuleKind>>("[Nope]").is_err());
    }
}
