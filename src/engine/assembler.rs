//! Graph assembly
//!
//! Walks backbone then head, resolving each entry's sources against the
//! layers already built, scaling repeats and channels, and constructing the
//! typed module. Any malformed entry aborts assembly.

use std::collections::BTreeSet;

use crate::config::{AssemblyPolicy, LayerRef, LayerSpec, ModelConfig, Source};
use crate::error::{Error, LayerPosition, Result};
use crate::model::{ArgReader, BuildInputs, Detect, Family, Module, ModuleKind, Resample};

use super::graph::{BuiltLayer, InputRef, ModelGraph};

/// Turns a `ModelConfig` into a `ModelGraph` under an `AssemblyPolicy`.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    policy: AssemblyPolicy,
}

impl Assembler {
    pub fn new(policy: AssemblyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AssemblyPolicy {
        &self.policy
    }

    pub fn assemble(&self, config: &ModelConfig) -> Result<ModelGraph> {
        config.validate()?;
        self.policy.validate()?;

        let mut state = State {
            config,
            policy: &self.policy,
            layers: Vec::with_capacity(config.num_layers()),
            save: BTreeSet::new(),
        };
        for (position, spec) in config.layers() {
            let layer = state.build(position, spec)?;
            tracing::debug!(
                "layer {:>3} {:<16} from {:<12} n={} ch={:?} stride={:?}",
                position.index,
                layer.name,
                layer.source.to_string(),
                layer.repeat,
                layer.out_channels,
                layer.stride
            );
            state.layers.push(layer);
        }

        if let Some(last) = state.layers.last() {
            if last.module.kind() != ModuleKind::Detect {
                tracing::warn!(
                    "last layer is {}, not a Detect head; outputs are raw feature maps",
                    last.name
                );
            }
        }

        let graph = ModelGraph {
            layers: state.layers,
            save: state.save.into_iter().collect(),
            input_channels: config.input_channels(),
            depth_multiple: config.depth_multiple,
            width_multiple: config.width_multiple,
        };
        tracing::info!(
            "Assembled {} layers ({} saved outputs)",
            graph.len(),
            graph.save().len()
        );
        Ok(graph)
    }
}

/// Assemble with the default policy
pub fn assemble(config: &ModelConfig) -> Result<ModelGraph> {
    Assembler::default().assemble(config)
}

struct State<'a> {
    config: &'a ModelConfig,
    policy: &'a AssemblyPolicy,
    layers: Vec<BuiltLayer>,
    save: BTreeSet<usize>,
}

impl State<'_> {
    fn build(&mut self, position: LayerPosition, spec: &LayerSpec) -> Result<BuiltLayer> {
        let from = self.resolve(position, &spec.source)?;

        let kind = ModuleKind::from_name(&spec.module).ok_or_else(|| Error::UnknownModule {
            position,
            name: spec.module.clone(),
        })?;
        if !kind.inputs().accepts(from.len()) {
            return Err(Error::schema_at(
                position,
                format!("{} takes {} sources, got {}", kind, kind.inputs(), from.len()),
            ));
        }

        let reader = ArgReader::new(kind, &spec.args, position)?;
        let channels = from
            .iter()
            .map(|r| self.channels_of(position, *r))
            .collect::<Result<Vec<_>>>()?;
        let strides: Vec<Option<usize>> = from.iter().map(|r| self.stride_of(*r)).collect();

        let repeat = self
            .policy
            .scale_repeat(kind, spec.repeat, self.config.depth_multiple);

        let module = if kind == ModuleKind::Detect {
            Module::Detect(Detect::from_args(
                &reader,
                self.config.nc,
                &self.config.anchors,
                channels.clone(),
                strides.clone(),
            )?)
        } else {
            let c2 = match kind.family() {
                Family::ConvLike | Family::Csp | Family::Attention => {
                    Some(self.scale_channels(reader.usize_req(0, "c2")?))
                }
                _ => None,
            };
            Module::build(
                kind,
                &reader,
                &BuildInputs {
                    channels: &channels,
                    c2,
                    depth: repeat,
                },
            )?
        };

        let out_channels = module.out_channels(&channels);
        let instances = match module {
            Module::Csp(_) => 1,
            _ => repeat,
        };
        let stride = if kind == ModuleKind::Detect {
            None
        } else {
            let input = merge_strides(position, kind, &strides)?;
            apply_resample(input, module.resample(), instances)
        };

        // outputs read by anything other than the next layer must be kept
        for (r, resolved) in spec.source.refs().iter().zip(&from) {
            match (r, resolved) {
                (LayerRef::Previous, _) | (_, InputRef::Input) => {}
                (_, InputRef::Layer(j)) => {
                    self.save.insert(*j);
                }
            }
        }

        Ok(BuiltLayer {
            position,
            name: spec.module.clone(),
            source: spec.source.clone(),
            from,
            declared_repeat: spec.repeat,
            repeat,
            module,
            out_channels,
            stride,
        })
    }

    /// Map declared references to already-built layers.
    fn resolve(&self, position: LayerPosition, source: &Source) -> Result<Vec<InputRef>> {
        let i = position.index;
        let refs = source.refs();
        if refs.is_empty() {
            return Err(Error::schema_at(position, "source list is empty"));
        }
        refs.iter()
            .map(|r| match *r {
                LayerRef::Previous if i == 0 => Ok(InputRef::Input),
                LayerRef::Previous => Ok(InputRef::Layer(i - 1)),
                LayerRef::Back(k) if k <= i => Ok(InputRef::Layer(i - k)),
                LayerRef::Back(k) => Err(Error::UnresolvedReference {
                    position,
                    reference: i64::from(*r),
                    reason: format!("only {} layers precede this one", i),
                }),
                LayerRef::Index(j) if j < i => Ok(InputRef::Layer(j)),
                LayerRef::Index(j) => Err(Error::UnresolvedReference {
                    position,
                    reference: j as i64,
                    reason: if j == i {
                        "a layer cannot read its own output".to_string()
                    } else {
                        "forward reference to a layer not yet built".to_string()
                    },
                }),
            })
            .collect()
    }

    fn channels_of(&self, position: LayerPosition, r: InputRef) -> Result<usize> {
        match r {
            InputRef::Input => Ok(self.config.input_channels()),
            InputRef::Layer(j) => self.layers[j].out_channels.ok_or_else(|| {
                Error::schema_at(
                    position,
                    format!("layer {} is a detection head and has no feature output", j),
                )
            }),
        }
    }

    fn stride_of(&self, r: InputRef) -> Option<usize> {
        match r {
            InputRef::Input => Some(1),
            InputRef::Layer(j) => self.layers[j].stride,
        }
    }

    /// Width-scale a declared channel count. The Detect output count is
    /// left alone.
    fn scale_channels(&self, c2: usize) -> usize {
        if c2 == self.config.detect_outputs() {
            c2
        } else {
            self.policy.scale_channels(c2, self.config.width_multiple)
        }
    }
}

/// Fan-in layers must merge feature maps of the same resolution.
fn merge_strides(
    position: LayerPosition,
    kind: ModuleKind,
    strides: &[Option<usize>],
) -> Result<Option<usize>> {
    let first = strides.first().copied().flatten();
    if strides.iter().any(|s| s.is_none()) {
        return Ok(None);
    }
    if let Some(other) = strides.iter().flatten().find(|&&s| Some(s) != first) {
        return Err(Error::schema_at(
            position,
            format!(
                "{} merges feature maps of stride {} and {}",
                kind,
                first.unwrap_or_default(),
                other
            ),
        ));
    }
    Ok(first)
}

/// Stride after `instances` chained copies of one resampling step. `None`
/// when the result is not a whole stride or does not fit.
fn apply_resample(stride: Option<usize>, resample: Resample, instances: usize) -> Option<usize> {
    let stride = stride?;
    if instances == 0 {
        return Some(stride);
    }
    match resample {
        Resample::Keep => Some(stride),
        Resample::Down(s) => {
            let factor = s.checked_pow(u32::try_from(instances).ok()?)?;
            stride.checked_mul(factor)
        }
        Resample::Up(f) => {
            let v = stride as f64 / f.powi(i32::try_from(instances).ok()?);
            if v >= 1.0 && v.fract() == 0.0 && v <= usize::MAX as f64 {
                Some(v as usize)
            } else {
                None
            }
        }
        Resample::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Arg, ChannelRounding};

    const ATTENTION_YAML: &str = include_str!("../../models/yolov5s-attention.yaml");
    const P2_BIFPN_YAML: &str = include_str!("../../models/yolov5s-p2-bifpn.yaml");

    fn load(yaml: &str) -> ModelConfig {
        ModelConfig::from_yaml_str(yaml).unwrap()
    }

    fn tiny(backbone: &str, head: &str) -> ModelConfig {
        let yaml = format!(
            "nc: 2\ndepth_multiple: 1.0\nwidth_multiple: 1.0\nanchors:\n  - [10,13, 16,30]\n  - [30,61, 62,45]\nbackbone:\n{}\nhead:\n{}\n",
            backbone, head
        );
        load(&yaml)
    }

    #[test]
    fn test_one_layer_per_entry_in_order() {
        for yaml in [ATTENTION_YAML, P2_BIFPN_YAML] {
            let config = load(yaml);
            let graph = assemble(&config).unwrap();
            assert_eq!(graph.len(), config.num_layers());
            for (i, ((position, spec), layer)) in config.layers().zip(graph.layers()).enumerate() {
                assert_eq!(layer.index(), i);
                assert_eq!(layer.position, position);
                assert_eq!(layer.name, spec.module);
            }
        }
    }

    #[test]
    fn test_previous_resolves_to_prior_layer_or_input() {
        let graph = assemble(&load(ATTENTION_YAML)).unwrap();
        assert_eq!(graph.layers()[0].from, vec![InputRef::Input]);
        for layer in &graph.layers()[1..] {
            if layer.source == Source::Single(LayerRef::Previous) {
                assert_eq!(layer.from, vec![InputRef::Layer(layer.index() - 1)]);
            }
        }
    }

    #[test]
    fn test_attention_sample_channels_and_strides() {
        let graph = assemble(&load(ATTENTION_YAML)).unwrap();
        let ch: Vec<_> = graph.layers().iter().map(|l| l.out_channels).collect();
        assert_eq!(ch[0], Some(32));
        assert_eq!(ch[8], Some(512));
        assert_eq!(ch[13], Some(512));
        assert_eq!(ch[17], Some(256));
        assert_eq!(ch[28], None);
        assert_eq!(graph.layers()[10].stride, Some(32));
        assert_eq!(graph.layers()[12].stride, Some(16));

        let (layer, detect) = graph.detect().unwrap();
        assert_eq!(layer.index(), 28);
        assert_eq!(detect.ch, vec![128, 256, 512]);
        assert_eq!(detect.strides, vec![Some(8), Some(16), Some(32)]);
        assert_eq!(detect.no(), 255);
        assert_eq!(graph.save(), &[4, 6, 11, 15, 19, 23, 27]);
    }

    #[test]
    fn test_p2_bifpn_sample() {
        let graph = assemble(&load(P2_BIFPN_YAML)).unwrap();
        assert_eq!(graph.len(), 32);
        let (_, detect) = graph.detect().unwrap();
        assert_eq!(detect.ch, vec![64, 128, 256, 512]);
        assert_eq!(detect.strides, vec![Some(4), Some(8), Some(16), Some(32)]);
        assert_eq!(graph.layers()[23].out_channels, Some(256));
        assert_eq!(graph.layers()[26].out_channels, Some(512));
        assert_eq!(graph.save(), &[2, 4, 6, 10, 14, 18, 21, 24, 27, 30]);
        assert_eq!(graph.consumers(4), vec![5, 16, 23]);
    }

    #[test]
    fn test_depth_scaling_folds_into_csp() {
        let graph = assemble(&load(ATTENTION_YAML)).unwrap();
        let layer = &graph.layers()[6];
        assert_eq!(layer.declared_repeat, 9);
        assert_eq!(layer.repeat, 3);
        assert_eq!(layer.instances(), 1);
        let Module::Csp(csp) = &layer.module else {
            panic!("expected C3");
        };
        assert_eq!(csp.n, 3);

        let layer = &graph.layers()[2];
        assert_eq!(layer.declared_repeat, 3);
        assert_eq!(layer.repeat, 1);
    }

    #[test]
    fn test_width_scaling_applies_to_channel_args() {
        let graph = assemble(&load(ATTENTION_YAML)).unwrap();
        let Module::Conv(conv) = &graph.layers()[0].module else {
            panic!("expected Conv");
        };
        assert_eq!(conv.c2, 32);
        assert_eq!((conv.k, conv.s, conv.p), (6, 2, Some(2)));
    }

    #[test]
    fn test_larger_scale_changes_channels_not_structure() {
        let base = load(ATTENTION_YAML);
        let small = assemble(&base).unwrap();
        let large = assemble(&base.with_multiples(1.0, 1.0)).unwrap();
        assert_eq!(small.len(), large.len());
        assert_eq!(large.layers()[0].out_channels, Some(64));
        assert_eq!(large.layers()[6].repeat, 9);
        assert_eq!(small.save(), large.save());
    }

    #[test]
    fn test_detect_output_count_not_scaled() {
        let config = tiny(
            "  [[-1, 1, Conv, [14, 3, 2]], [-1, 1, Conv, [64, 3, 2]]]",
            "  [[[0, 1], 1, Detect, [nc, anchors]]]",
        )
        .with_multiples(1.0, 0.5);
        // 2 anchors x (2 classes + 5)
        assert_eq!(config.detect_outputs(), 14);
        let graph = assemble(&config).unwrap();
        assert_eq!(graph.layers()[0].out_channels, Some(14));
        assert_eq!(graph.layers()[1].out_channels, Some(32));
    }

    #[test]
    fn test_forward_reference_rejected() {
        let config = tiny(
            "  [[-1, 1, Conv, [16, 3, 2]], [[-1, 2], 1, Concat, [1]], [-1, 1, Conv, [16]]]",
            "  []",
        );
        let err = assemble(&config).unwrap_err();
        match err {
            Error::UnresolvedReference {
                position,
                reference,
                ..
            } => {
                assert_eq!(position.index, 1);
                assert_eq!(reference, 2);
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_self_reference_rejected() {
        let config = tiny("  [[-1, 1, Conv, [16]], [1, 1, Conv, [16]]]", "  []");
        assert!(matches!(
            assemble(&config),
            Err(Error::UnresolvedReference { reference: 1, .. })
        ));
    }

    #[test]
    fn test_back_reference_out_of_range() {
        let config = tiny("  [[-1, 1, Conv, [16]], [-3, 1, Conv, [16]]]", "  []");
        assert!(matches!(
            assemble(&config),
            Err(Error::UnresolvedReference { reference: -3, .. })
        ));

        let config = tiny(
            "  [[-1, 1, Conv, [16]], [-1, 1, Conv, [16]], [-2, 1, Conv, [8]]]",
            "  []",
        );
        let graph = assemble(&config).unwrap();
        assert_eq!(graph.layers()[2].from, vec![InputRef::Layer(0)]);
        assert_eq!(graph.save(), &[0]);
    }

    #[test]
    fn test_unknown_module_reports_position() {
        let config = tiny("  [[-1, 1, Conv, [16]]]", "  [[-1, 1, MagicBlock, [16]]]");
        match assemble(&config).unwrap_err() {
            Error::UnknownModule { position, name } => {
                assert_eq!(position.index, 1);
                assert_eq!(position.local, 0);
                assert_eq!(name, "MagicBlock");
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_argument_arity_reports_position() {
        let config = tiny("  [[-1, 1, Conv, [16]], [-1, 1, SPPF, [16, 5, 9]]]", "  []");
        match assemble(&config).unwrap_err() {
            Error::ArgumentArity {
                position,
                module,
                actual,
                ..
            } => {
                assert_eq!(position.index, 1);
                assert_eq!(module, "SPPF");
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_detect_source_count_must_match_anchors() {
        let config = tiny(
            "  [[-1, 1, Conv, [16, 3, 2]], [-1, 1, Conv, [32, 3, 2]], [-1, 1, Conv, [64, 3, 2]]]",
            "  [[[0, 1, 2], 1, Detect, [nc, anchors]]]",
        );
        assert!(matches!(
            assemble(&config),
            Err(Error::Schema {
                position: Some(LayerPosition { index: 3, .. }),
                ..
            })
        ));
    }

    #[test]
    fn test_concat_requires_matching_strides() {
        let config = tiny(
            "  [[-1, 1, Conv, [16, 3, 2]], [-1, 1, Conv, [16, 3, 2]], [[-1, 0], 1, Concat, [1]]]",
            "  []",
        );
        let err = assemble(&config).unwrap_err();
        assert!(err.to_string().contains("stride"));
    }

    #[test]
    fn test_fixed_size_upsample_makes_stride_unknown() {
        let config = tiny(
            "  [[-1, 1, Conv, [16, 3, 2]], [-1, 1, nn.Upsample, [64, None, 'nearest']], [[-1, 0], 1, Concat, [1]]]",
            "  []",
        );
        let graph = assemble(&config).unwrap();
        assert_eq!(graph.layers()[1].stride, None);
        assert_eq!(graph.layers()[2].stride, None);
        assert_eq!(graph.layers()[2].out_channels, Some(32));
    }

    #[test]
    fn test_reading_detect_output_rejected() {
        let config = tiny(
            "  [[-1, 1, Conv, [16, 3, 2]], [-1, 1, Conv, [16, 3, 2]]]",
            "  [[[0, 1], 1, Detect, [nc, anchors]], [-1, 1, Conv, [16]]]",
        );
        assert!(matches!(
            assemble(&config),
            Err(Error::Schema {
                position: Some(LayerPosition { index: 3, .. }),
                ..
            })
        ));
    }

    #[test]
    fn test_merge_input_count_checked() {
        let config = tiny(
            "  [[-1, 1, Conv, [16]], [[-1, 0, 0], 1, BiFPN_Concat2, [1]]]",
            "  []",
        );
        assert!(matches!(assemble(&config), Err(Error::Schema { .. })));
    }

    #[test]
    fn test_repeated_strided_conv_compounds_stride() {
        let config = tiny("  [[-1, 2, Conv, [16, 3, 2]]]", "  []");
        let graph = assemble(&config).unwrap();
        assert_eq!(graph.layers()[0].instances(), 2);
        assert_eq!(graph.layers()[0].stride, Some(4));
    }

    #[test]
    fn test_stride_overflow_gives_unknown_stride() {
        let config = tiny("  [[-1, 70, Conv, [16, 3, 2]]]", "  []");
        let graph = assemble(&config).unwrap();
        assert_eq!(graph.layers()[0].instances(), 70);
        assert_eq!(graph.layers()[0].stride, None);
    }

    #[test]
    fn test_huge_depth_multiple_does_not_loop() {
        let config = tiny("  [[-1, 3, Conv, [16, 3, 2]], [-1, 3, Conv, [16]]]", "  []")
            .with_multiples(1e300, 1.0);
        let graph = assemble(&config).unwrap();
        assert_eq!(graph.layers()[0].stride, None);
        assert_eq!(graph.layers()[1].repeat, usize::MAX);
        assert_eq!(graph.layers()[1].stride, None);
    }

    #[test]
    fn test_huge_contract_gain_is_schema_error() {
        let config = tiny("  [[-1, 1, Contract, [4294967296]]]", "  []");
        assert!(matches!(
            assemble(&config),
            Err(Error::Schema {
                position: Some(LayerPosition { index: 0, .. }),
                ..
            })
        ));
    }

    #[test]
    fn test_most_negative_source_is_unresolved() {
        let config = tiny(
            "  [[-1, 1, Conv, [16]], [-9223372036854775808, 1, Conv, [16]]]",
            "  []",
        );
        match assemble(&config).unwrap_err() {
            Error::UnresolvedReference {
                position,
                reference,
                ..
            } => {
                assert_eq!(position.index, 1);
                assert_eq!(reference, i64::MIN);
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_resample_closed_form() {
        assert_eq!(apply_resample(Some(1), Resample::Down(2), 5), Some(32));
        assert_eq!(apply_resample(Some(32), Resample::Up(2.0), 2), Some(8));
        assert_eq!(apply_resample(Some(2), Resample::Up(2.0), 2), None);
        assert_eq!(apply_resample(Some(4), Resample::Keep, usize::MAX), Some(4));
        assert_eq!(apply_resample(Some(2), Resample::Down(2), usize::MAX), None);
        assert_eq!(apply_resample(None, Resample::Down(2), 1), None);
    }

    #[test]
    fn test_c3spp_folds_repeat() {
        let config = tiny(
            "  [[-1, 1, Conv, [64]], [-1, 3, C3SPP, [64, [5, 9, 13]]]]",
            "  []",
        );
        let graph = assemble(&config).unwrap();
        let layer = graph.layer(1).unwrap();
        assert_eq!(layer.repeat, 3);
        assert_eq!(layer.instances(), 1);
        assert_eq!(layer.out_channels, Some(64));
        let Module::Csp(csp) = &layer.module else {
            panic!("expected C3SPP");
        };
        assert_eq!(csp.n, 3);
        assert_eq!(csp.kernels, Some(vec![5, 9, 13]));
        assert!(graph.layer(2).is_none());
    }

    #[test]
    fn test_policy_exemption_is_configurable() {
        let config = tiny(
            "  [[-1, 1, Conv, [16]], [[-1, 0], 2, Concat, [1]]]",
            "  []",
        );
        let graph = assemble(&config).unwrap();
        assert_eq!(graph.layers()[1].repeat, 1);

        let policy = AssemblyPolicy {
            repeat_exempt: vec![ModuleKind::Detect],
            ..Default::default()
        };
        let assembler = Assembler::new(policy);
        assert!(!assembler.policy().is_repeat_exempt(ModuleKind::Concat));
        let graph = assembler.assemble(&config).unwrap();
        assert_eq!(graph.layers()[1].repeat, 2);
    }

    #[test]
    fn test_nearest_rounding_policy() {
        let config = tiny("  [[-1, 1, Conv, [193]]]", "  []");
        let ceil = assemble(&config).unwrap();
        assert_eq!(ceil.layers()[0].out_channels, Some(200));

        let policy = AssemblyPolicy {
            rounding: ChannelRounding::Nearest,
            ..Default::default()
        };
        let nearest = Assembler::new(policy).assemble(&config).unwrap();
        assert_eq!(nearest.layers()[0].out_channels, Some(192));
    }

    #[test]
    fn test_summary_lists_every_layer() {
        let graph = assemble(&load(ATTENTION_YAML)).unwrap();
        let text = graph.to_string();
        assert!(text.contains("nn.Upsample"));
        assert!(text.contains("[None, 2, 'nearest']"));
        assert!(text.contains("29 layers"));
        assert!(text.contains("strides [8, 16, 32]"));
    }

    #[test]
    fn test_upsample_mode_is_kept_verbatim() {
        let config = load(ATTENTION_YAML);
        assert_eq!(config.head[1].args[2], Arg::Str("nearest".to_string()));
    }
}
