//! What a voice is made of: the serial chain, the modulators, and the
//! per-preset settings and routing table.

use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::component::lfo::DEFAULT_TARGET;
use crate::component::{kinds, ComponentKind, ComponentPreset, Settings};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainError {
    #[error("chain has no components")]
    EmptyChain,
    #[error("`{0}` appears more than once")]
    DuplicateKind(ComponentKind),
    #[error("`{0}` is not a `component.param` path")]
    BadRoutePath(String),
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLink {
    pub kind: ComponentKind,
    #[cfg_attr(feature = "serde", serde(default))]
    pub optional: bool,
}

impl ChainLink {
    pub fn mandatory(kind: &str) -> Self {
        Self {
            kind: ComponentKind::new(kind),
            optional: false,
        }
    }

    pub fn optional(kind: &str) -> Self {
        Self {
            kind: ComponentKind::new(kind),
            optional: true,
        }
    }
}

/// Serial audio path plus the modulators that sit beside it. Validated on
/// construction: non-empty, and every kind appears once.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "ChainSpec", into = "ChainSpec")
)]
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfiguration {
    chain: Vec<ChainLink>,
    modulators: Vec<ComponentKind>,
}

impl ChainConfiguration {
    pub fn new(chain: Vec<ChainLink>, modulators: Vec<ComponentKind>) -> Result<Self, ChainError> {
        if chain.is_empty() {
            return Err(ChainError::EmptyChain);
        }
        let mut seen = BTreeSet::new();
        let all = chain.iter().map(|link| &link.kind).chain(modulators.iter());
        for kind in all {
            if !seen.insert(kind.as_str()) {
                return Err(ChainError::DuplicateKind(kind.clone()));
            }
        }
        Ok(Self { chain, modulators })
    }

    /// `oscillator -> amplitudeEnv -> filter -> distortion? -> chorus? ->
    /// delay? -> outputGain`, with both contours and `lfo1` as modulators.
    pub fn standard() -> Self {
        Self {
            chain: vec![
                ChainLink::mandatory(kinds::OSCILLATOR),
                ChainLink::mandatory(kinds::AMPLITUDE_ENV),
                ChainLink::mandatory(kinds::FILTER),
                ChainLink::optional(kinds::DISTORTION),
                ChainLink::optional(kinds::CHORUS),
                ChainLink::optional(kinds::DELAY),
                ChainLink::mandatory(kinds::OUTPUT_GAIN),
            ],
            modulators: vec![
                ComponentKind::new(kinds::PITCH_ENVELOPE),
                ComponentKind::new(kinds::FILTER_ENVELOPE),
                ComponentKind::new(kinds::LFO1),
            ],
        }
    }

    /// Same configuration with the first link (the source) swapped.
    pub fn with_source(&self, kind: &str) -> Result<Self, ChainError> {
        let mut chain = self.chain.clone();
        chain[0] = ChainLink {
            kind: ComponentKind::new(kind),
            optional: false,
        };
        Self::new(chain, self.modulators.clone())
    }

    pub fn chain(&self) -> &[ChainLink] {
        &self.chain
    }

    pub fn modulators(&self) -> &[ComponentKind] {
        &self.modulators
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.chain.iter().any(|link| link.kind.as_str() == kind)
            || self.modulators.iter().any(|m| m.as_str() == kind)
    }
}

#[cfg(feature = "serde")]
#[derive(Serialize, Deserialize)]
struct ChainSpec {
    chain: Vec<ChainLink>,
    #[serde(default)]
    modulators: Vec<ComponentKind>,
}

#[cfg(feature = "serde")]
impl TryFrom<ChainSpec> for ChainConfiguration {
    type Error = ChainError;

    fn try_from(spec: ChainSpec) -> Result<Self, ChainError> {
        ChainConfiguration::new(spec.chain, spec.modulators)
    }
}

#[cfg(feature = "serde")]
impl From<ChainConfiguration> for ChainSpec {
    fn from(config: ChainConfiguration) -> Self {
        ChainSpec {
            chain: config.chain,
            modulators: config.modulators,
        }
    }
}

/// One row of the routing table: `source`'s modulation output drives
/// `target`'s `param`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ModulationRoute {
    pub source: ComponentKind,
    pub target: ComponentKind,
    pub param: String,
    /// Which of the source's outputs to use. `None` picks its only output.
    #[cfg_attr(feature = "serde", serde(default))]
    pub output: Option<String>,
}

impl ModulationRoute {
    /// Route from `source` to a `component.param` path.
    pub fn parse(source: &str, path: &str) -> Result<Self, ChainError> {
        match path.split_once('.') {
            Some((target, param)) if !target.is_empty() && !param.is_empty() => Ok(Self {
                source: ComponentKind::new(source),
                target: ComponentKind::new(target),
                param: param.to_string(),
                output: None,
            }),
            _ => Err(ChainError::BadRoutePath(path.to_string())),
        }
    }

    pub fn from_output(mut self, output: &str) -> Self {
        self.output = Some(output.to_string());
        self
    }
}

/// Per-preset settings for each component plus the routing table.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoicePreset {
    #[cfg_attr(feature = "serde", serde(default))]
    pub components: BTreeMap<ComponentKind, ComponentPreset>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub routes: Vec<ModulationRoute>,
}

impl VoicePreset {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mandatory standard-chain components at their defaults.
    pub fn standard() -> Self {
        [
            kinds::OSCILLATOR,
            kinds::AMPLITUDE_ENV,
            kinds::FILTER,
            kinds::OUTPUT_GAIN,
        ]
        .into_iter()
        .fold(Self::new(), |preset, kind| preset.with(kind, Settings::new()))
    }

    /// Enable `kind` with `params`.
    pub fn with(mut self, kind: &str, params: Settings) -> Self {
        self.components
            .insert(ComponentKind::new(kind), ComponentPreset::enabled(params));
        self
    }

    pub fn with_disabled(mut self, kind: &str, params: Settings) -> Self {
        self.components
            .insert(ComponentKind::new(kind), ComponentPreset::disabled(params));
        self
    }

    pub fn with_route(mut self, route: ModulationRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn component(&self, kind: &str) -> Option<&ComponentPreset> {
        self.components.get(kind)
    }

    pub fn is_enabled(&self, kind: &str) -> bool {
        self.component(kind).is_some_and(|c| c.enabled)
    }

    /// Merge `patch` into `kind`'s stored params, adding an enabled entry if
    /// there was none.
    pub fn patch(&mut self, kind: &str, patch: &Settings) {
        let entry = self.components.entry(ComponentKind::new(kind)).or_default();
        entry.params = entry.params.merged(patch);
    }

    /// Add the fixed routes for whichever standard modulators are enabled:
    /// pitch contour to oscillator detune, filter contour to filter cutoff,
    /// and `lfo1` to its `target` setting.
    pub fn with_standard_routes(mut self) -> Self {
        let mut routes = Vec::new();
        if self.is_enabled(kinds::PITCH_ENVELOPE) {
            routes.push(
                ModulationRoute::parse(kinds::PITCH_ENVELOPE, "oscillator.detune")
                    .map(|r| r.from_output("pitch")),
            );
        }
        if self.is_enabled(kinds::FILTER_ENVELOPE) {
            routes.push(
                ModulationRoute::parse(kinds::FILTER_ENVELOPE, "filter.frequency")
                    .map(|r| r.from_output("output")),
            );
        }
        if let Some(lfo) = self.component(kinds::LFO1).filter(|c| c.enabled) {
            let target = lfo.params.text("target", DEFAULT_TARGET);
            routes.push(ModulationRoute::parse(kinds::LFO1, target).map(|r| r.from_output("output")));
        }

        for route in routes {
            match route {
                Ok(route) if !self.routes.contains(&route) => self.routes.push(route),
                Ok(_) => {}
                Err(err) => log::warn!(target: "voicegraph::preset", "skipping standard route: {err}"),
            }
        }
        self
    }
}
