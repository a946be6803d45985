//! Kind → manager lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::amp_envelope::AmpEnvelopeManager;
use super::chorus::ChorusManager;
use super::contour::ContourManager;
use super::delay::DelayManager;
use super::distortion::DistortionManager;
use super::filter::FilterManager;
use super::lfo::LfoManager;
use super::oscillator::OscillatorManager;
use super::output_gain::OutputGainManager;
use super::sampler::SamplerManager;
use super::{kinds, ComponentManager, SampleLibrary};

/// Immutable once built; share it between pools behind an `Arc`.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    managers: BTreeMap<String, Arc<dyn ComponentManager>>,
}

pub struct RegistryBuilder {
    managers: BTreeMap<String, Arc<dyn ComponentManager>>,
}

impl RegistryBuilder {
    pub fn register(self, manager: impl ComponentManager + 'static) -> Self {
        self.register_arc(Arc::new(manager))
    }

    /// A later registration for the same kind replaces the earlier one.
    pub fn register_arc(mut self, manager: Arc<dyn ComponentManager>) -> Self {
        let kind = manager.kind().to_string();
        if self.managers.insert(kind.clone(), manager).is_some() {
            log::warn!(target: "voicegraph::component", "manager for `{kind}` registered twice; keeping the last");
        }
        self
    }

    pub fn build(self) -> ComponentRegistry {
        ComponentRegistry {
            managers: self.managers,
        }
    }
}

impl ComponentRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            managers: BTreeMap::new(),
        }
    }

    /// Every built-in manager, with `library` backing the sampler.
    pub fn standard(library: Arc<dyn SampleLibrary>) -> Self {
        Self::builder()
            .register(OscillatorManager)
            .register(SamplerManager::new(library))
            .register(AmpEnvelopeManager)
            .register(FilterManager)
            .register(DistortionManager)
            .register(ChorusManager)
            .register(DelayManager)
            .register(OutputGainManager)
            .register(ContourManager::pitch())
            .register(ContourManager::filter())
            .register(LfoManager::new(kinds::LFO1))
            .build()
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ComponentManager>> {
        self.managers.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.managers.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}
