//! Engine-wide configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[cfg(feature = "serde")]
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Voice slots in the pool.
    pub polyphony: usize,
    /// Steal a busy voice when every slot is taken.
    pub steal: bool,
    pub sample_rate: f32,
    /// Extra time a released voice stays connected past its longest tail.
    pub release_margin_secs: f64,
    /// Reference pitch for note 69.
    pub tuning_a4: f32,
    /// Capacity of the control → render command queue; also bounds the
    /// pool's undrained event backlog.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polyphony: 6,
            steal: true,
            sample_rate: 48_000.0,
            release_margin_secs: 0.05,
            tuning_a4: 440.0,
            queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn with_polyphony(mut self, polyphony: usize) -> Self {
        self.polyphony = polyphony;
        self
    }

    pub fn with_steal(mut self, steal: bool) -> Self {
        self.steal = steal;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        }

        if self.polyphony == 0 {
            return invalid("polyphony", "must be at least 1");
        }
        if self.polyphony > crate::MAX_POLYPHONY {
            return invalid("polyphony", "exceeds the renderer's mixer inputs");
        }
        if !(self.sample_rate > 0.0) {
            return invalid("sample_rate", "must be positive");
        }
        if !(self.release_margin_secs >= 0.0) {
            return invalid("release_margin_secs", "must not be negative");
        }
        if !(self.tuning_a4 > 0.0) {
            return invalid("tuning_a4", "must be positive");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity", "must be at least 1");
        }
        Ok(())
    }

    /// Parse and validate a TOML document. Missing keys take their defaults.
    #[cfg(feature = "serde")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }
}
