//! Configuration for fan-out, reduction and broadcast primitives.
//!
//! Every config is a plain struct with sensible defaults. Configs can also be
//! loaded from TOML; a loaded config is validated before it is returned.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{WeaveError, WeaveResult};

/// Trait for configuration validation
pub trait ConfigValidation {
    /// Validate this configuration
    fn validate(&self) -> WeaveResult<()>;
}

/// Core trait for weave configuration types
pub trait WeaveConfig:
    Clone + Default + Serialize + DeserializeOwned + ConfigValidation + Send + Sync + 'static
{
    /// Parse and validate a configuration from TOML text
    fn from_toml_str(text: &str) -> WeaveResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| WeaveError::invalid(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    fn load_from_file(path: &Path) -> WeaveResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            WeaveError::invalid(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&text)
    }

    /// Render the configuration as TOML
    fn to_toml_string(&self) -> WeaveResult<String> {
        toml::to_string(self).map_err(|e| WeaveError::invalid(format!("Unserializable config: {e}")))
    }
}

/// What a keyed fan-out does when the same key appears more than once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeyPolicy {
    /// Run every entry; the entry appearing later in the key list wins
    #[default]
    LastWins,
    /// Fail the call with [`WeaveError::Invalid`] before running anything
    Reject,
}

/// Configuration for keyed fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Maximum computations in flight; `None` means one per key
    pub concurrency: Option<usize>,
    /// Handling of repeated keys
    pub duplicate_keys: DuplicateKeyPolicy,
}

impl FanOutConfig {
    /// Limit the number of computations in flight
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    /// Set the duplicate key policy
    pub fn with_duplicate_keys(mut self, policy: DuplicateKeyPolicy) -> Self {
        self.duplicate_keys = policy;
        self
    }

    /// Concurrency limit to use for a call over `key_count` keys
    pub fn effective_concurrency(&self, key_count: usize) -> usize {
        effective_limit(self.concurrency, key_count)
    }
}

impl ConfigValidation for FanOutConfig {
    fn validate(&self) -> WeaveResult<()> {
        validate_concurrency(self.concurrency)
    }
}

impl WeaveConfig for FanOutConfig {}

/// Configuration for streaming reduction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
    /// Maximum computations in flight; `None` means one per key
    pub concurrency: Option<usize>,
    /// Results that may wait in the handoff to the folding task
    pub handoff_capacity: usize,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            handoff_capacity: 1,
        }
    }
}

impl ReducerConfig {
    /// Limit the number of computations in flight
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    /// Set the handoff capacity
    pub fn with_handoff_capacity(mut self, capacity: usize) -> Self {
        self.handoff_capacity = capacity;
        self
    }

    /// Concurrency limit to use for a call over `key_count` keys
    pub fn effective_concurrency(&self, key_count: usize) -> usize {
        effective_limit(self.concurrency, key_count)
    }
}

impl ConfigValidation for ReducerConfig {
    fn validate(&self) -> WeaveResult<()> {
        validate_concurrency(self.concurrency)?;
        if self.handoff_capacity == 0 {
            return Err(WeaveError::invalid("handoff_capacity must be at least 1"));
        }
        Ok(())
    }
}

impl WeaveConfig for ReducerConfig {}

/// Configuration for broadcast (tee) primitives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeeConfig {
    /// Elements a consumer may fall behind before it stalls the source
    pub lag_bound: usize,
    /// Channel capacity for sinks created by the count-based entry points
    pub sink_capacity: usize,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            lag_bound: 16,
            sink_capacity: 1,
        }
    }
}

impl TeeConfig {
    /// Set the lag bound
    pub fn with_lag_bound(mut self, lag_bound: usize) -> Self {
        self.lag_bound = lag_bound;
        self
    }

    /// Set the sink channel capacity
    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity;
        self
    }
}

impl ConfigValidation for TeeConfig {
    fn validate(&self) -> WeaveResult<()> {
        if self.sink_capacity == 0 {
            return Err(WeaveError::invalid("sink_capacity must be at least 1"));
        }
        Ok(())
    }
}

impl WeaveConfig for TeeConfig {}

/// All weave settings, as laid out in a single TOML file
///
/// ```toml
/// [fan_out]
/// concurrency = 8
/// duplicate_keys = "reject"
///
/// [reducer]
/// handoff_capacity = 4
///
/// [tee]
/// lag_bound = 32
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveSettings {
    /// Keyed fan-out settings
    pub fan_out: FanOutConfig,
    /// Streaming reducer settings
    pub reducer: ReducerConfig,
    /// Broadcast settings
    pub tee: TeeConfig,
}

impl ConfigValidation for WeaveSettings {
    fn validate(&self) -> WeaveResult<()> {
        self.fan_out.validate()?;
        self.reducer.validate()?;
        self.tee.validate()
    }
}

impl WeaveConfig for WeaveSettings {}

fn effective_limit(configured: Option<usize>, key_count: usize) -> usize {
    configured.unwrap_or(key_count).max(1)
}

fn validate_concurrency(concurrency: Option<usize>) -> WeaveResult<()> {
    if concurrency == Some(0) {
        return Err(WeaveError::invalid("concurrency must be at least 1"));
    }
    Ok(())
}
