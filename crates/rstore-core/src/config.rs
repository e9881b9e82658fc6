//! Engine configuration
//!
//! Limits enforced at runtime and the access policy used by the acquires
//! checker. Every field has a default, so an empty JSON object is a valid
//! configuration.

use crate::{Error, Result};

/// Which store operations need an `acquires` declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Every store access, including publish and existence checks
    #[default]
    Strict,
    /// Only remove, shared borrow and exclusive borrow (publish and `exists`
    /// are exempt)
    MoveCompatible,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum nesting of calls inside one entry function
    pub max_call_depth: usize,
    /// Largest resource, by estimated size, a transaction may commit
    pub max_resource_bytes: usize,
    pub access_policy: AccessPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_call_depth: 64,
            max_resource_bytes: 1_048_576,
            access_policy: AccessPolicy::Strict,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_call_depth == 0 {
            return Err(Error::Config("max_call_depth must be at least 1".into()));
        }
        if self.max_resource_bytes == 0 {
            return Err(Error::Config("max_resource_bytes must be at least 1".into()));
        }
        Ok(())
    }
}
