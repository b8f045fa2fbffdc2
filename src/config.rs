use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::Address;

/// Runtime configuration for a policy grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantConfig {
    /// Per-proxy bound on one send or request, in milliseconds
    pub contact_timeout_ms: u64,
    /// Page size for staking registry queries; `None` fetches everything at once
    pub pagination_size: Option<usize>,
    /// Periods a proxy's stake must stay locked to be eligible
    pub duration_periods: u64,
    pub label: String,
    /// Expiration timestamp recorded on the policy, if any
    pub expiration: Option<u64>,
    /// Proxies to try before sampling the weighted pool, in order
    pub include: Vec<Address>,
    pub exclude: Vec<Address>,
}

impl Default for GrantConfig {
    fn default() -> Self {
        GrantConfig {
            contact_timeout_ms: 2_000,
            pagination_size: None,
            duration_periods: 1,
            label: String::new(),
            expiration: None,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl GrantConfig {
    pub fn contact_timeout(&self) -> Duration {
        Duration::from_millis(self.contact_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contact_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "contact_timeout_ms must be positive".to_string(),
            ));
        }
        if let Some(address) = self.include.iter().find(|a| self.exclude.contains(a)) {
            return Err(ConfigError::Invalid(format!(
                "{} is both included and excluded",
                address
            )));
        }
        Ok(())
    }

    /// Loads a JSON config; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: GrantConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}
