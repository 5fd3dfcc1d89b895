//! Gateway configuration.

use std::time::Duration;

use derivative::Derivative;
use displaydoc::Display;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
    /// could not deserialize configuration: {0}
    DeserializeConfigError(serde_yaml::Error),
}

fn default_expose_federation_keys() -> bool {
    true
}

/// The configuration for the gateway.
///
/// Can be created through `serde::Deserialize` from various formats, or loaded from YAML
/// with [`Configuration::from_yaml`].
#[derive(Clone, Derivative, Deserialize, Serialize, JsonSchema)]
#[derivative(Debug, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Keep the stitching key (`__federation`) on every object that crossed a service
    /// boundary in the response; defaults to true
    #[serde(default = "default_expose_federation_keys")]
    #[derivative(Default(value = "true"))]
    pub expose_federation_keys: bool,

    /// Request deadline in human-readable format, e.g. `5s`; no deadline when unset
    #[serde(with = "humantime_serde", default)]
    #[schemars(with = "Option<String>", default)]
    pub timeout: Option<Duration>,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(expose_federation_keys: Option<bool>, timeout: Option<Duration>) -> Self {
        Self {
            expose_federation_keys: expose_federation_keys
                .unwrap_or_else(default_expose_federation_keys),
            timeout,
        }
    }

    /// Parse a configuration document. An empty document yields the defaults.
    pub fn from_yaml(raw_yaml: &str) -> Result<Configuration, ConfigurationError> {
        if raw_yaml.trim().is_empty() {
            return Ok(Configuration::default());
        }
        let configuration: Configuration =
            serde_yaml::from_str(raw_yaml).map_err(ConfigurationError::DeserializeConfigError)?;
        if configuration.timeout == Some(Duration::ZERO) {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "timeout must be greater than zero",
                error: "0s".to_string(),
            });
        }
        Ok(configuration)
    }
}
