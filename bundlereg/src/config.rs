use std::env;

use config::{Config, Environment, File};
use ociclient::Client;
use ociclient::image_reference::NormalizationRules;
use serde::Deserialize;

use crate::error::{DistributionError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Registry hosts spoken to over plain http
    #[serde(default)]
    pub insecure: Vec<String>,
    /// Registry host assumed for host-less source references
    pub default_registry: Option<String>,
    /// Permit tag-less source references to mean `latest`
    #[serde(default)]
    pub implicit_latest_tag: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "dev".into());

        let config = Config::builder()
            // Add configuration from files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add environment variables with prefix BUNDLEREG_; double
            // underscore separates nesting levels so snake_case keys survive
            .add_source(Environment::with_prefix("BUNDLEREG").separator("__"))
            .build()
            .map_err(|e| DistributionError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| DistributionError::Config(e.to_string()))
    }

    /// The basic auth token handed to the registry client, if credentials
    /// are configured.
    pub fn auth_token(&self) -> Option<String> {
        match (&self.registry.username, &self.registry.password) {
            (Some(username), Some(password)) => Some(Client::basic_auth_token(username, password)),
            _ => None,
        }
    }

    /// Normalization rules for source references inside bundles.
    pub fn normalization_rules(&self) -> NormalizationRules {
        NormalizationRules {
            default_registry: self.registry.default_registry.clone(),
            implicit_latest_tag: self.registry.implicit_latest_tag,
        }
    }
}
