// CoSign CLI - Config Module
// Locates and loads the CoSign connection settings for the CLI

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub use cosign_client::CosignConfig;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "COSIGN_CONFIG";

pub const EXAMPLE_CONFIG: &str = r#"# CoSign client configuration
daemon_host = "weblogin.example.ac.uk"
# daemon_port = 6663
service = "service.example.ac.uk"
# server_name = "weblogin.example.ac.uk"
ca_file = "/etc/cosign/ca.pem"
cert_file = "/etc/cosign/client.crt"
key_file = "/etc/cosign/client.key"
insecure = false
"#;

/// CLI configuration (wrapper around CosignConfig with file I/O)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub cosign: CosignConfig,
}

impl CliConfig {
    /// Load CLI configuration from `path`, or from the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::config_path(path)?;

        let contents = fs::read_to_string(&config_path).with_context(|| {
            format!(
                "Failed to read CoSign configuration {} (see `cosign-check config --example`)",
                config_path.display()
            )
        })?;

        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).context("Failed to parse CoSign configuration")?;
        config.cosign.validate()?;
        Ok(config)
    }

    /// Resolve the configuration file path: explicit path, then $COSIGN_CONFIG,
    /// then the user config directory
    pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }

        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("cosign").join("client.toml"))
    }
}
