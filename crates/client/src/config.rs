// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 CoSign Client Contributors

// CoSign Client - Config Module
// File configuration for a CoSign connection and the runtime config built from it

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::network::resolve_daemon_addresses;
use crate::tls::{
    create_client_tls_config, load_certs, load_private_key, load_root_store, ClientIdentity,
    TlsSettings,
};

/// CoSign connection settings as written in a config file
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CosignConfig {
    /// Daemon host; a name resolving to several addresses yields several daemons
    pub daemon_host: String,

    /// Daemon port (default 6663). May also be embedded in `daemon_host`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_port: Option<u16>,

    /// Service name the cookies belong to (e.g., "betterinformatics.com")
    pub service: String,

    /// Name expected in the daemon's certificate (defaults to `daemon_host`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// PEM bundle of trusted CAs (webpki roots when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    /// PEM client certificate presented to the daemon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,

    /// PEM private key for `cert_file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,

    /// Skip server certificate verification
    #[serde(default)]
    pub insecure: bool,
}

impl CosignConfig {
    /// Parse a config from TOML text and validate it
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read configuration {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::from_toml_str(&contents)?;
        info!("Loaded CoSign configuration from: {}", path.display());
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.daemon_host.trim().is_empty() {
            return Err(Error::Config("daemon_host must not be empty".to_string()));
        }
        if self.service.trim().is_empty() {
            return Err(Error::Config("service must not be empty".to_string()));
        }
        if self.service.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!(
                "service {:?} must not contain whitespace",
                self.service
            )));
        }
        if self.daemon_port == Some(0) {
            return Err(Error::Config("daemon_port must not be 0".to_string()));
        }
        match (&self.cert_file, &self.key_file) {
            (Some(_), None) => {
                return Err(Error::Config(
                    "cert_file is set but key_file is missing".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(Error::Config(
                    "key_file is set but cert_file is missing".to_string(),
                ))
            }
            _ => {}
        }
        Ok(())
    }

    /// Name used to verify the daemon's certificate
    pub fn effective_server_name(&self) -> String {
        match &self.server_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => {
                let host = self.daemon_host.trim();
                crate::network::split_host_port(host)
                    .map(|(bare, _)| bare)
                    .unwrap_or(host)
                    .trim_matches(|c| c == '[' || c == ']')
                    .to_string()
            }
        }
    }

    /// Load the TLS material and build the runtime client configuration
    pub fn build(&self) -> Result<ClientConfig> {
        self.validate()?;

        let roots = self.ca_file.as_deref().map(load_root_store).transpose()?;

        let identity = match (&self.cert_file, &self.key_file) {
            (Some(cert_file), Some(key_file)) => Some(ClientIdentity {
                chain: load_certs(cert_file)?,
                key: load_private_key(key_file)?,
            }),
            _ => None,
        };

        let tls_config = create_client_tls_config(roots, identity, self.insecure)?;
        let tls = TlsSettings::new(Arc::new(tls_config), &self.effective_server_name())?;

        Ok(ClientConfig {
            host: self.daemon_host.trim().to_string(),
            port: self.daemon_port,
            service: self.service.trim().to_string(),
            tls,
        })
    }
}

/// Runtime configuration handed to `Client::dial`
///
/// The client never modifies it, so one value may dial any number of clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: Option<u16>,
    pub service: String,
    pub tls: TlsSettings,
}

impl ClientConfig {
    /// Every daemon address the configured host resolves to
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        resolve_daemon_addresses(&self.host, self.port).await
    }
}
