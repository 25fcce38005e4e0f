// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 CoSign Client Contributors

// Error types for the CoSign client

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

/// Step of the connection bootstrap that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    /// `STARTTLS 2` was not answered with 220
    StartTls,
    /// TLS handshake over the upgraded socket
    TlsHandshake,
    /// Greeting read over TLS after the handshake
    TlsGreeting,
    /// `NOOP` liveness/credential probe
    Noop,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            BootstrapStage::StartTls => "STARTTLS",
            BootstrapStage::TlsHandshake => "TLS handshake",
            BootstrapStage::TlsGreeting => "TLS greeting",
            BootstrapStage::Noop => "NOOP",
        };
        f.write_str(stage)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed cookie: {0}")]
    MalformedCookie(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Could not resolve daemon host {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Connection to daemon {0} is closed")]
    ConnectionClosed(SocketAddr),

    #[error("Unsupported daemon protocol: {0}")]
    ProtocolVersion(String),

    #[error("Bootstrap failed at {stage}: {reason}")]
    Bootstrap {
        stage: BootstrapStage,
        reason: String,
    },

    #[error("User is already logged out")]
    LoggedOut,

    #[error("Cookie not found: {code} {message}")]
    NotFound { code: u16, message: String },

    #[error("Daemon returned {code} {message}")]
    Protocol { code: u16, message: String },

    #[error("Malformed CHECK payload: {0}")]
    MalformedPayload(String),

    #[error("Failed to reconnect to daemon {address}: {source}")]
    Reconnect {
        address: SocketAddr,
        #[source]
        source: Box<Error>,
    },

    #[error("No daemons configured")]
    NoDaemons,

    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<Error>),
}

fn format_aggregate(errors: &[Error]) -> String {
    let joined = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} errors occurred: {}", errors.len(), joined)
}

impl Error {
    pub(crate) fn bootstrap(stage: BootstrapStage, reason: impl fmt::Display) -> Self {
        Error::Bootstrap {
            stage,
            reason: reason.to_string(),
        }
    }

    /// Fold a list of errors into one result. A single error is returned as-is.
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors)),
        }
    }

    /// Network-level failure on an established connection
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::ConnectionClosed(_))
    }

    /// Bootstrap failure most likely caused by a wrong client key/certificate
    pub fn is_credential_error(&self) -> bool {
        match self {
            Error::Bootstrap { stage, .. } => matches!(
                stage,
                BootstrapStage::TlsHandshake | BootstrapStage::TlsGreeting | BootstrapStage::Noop
            ),
            Error::Reconnect { source, .. } => source.is_credential_error(),
            _ => false,
        }
    }

    /// Raw daemon response code carried by this error, if any
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::NotFound { code, .. } | Error::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
