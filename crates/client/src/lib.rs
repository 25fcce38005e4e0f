// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 CoSign Client Contributors

// CoSign Client Library
// Validates CoSign login and service cookies against one or more cosignd daemons (protocol v2)

pub mod client;
pub mod config;
pub mod conn;
pub mod daemon;
pub mod error;
pub mod network;
pub mod protocol;
pub mod tls;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::Client;
pub use config::{ClientConfig, CosignConfig};
pub use conn::Connection;
pub use daemon::{DaemonConn, DaemonEntry, DaemonRegistry, Dialer, TlsDialer};
pub use error::{BootstrapStage, Error, Result};
pub use network::{format_host_port, resolve_daemon_addresses, DEFAULT_DAEMON_PORT};
pub use protocol::{build_command, interpret_response, parse_payload, CheckOutcome};
pub use tls::TlsSettings;
pub use types::{CheckResponse, DaemonStatus, Reply};
