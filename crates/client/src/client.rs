// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 CoSign Client Contributors

//! Public client for one or more CoSign daemons

use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::daemon::{DaemonRegistry, Dialer, TlsDialer};
use crate::error::{Error, Result};
use crate::protocol::{build_command, interpret_response, CheckOutcome};
use crate::types::{CheckResponse, DaemonStatus};

/// A client connected to every daemon the configured host resolves to
///
/// Every operation takes `&mut self`: a connection carries one command at a
/// time. To share a client between tasks, wrap it in a
/// `tokio::sync::Mutex`.
pub struct Client<D: Dialer = TlsDialer> {
    service: String,
    registry: DaemonRegistry<D>,
}

impl Client<TlsDialer> {
    /// Resolve the configured host and bootstrap a connection to each address
    pub async fn dial(config: &ClientConfig) -> Result<Self> {
        let addresses = config.resolve().await?;
        Self::with_dialer(&config.service, TlsDialer::new(config.tls.clone()), addresses).await
    }
}

impl<D: Dialer> Client<D> {
    /// Connect to `addresses` through a custom dialer
    pub async fn with_dialer(
        service: impl Into<String>,
        dialer: D,
        addresses: Vec<SocketAddr>,
    ) -> Result<Self> {
        let registry = DaemonRegistry::connect(dialer, addresses).await?;
        Ok(Self {
            service: service.into(),
            registry,
        })
    }

    pub fn daemons(&self) -> Vec<DaemonStatus> {
        self.registry.status()
    }

    /// Validate a login or service cookie
    ///
    /// Daemons are tried in random order. A 533/534 from one daemon moves on
    /// to the next; any other answer is final. When every daemon reports the
    /// cookie missing, the last daemon's code and message are returned.
    pub async fn check(&mut self, cookie: &str, service_cookie: bool) -> Result<CheckResponse> {
        let command = build_command(&self.service, cookie, service_cookie)?;

        let mut not_found = None;
        for index in self.registry.trial_order() {
            let reply = self.registry.exchange(index, &command).await?;

            match interpret_response(reply.code, &reply.message, service_cookie)? {
                CheckOutcome::NotFound { code, message } => {
                    let address = self.registry.entries()[index].address();
                    warn!("Daemon {} does not know the cookie ({} {})", address, code, message);
                    not_found = Some(Error::NotFound { code, message });
                }
                outcome => {
                    debug!("CHECK answered with {}", reply.code);
                    return outcome.into_result();
                }
            }
        }

        Err(not_found.unwrap_or(Error::NoDaemons))
    }

    /// Send QUIT to every daemon and close the connections
    ///
    /// Already closed connections are skipped; every daemon gets an attempt.
    pub async fn quit(&mut self) -> Result<()> {
        self.registry.quit_all().await
    }

    /// Close every daemon connection without QUIT
    pub async fn close(&mut self) -> Result<()> {
        self.registry.close_all().await
    }
}
