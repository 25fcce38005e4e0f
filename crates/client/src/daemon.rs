// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 CoSign Client Contributors

//! Daemon registry: one connection slot per resolved daemon address
//!
//! Slots are owned by the registry and replaced in place on reconnect, so no
//! caller ever holds a handle to a discarded connection.

use std::net::SocketAddr;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::tls::TlsSettings;
use crate::types::{DaemonStatus, Reply};

/// Something a command can be sent to and that can be closed
#[async_trait]
pub trait DaemonConn: Send {
    fn address(&self) -> SocketAddr;

    fn is_closed(&self) -> bool;

    async fn command(&mut self, line: &str) -> Result<Reply>;

    async fn quit(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens bootstrapped connections to daemon addresses
#[async_trait]
pub trait Dialer: Send + Sync {
    type Conn: DaemonConn;

    async fn dial(&self, address: SocketAddr) -> Result<Self::Conn>;
}

#[async_trait]
impl DaemonConn for Connection {
    fn address(&self) -> SocketAddr {
        Connection::address(self)
    }

    fn is_closed(&self) -> bool {
        Connection::is_closed(self)
    }

    async fn command(&mut self, line: &str) -> Result<Reply> {
        Connection::command(self, line).await
    }

    async fn quit(&mut self) -> Result<()> {
        Connection::quit(self).await
    }

    async fn close(&mut self) -> Result<()> {
        Connection::close(self).await
    }
}

/// Dials real TLS connections with shared settings
#[derive(Debug, Clone)]
pub struct TlsDialer {
    tls: TlsSettings,
}

impl TlsDialer {
    pub fn new(tls: TlsSettings) -> Self {
        Self { tls }
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    type Conn = Connection;

    async fn dial(&self, address: SocketAddr) -> Result<Connection> {
        Connection::dial(address, &self.tls).await
    }
}

/// One daemon address and its current connection, if any
#[derive(Debug)]
pub struct DaemonEntry<C> {
    address: SocketAddr,
    conn: Option<C>,
}

impl<C: DaemonConn> DaemonEntry<C> {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Connected and bootstrapped
    pub fn is_ready(&self) -> bool {
        self.conn.as_ref().is_some_and(|conn| !conn.is_closed())
    }
}

/// Fixed set of daemon entries, all dialed through one dialer
pub struct DaemonRegistry<D: Dialer> {
    dialer: D,
    entries: Vec<DaemonEntry<D::Conn>>,
}

impl<D: Dialer> DaemonRegistry<D> {
    /// Dial every address. If any fails, the ones already open are closed.
    pub async fn connect(dialer: D, addresses: Vec<SocketAddr>) -> Result<Self> {
        if addresses.is_empty() {
            return Err(Error::NoDaemons);
        }

        let mut registry = Self {
            dialer,
            entries: Vec::with_capacity(addresses.len()),
        };

        for address in addresses {
            match registry.dialer.dial(address).await {
                Ok(conn) => registry.entries.push(DaemonEntry {
                    address,
                    conn: Some(conn),
                }),
                Err(err) => {
                    warn!("Failed to connect to daemon {}: {}", address, err);
                    return Err(match registry.close_all().await {
                        Ok(()) => err,
                        Err(cleanup) => Error::Aggregate(vec![err, cleanup]),
                    });
                }
            }
        }

        info!("Connected to {} CoSign daemon(s)", registry.entries.len());
        Ok(registry)
    }

    pub fn entries(&self) -> &[DaemonEntry<D::Conn>] {
        &self.entries
    }

    pub fn status(&self) -> Vec<DaemonStatus> {
        self.entries
            .iter()
            .map(|entry| DaemonStatus {
                address: entry.address,
                ready: entry.is_ready(),
            })
            .collect()
    }

    /// Indices to try, shuffled when there is more than one daemon
    pub fn trial_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        if order.len() > 1 {
            order.shuffle(&mut rand::rng());
        }
        order
    }

    /// Replace the connection at `index` with a freshly dialed one
    pub async fn reconnect(&mut self, index: usize) -> Result<()> {
        let address = self.entries[index].address;

        if let Some(mut old) = self.entries[index].conn.take() {
            if let Err(e) = old.close().await {
                debug!("Closing stale connection to {} failed: {}", address, e);
            }
        }

        info!("Reconnecting to daemon {}", address);
        let conn = self
            .dialer
            .dial(address)
            .await
            .map_err(|e| Error::Reconnect {
                address,
                source: Box::new(e),
            })?;
        self.entries[index].conn = Some(conn);
        Ok(())
    }

    async fn send(&mut self, index: usize, command: &str) -> Result<Reply> {
        let entry = &mut self.entries[index];
        match entry.conn.as_mut() {
            Some(conn) => conn.command(command).await,
            None => Err(Error::ConnectionClosed(entry.address)),
        }
    }

    /// Run one command against the daemon at `index`
    ///
    /// A connection that is not ready is reconnected first. A transport
    /// failure mid-command gets exactly one reconnect and one retry.
    pub async fn exchange(&mut self, index: usize, command: &str) -> Result<Reply> {
        if !self.entries[index].is_ready() {
            self.reconnect(index).await?;
        }

        match self.send(index, command).await {
            Err(err) if err.is_transport() => {
                let address = self.entries[index].address;
                warn!("Command to daemon {} failed ({}), retrying once", address, err);

                self.reconnect(index).await?;
                self.send(index, command)
                    .await
                    .map_err(|e| Error::Reconnect {
                        address,
                        source: Box::new(e),
                    })
            }
            result => result,
        }
    }

    /// QUIT every daemon, collecting all failures
    pub async fn quit_all(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        for entry in &mut self.entries {
            if let Some(conn) = entry.conn.as_mut() {
                if let Err(e) = conn.quit().await {
                    warn!("QUIT to daemon {} failed: {}", entry.address, e);
                    errors.push(e);
                }
            }
        }
        Error::aggregate(errors)
    }

    /// Close every daemon connection, collecting all failures
    pub async fn close_all(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        for entry in &mut self.entries {
            if let Some(conn) = entry.conn.as_mut() {
                if let Err(e) = conn.close().await {
                    warn!("Closing daemon {} failed: {}", entry.address, e);
                    errors.push(e);
                }
            }
        }
        Error::aggregate(errors)
    }
}
