// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 CoSign Client Contributors

//! Connection to a single CoSign daemon
//!
//! A connection is only handed out after the full bootstrap has succeeded:
//! plaintext greeting, `STARTTLS 2`, TLS upgrade of the same socket, the
//! greeting over TLS and a `NOOP` probe. From then on it carries one
//! command and one reply at a time.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::error::{BootstrapStage, Error, Result};
use crate::tls::TlsSettings;
use crate::types::Reply;

/// Greeting prefix of a protocol v2 daemon
pub const PROTOCOL_V2_BANNER: &str = "2 Collaborative Web Single Sign-On ";
/// Greeting prefix of a legacy protocol v1 daemon
pub const PROTOCOL_V1_BANNER: &str = "Collaborative Web Single Sign-On ";
/// Text the daemon sends with its 221 reply to QUIT
pub const QUIT_MESSAGE: &str = "Service closing transmission channel";

const CODE_READY: u16 = 220;
const CODE_CLOSING: u16 = 221;
const CODE_OK: u16 = 250;

type TlsConn = BufReader<TlsStream<TcpStream>>;

/// Write one command line terminated by CRLF
pub(crate) async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    let mut buf = Vec::with_capacity(line.len() + 2);
    buf.extend_from_slice(line.as_bytes());
    buf.extend_from_slice(b"\r\n");
    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Read one reply, joining `<code>-<text>` continuation lines with '\n'
pub(crate) async fn read_reply<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Reply> {
    let (code, mut continued, mut message) = read_reply_line(reader).await?;

    while continued {
        let (next_code, next_continued, text) = read_reply_line(reader).await?;
        if next_code != code {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("reply code changed from {} to {} mid-reply", code, next_code),
            ));
        }
        message.push('\n');
        message.push_str(&text);
        continued = next_continued;
    }

    Ok(Reply { code, message })
}

async fn read_reply_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<(u16, bool, String)> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by daemon",
        ));
    }
    parse_reply_line(&line)
}

/// Split `<code>[ |-]<text>` into code, continuation flag and text
pub(crate) fn parse_reply_line(line: &str) -> io::Result<(u16, bool, String)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let bytes = line.as_bytes();

    let malformed = || {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed reply line: {:?}", line),
        )
    };

    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(malformed());
    }
    let code: u16 = line[..3].parse().map_err(|_| malformed())?;

    match bytes.get(3) {
        None => Ok((code, false, String::new())),
        Some(b' ') => Ok((code, false, line[4..].to_string())),
        Some(b'-') => Ok((code, true, line[4..].to_string())),
        Some(_) => Err(malformed()),
    }
}

/// Accept only a protocol v2 banner
fn check_greeting(greeting: &Reply) -> Result<()> {
    if greeting.message.starts_with(PROTOCOL_V1_BANNER) {
        return Err(Error::ProtocolVersion(
            "daemon has protocol version 1, expected protocol version 2".to_string(),
        ));
    }
    if greeting.code != CODE_READY || !greeting.message.starts_with(PROTOCOL_V2_BANNER) {
        return Err(Error::ProtocolVersion(format!(
            "daemon supplied unknown welcome message: {}",
            greeting
        )));
    }
    Ok(())
}

fn command_verb(line: &str) -> &str {
    line.split(' ').next().unwrap_or(line)
}

/// An established, TLS-protected connection to one daemon
pub struct Connection {
    address: SocketAddr,
    // None once closed
    stream: Option<Box<TlsConn>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Connect to `address` and run the bootstrap sequence
    pub async fn dial(address: SocketAddr, tls: &TlsSettings) -> Result<Self> {
        debug!("Dialing daemon {}", address);
        let tcp = TcpStream::connect(address).await?;
        let mut plain = BufReader::new(tcp);

        let greeting = read_reply(&mut plain).await?;
        check_greeting(&greeting)?;
        debug!("Daemon {} greeted with: {}", address, greeting.message);

        write_line(&mut plain, "STARTTLS 2")
            .await
            .map_err(|e| Error::bootstrap(BootstrapStage::StartTls, e))?;
        let reply = read_reply(&mut plain)
            .await
            .map_err(|e| Error::bootstrap(BootstrapStage::StartTls, e))?;
        if reply.code != CODE_READY {
            return Err(Error::bootstrap(
                BootstrapStage::StartTls,
                format!("expected code {}, got {}", CODE_READY, reply),
            ));
        }
        if !plain.buffer().is_empty() {
            return Err(Error::bootstrap(
                BootstrapStage::StartTls,
                "daemon sent data before the TLS handshake",
            ));
        }

        let connector = TlsConnector::from(tls.config.clone());
        let tls_stream = connector
            .connect(tls.server_name.clone(), plain.into_inner())
            .await
            .map_err(|e| Error::bootstrap(BootstrapStage::TlsHandshake, e))?;
        let mut stream = Box::new(BufReader::new(tls_stream));

        let reply = read_reply(stream.as_mut())
            .await
            .map_err(|e| Error::bootstrap(BootstrapStage::TlsGreeting, e))?;
        if reply.code != CODE_READY {
            return Err(Error::bootstrap(
                BootstrapStage::TlsGreeting,
                format!("expected code {}, got {}", CODE_READY, reply),
            ));
        }

        let mut conn = Connection {
            address,
            stream: Some(stream),
        };

        // A bad client key/certificate usually only shows up here
        let probe = match conn.command("NOOP").await {
            Ok(reply) if reply.code == CODE_OK => Ok(()),
            Ok(reply) => Err(format!("expected code {}, got {}", CODE_OK, reply)),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = probe {
            let _ = conn.close().await;
            return Err(Error::bootstrap(
                BootstrapStage::Noop,
                format!(
                    "{} (did you provide the right key/certificate?)",
                    reason
                ),
            ));
        }

        info!("Connected to CoSign daemon {}", address);
        Ok(conn)
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Send one command line and read its reply
    ///
    /// Any reply code is returned as a value; callers decide which codes are
    /// acceptable. I/O failures close the connection.
    pub async fn command(&mut self, line: &str) -> Result<Reply> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::ConnectionClosed(self.address))?;

        debug!("-> {} {}", self.address, command_verb(line));
        let result = match write_line(stream.as_mut(), line).await {
            Ok(()) => read_reply(stream.as_mut()).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) => {
                debug!("<- {} {}", self.address, reply.code);
                Ok(reply)
            }
            Err(e) => {
                debug!("Connection to {} failed: {}", self.address, e);
                self.stream = None;
                Err(Error::Transport(e))
            }
        }
    }

    /// Send QUIT and close the connection. A no-op when already closed.
    pub async fn quit(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        let outcome = match self.command("QUIT").await {
            Ok(reply) if reply.code == CODE_CLOSING && reply.message == QUIT_MESSAGE => Ok(()),
            Ok(reply) => Err(Error::Protocol {
                code: reply.code,
                message: reply.message,
            }),
            Err(e) => Err(e),
        };

        // The socket is released whether or not the daemon answered as expected
        self.close().await?;
        outcome
    }

    /// Close the connection. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of connection to {} failed: {}", self.address, e);
            }
            debug!("Closed connection to {}", self.address);
        }
        Ok(())
    }
}
