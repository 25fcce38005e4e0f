//! Test fixtures: a throwaway PKI, a scripted cosignd and in-memory daemon doubles

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::daemon::{DaemonConn, Dialer};
use crate::error::{BootstrapStage, Error, Result};
use crate::tls::{create_client_tls_config, ClientIdentity, TlsSettings};
use crate::types::Reply;

pub const V2_GREETING: &str = "220 2 Collaborative Web Single Sign-On [COSIGNv3] [FACTORS]";
pub const NOOP_OK: &str = "250 Cosign v3";

fn pem_certs(pem: &str) -> Vec<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .unwrap()
}

fn pem_key(pem: &str) -> PrivateKeyDer<'static> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .unwrap()
        .unwrap()
}

fn leaf(
    names: &[&str],
    common_name: &str,
    usage: ExtendedKeyUsagePurpose,
    issuer: Option<(&Certificate, &KeyPair)>,
) -> (String, String) {
    let key = KeyPair::generate().unwrap();
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let mut params = CertificateParams::new(names).unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.extended_key_usages = vec![usage];

    let cert = match issuer {
        Some((issuer_cert, issuer_key)) => params.signed_by(&key, issuer_cert, issuer_key),
        None => params.self_signed(&key),
    }
    .unwrap();

    (cert.pem(), key.serialize_pem())
}

/// CA, daemon and client certificates, plus a client certificate the CA never signed
pub struct TestPki {
    pub ca_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
    pub rogue_cert_pem: String,
    pub rogue_key_pem: String,
}

pub struct PkiPaths {
    pub ca: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "Test CoSign CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let (server_cert_pem, server_key_pem) = leaf(
            &["localhost"],
            "localhost",
            ExtendedKeyUsagePurpose::ServerAuth,
            Some((&ca_cert, &ca_key)),
        );
        let (client_cert_pem, client_key_pem) = leaf(
            &[],
            "betterinformatics.com",
            ExtendedKeyUsagePurpose::ClientAuth,
            Some((&ca_cert, &ca_key)),
        );
        let (rogue_cert_pem, rogue_key_pem) = leaf(
            &[],
            "rogue",
            ExtendedKeyUsagePurpose::ClientAuth,
            None,
        );

        Self {
            ca_pem: ca_cert.pem(),
            server_cert_pem,
            server_key_pem,
            client_cert_pem,
            client_key_pem,
            rogue_cert_pem,
            rogue_key_pem,
        }
    }

    /// Write the CA and the good client identity as PEM files
    pub fn write_to(&self, dir: &Path) -> PkiPaths {
        let paths = PkiPaths {
            ca: dir.join("ca.pem"),
            client_cert: dir.join("client.crt"),
            client_key: dir.join("client.key"),
        };
        std::fs::write(&paths.ca, &self.ca_pem).unwrap();
        std::fs::write(&paths.client_cert, &self.client_cert_pem).unwrap();
        std::fs::write(&paths.client_key, &self.client_key_pem).unwrap();
        paths
    }

    fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        for cert in pem_certs(&self.ca_pem) {
            roots.add(cert).unwrap();
        }
        roots
    }

    pub fn client_identity(&self) -> ClientIdentity {
        ClientIdentity {
            chain: pem_certs(&self.client_cert_pem),
            key: pem_key(&self.client_key_pem),
        }
    }

    fn settings(&self, identity: ClientIdentity) -> TlsSettings {
        let config = create_client_tls_config(Some(self.roots()), Some(identity), false).unwrap();
        TlsSettings::new(Arc::new(config), "localhost").unwrap()
    }

    /// Client settings trusting this CA and presenting the CA-signed certificate
    pub fn client_settings(&self) -> TlsSettings {
        self.settings(self.client_identity())
    }

    /// Client settings presenting a self-signed certificate the daemon rejects
    pub fn rogue_client_settings(&self) -> TlsSettings {
        self.settings(ClientIdentity {
            chain: pem_certs(&self.rogue_cert_pem),
            key: pem_key(&self.rogue_key_pem),
        })
    }

    /// Daemon side: serve the localhost certificate and require CA-signed clients
    pub fn server_config(&self) -> Arc<ServerConfig> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let verifier = WebPkiClientVerifier::builder(Arc::new(self.roots()))
            .build()
            .unwrap();
        let config = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(pem_certs(&self.server_cert_pem), pem_key(&self.server_key_pem))
            .unwrap();
        Arc::new(config)
    }
}

type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

struct Script {
    greeting: String,
    noop_reply: String,
    acceptor: TlsAcceptor,
    responder: Responder,
    received: Mutex<Vec<String>>,
}

/// A cosignd stand-in on 127.0.0.1
///
/// NOOP and QUIT are answered like the real daemon; every other command
/// after STARTTLS goes to the responder. A responder returning `None` drops
/// the connection.
pub struct FakeDaemon {
    pub address: SocketAddr,
    script: Arc<Script>,
    connections: Arc<AtomicUsize>,
    finished: mpsc::UnboundedReceiver<()>,
    task: JoinHandle<()>,
}

impl FakeDaemon {
    pub async fn start<F>(pki: &TestPki, responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self::with_greeting(pki, V2_GREETING, responder).await
    }

    pub async fn with_greeting<F>(pki: &TestPki, greeting: &str, responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self::spawn(pki, greeting, NOOP_OK, responder).await
    }

    /// A daemon answering NOOP with `reply` instead of 250
    pub async fn with_noop_reply<F>(pki: &TestPki, reply: &str, responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self::spawn(pki, V2_GREETING, reply, responder).await
    }

    async fn spawn<F>(pki: &TestPki, greeting: &str, noop_reply: &str, responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let script = Arc::new(Script {
            greeting: greeting.to_string(),
            noop_reply: noop_reply.to_string(),
            acceptor: TlsAcceptor::from(pki.server_config()),
            responder: Arc::new(responder),
            received: Mutex::new(Vec::new()),
        });
        let connections = Arc::new(AtomicUsize::new(0));
        let (finished_tx, finished) = mpsc::unbounded_channel();

        let task = {
            let script = script.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let script = script.clone();
                    let finished_tx = finished_tx.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, &script).await;
                        let _ = finished_tx.send(());
                    });
                }
            })
        };

        Self {
            address,
            script,
            connections,
            finished,
            task,
        }
    }

    /// Every command line received, across all connections
    pub fn received(&self) -> Vec<String> {
        self.script.received.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until one connection has been torn down
    pub async fn wait_for_disconnect(&mut self) {
        tokio::time::timeout(Duration::from_secs(10), self.finished.recv())
            .await
            .expect("daemon connection never closed");
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: TcpStream, script: &Script) -> io::Result<()> {
    let mut plain = BufReader::new(socket);
    plain
        .get_mut()
        .write_all(format!("{}\r\n", script.greeting).as_bytes())
        .await?;

    loop {
        let mut line = String::new();
        if plain.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end().to_string();
        script.received.lock().unwrap().push(line.clone());

        if line == "STARTTLS 2" {
            plain
                .get_mut()
                .write_all(b"220 Ready to start TLS\r\n")
                .await?;
            break;
        }
        plain
            .get_mut()
            .write_all(b"500 Command not recognized\r\n")
            .await?;
    }

    let tls = script.acceptor.accept(plain.into_inner()).await?;
    let mut tls = BufReader::new(tls);
    tls.write_all(format!("{}\r\n", V2_GREETING).as_bytes())
        .await?;
    tls.flush().await?;

    loop {
        let mut line = String::new();
        if tls.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end().to_string();
        script.received.lock().unwrap().push(line.clone());

        let reply = match line.as_str() {
            "NOOP" => Some(script.noop_reply.clone()),
            "QUIT" => {
                tls.write_all(b"221 Service closing transmission channel\r\n")
                    .await?;
                tls.flush().await?;
                let _ = tls.shutdown().await;
                return Ok(());
            }
            _ => (script.responder)(&line),
        };

        match reply {
            Some(reply) => {
                tls.write_all(format!("{}\r\n", reply).as_bytes()).await?;
                tls.flush().await?;
            }
            None => return Ok(()),
        }
    }
}

/// What a scripted dial to one address does
pub enum DialPlan {
    Fail,
    /// Connect; each command consumes the next step
    Connect(Vec<Step>),
}

pub enum Step {
    Reply(u16, &'static str),
    /// Transport failure; the connection closes
    Drop,
}

#[derive(Default)]
struct DialerLog {
    plans: HashMap<SocketAddr, VecDeque<DialPlan>>,
    dials: Vec<SocketAddr>,
    commands: Vec<(SocketAddr, String)>,
    closes: Vec<SocketAddr>,
    quits: Vec<SocketAddr>,
    failing_closes: Vec<SocketAddr>,
}

/// Dialer handing out scripted in-memory connections
#[derive(Clone, Default)]
pub struct ScriptedDialer {
    log: Arc<Mutex<DialerLog>>,
}

impl ScriptedDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the behavior of the next dial to `address`
    pub fn plan(&self, address: SocketAddr, plan: DialPlan) -> &Self {
        self.log
            .lock()
            .unwrap()
            .plans
            .entry(address)
            .or_default()
            .push_back(plan);
        self
    }

    /// Make every close of a connection to `address` report an error
    pub fn fail_close(&self, address: SocketAddr) -> &Self {
        self.log.lock().unwrap().failing_closes.push(address);
        self
    }

    pub fn dials(&self) -> Vec<SocketAddr> {
        self.log.lock().unwrap().dials.clone()
    }

    pub fn commands(&self) -> Vec<(SocketAddr, String)> {
        self.log.lock().unwrap().commands.clone()
    }

    pub fn closes(&self) -> Vec<SocketAddr> {
        self.log.lock().unwrap().closes.clone()
    }

    pub fn quits(&self) -> Vec<SocketAddr> {
        self.log.lock().unwrap().quits.clone()
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    type Conn = ScriptedConn;

    async fn dial(&self, address: SocketAddr) -> Result<ScriptedConn> {
        let mut log = self.log.lock().unwrap();
        log.dials.push(address);
        let plan = log.plans.get_mut(&address).and_then(|plans| plans.pop_front());

        match plan {
            Some(DialPlan::Connect(steps)) => Ok(ScriptedConn {
                address,
                steps: steps.into(),
                closed: false,
                log: self.log.clone(),
            }),
            Some(DialPlan::Fail) => Err(Error::bootstrap(BootstrapStage::Noop, "scripted failure")),
            None => Err(Error::Transport(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no dial planned",
            ))),
        }
    }
}

pub struct ScriptedConn {
    address: SocketAddr,
    steps: VecDeque<Step>,
    closed: bool,
    log: Arc<Mutex<DialerLog>>,
}

#[async_trait]
impl DaemonConn for ScriptedConn {
    fn address(&self) -> SocketAddr {
        self.address
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn command(&mut self, line: &str) -> Result<Reply> {
        if self.closed {
            return Err(Error::ConnectionClosed(self.address));
        }
        self.log
            .lock()
            .unwrap()
            .commands
            .push((self.address, line.to_string()));

        match self.steps.pop_front() {
            Some(Step::Reply(code, message)) => Ok(Reply::new(code, message)),
            Some(Step::Drop) | None => {
                self.closed = true;
                Err(Error::Transport(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "scripted drop",
                )))
            }
        }
    }

    async fn quit(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.log.lock().unwrap().quits.push(self.address);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        log.closes.push(self.address);
        if log.failing_closes.contains(&self.address) {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted close failure",
            )));
        }
        Ok(())
    }
}
