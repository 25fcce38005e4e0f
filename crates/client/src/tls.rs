// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 CoSign Client Contributors

// CoSign Client - TLS Module
// Builds the rustls client configuration used after STARTTLS

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme};
use rustls_pemfile::{certs, private_key};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// TLS parameters for the STARTTLS upgrade
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub config: Arc<ClientConfig>,
    pub server_name: ServerName<'static>,
}

impl TlsSettings {
    pub fn new(config: Arc<ClientConfig>, server_name: &str) -> Result<Self> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| Error::Config(format!("Invalid server name {:?}: {}", server_name, e)))?;
        Ok(Self {
            config,
            server_name,
        })
    }
}

/// Client certificate chain and its private key
#[derive(Debug)]
pub struct ClientIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Verifier that accepts any server certificate but still checks handshake signatures
#[derive(Debug)]
struct SkipServerVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    // Install default crypto provider if not already set
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Read every certificate from a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    let certs = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(Error::Config(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Read the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    private_key(&mut reader)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?
        .ok_or_else(|| Error::Config(format!("No private key found in {}", path.display())))
}

/// Build a trust store from a CA bundle
pub fn load_root_store(ca_file: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(load_certs(ca_file)?);
    if ignored > 0 {
        warn!(
            "Ignored {} unparsable certificate(s) in {}",
            ignored,
            ca_file.display()
        );
    }
    if added == 0 {
        return Err(Error::Config(format!(
            "No usable CA certificates in {}",
            ca_file.display()
        )));
    }
    debug!("Loaded {} CA certificate(s) from {}", added, ca_file.display());
    Ok(roots)
}

fn webpki_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// Create a rustls ClientConfig for talking to cosignd
///
/// `roots` of `None` falls back to the webpki roots. With `insecure` the
/// server certificate is not verified at all.
pub fn create_client_tls_config(
    roots: Option<RootCertStore>,
    identity: Option<ClientIdentity>,
    insecure: bool,
) -> Result<ClientConfig> {
    let provider = crypto_provider();

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = if insecure {
        warn!("Server certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification { provider }))
    } else {
        builder.with_root_certificates(roots.unwrap_or_else(webpki_root_store))
    };

    let config = match identity {
        Some(identity) => builder.with_client_auth_cert(identity.chain, identity.key)?,
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}
