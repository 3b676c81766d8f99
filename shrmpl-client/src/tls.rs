//! # Mutual TLS Context
//!
//! Purpose: Build a fresh `rustls` client configuration for each vault call,
//! carrying the client certificate and verifying the server chain.
//!
//! ## Design Principles
//! 1. **Chain Yes, Name No**: The server chain must anchor in a trusted root;
//!    the hostname in the certificate is not compared with the URL host.
//! 2. **Explicit Provider**: The crypto provider is passed in, never taken
//!    from process-global state.

use std::fmt;
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{aws_lc_rs, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore,
    SignatureScheme,
};
use rustls_pemfile::{certs, private_key};
use tracing::debug;

use shrmpl_common::{ClientError, ClientResult};

/// Reads every PEM certificate in `path`.
pub fn load_certs(path: &Path) -> ClientResult<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path)?;
    let chain = certs(&mut BufReader::new(pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| certificate_error(path, err))?;
    if chain.is_empty() {
        return Err(ClientError::Certificate(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(chain)
}

/// Reads the first PEM private key (PKCS#1, PKCS#8 or SEC1) in `path`.
pub fn load_private_key(path: &Path) -> ClientResult<PrivateKeyDer<'static>> {
    let pem = read_pem(path)?;
    private_key(&mut BufReader::new(pem.as_slice()))
        .map_err(|err| certificate_error(path, err))?
        .ok_or_else(|| {
            ClientError::Certificate(format!("no private key found in {}", path.display()))
        })
}

/// Trust anchors from a PEM bundle, or the bundled Mozilla roots.
pub fn load_roots(ca_path: Option<&Path>) -> ClientResult<RootCertStore> {
    let Some(path) = ca_path else {
        return Ok(RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        });
    };

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(load_certs(path)?);
    debug!(path = %path.display(), added, ignored, "loaded CA bundle");
    if roots.is_empty() {
        return Err(ClientError::Certificate(format!(
            "no valid CA certificates found in {}",
            path.display()
        )));
    }
    Ok(roots)
}

/// Builds a client configuration presenting `cert_path`/`key_path` and
/// accepting any server chain that verifies against `roots`.
pub fn build_client_config(
    roots: RootCertStore,
    cert_path: &Path,
    key_path: &Path,
) -> ClientResult<Arc<ClientConfig>> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let chain = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let verifier = ChainOnlyVerifier::new(roots, provider.clone())?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(chain, key)?;
    Ok(Arc::new(config))
}

/// WebPKI chain verification with the server-name check disabled.
pub struct ChainOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ChainOnlyVerifier {
    pub fn new(roots: RootCertStore, provider: Arc<CryptoProvider>) -> ClientResult<Self> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|err| ClientError::Certificate(err.to_string()))?;
        Ok(ChainOnlyVerifier { inner })
    }
}

impl fmt::Debug for ChainOnlyVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainOnlyVerifier").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            // The chain was already validated when the name check runs.
            Err(TlsError::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            Err(err) => Err(err),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn read_pem(path: &Path) -> ClientResult<Vec<u8>> {
    fs::read(path).map_err(|err| certificate_error(path, err))
}

fn certificate_error(path: &Path, err: impl fmt::Display) -> ClientError {
    ClientError::Certificate(format!("{}: {}", path.display(), err))
}
