//! TLS credentials: PEM loading, development certificates, fingerprints.

use quicbridge_core::{BridgeError, BridgeResult};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded server TLS configuration plus the leaf certificate, kept for
/// fingerprinting.
pub struct TlsMaterial {
    pub config: Arc<rustls::ServerConfig>,
    pub leaf: CertificateDer<'static>,
}

/// Build a TLS 1.3 server configuration (QUIC requires 1.3) with no client
/// authentication.
pub fn build_tls_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    alpn: &[String],
) -> BridgeResult<Arc<rustls::ServerConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| BridgeError::Tls(format!("unsupported protocol versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| BridgeError::Tls(format!("invalid certificate or key: {e}")))?;

    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Ok(Arc::new(config))
}

/// Load a PEM certificate chain and private key from disk.
pub fn load_tls_config(cert_path: &Path, key_path: &Path, alpn: &[String]) -> BridgeResult<TlsMaterial> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| BridgeError::Tls(format!("cannot read cert {}: {e}", cert_path.display())))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| BridgeError::Tls(format!("cannot read key {}: {e}", key_path.display())))?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BridgeError::Tls(format!("bad PEM in {}: {e}", cert_path.display())))?;
    let leaf = certs
        .first()
        .cloned()
        .ok_or_else(|| BridgeError::Tls(format!("no certificate found in {}", cert_path.display())))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| BridgeError::Tls(format!("bad PEM in {}: {e}", key_path.display())))?
        .ok_or_else(|| BridgeError::Tls(format!("no private key found in {}", key_path.display())))?;

    Ok(TlsMaterial {
        config: build_tls_config(certs, key, alpn)?,
        leaf,
    })
}

/// Write a self-signed development certificate and key into `dir`.
///
/// Valid for `localhost`, `127.0.0.1` and `::1`. Returns the cert and key paths.
pub fn generate_self_signed_cert(dir: &Path) -> BridgeResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");

    let mut params = rcgen::CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])
    .map_err(|e| BridgeError::Tls(format!("certificate parameters: {e}")))?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "quicbridge dev cert");

    let key_pair =
        rcgen::KeyPair::generate().map_err(|e| BridgeError::Tls(format!("key generation: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| BridgeError::Tls(format!("self-signing: {e}")))?;

    std::fs::write(&cert_path, cert.pem())?;
    std::fs::write(&key_path, key_pair.serialize_pem())?;

    Ok((cert_path, key_path))
}

/// SHA-256 fingerprint of a DER certificate, as lowercase hex.
pub fn cert_fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}
