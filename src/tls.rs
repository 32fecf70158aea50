//! Glue from certificate material to a [`TlsAcceptor`].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

/// Loads a PEM certificate chain and private key.
pub fn acceptor_from_pem(cert_path: &Path, key_path: &Path) -> anyhow::Result<TlsAcceptor> {
    let mut reader = BufReader::new(
        File::open(cert_path).with_context(|| format!("opening {}", cert_path.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing certificates in {}", cert_path.display()))?;

    let mut reader = BufReader::new(
        File::open(key_path).with_context(|| format!("opening {}", key_path.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("parsing key in {}", key_path.display()))?
        .with_context(|| format!("no private key in {}", key_path.display()))?;

    acceptor_from_der(certs, key)
}

pub fn acceptor_from_der(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> anyhow::Result<TlsAcceptor> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(config)))
}
