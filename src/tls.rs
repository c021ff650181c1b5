//! TLS listener setup.
//!
//! [`build_acceptor`] reads a PEM certificate chain and private key and
//! returns a `tokio-rustls` acceptor advertising `h2` and `http/1.1` over
//! ALPN. Any unreadable or unparsable file is a startup error.

use std::path::Path;
use std::sync::Arc;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::GatewayError;

pub fn build_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, GatewayError> {
    let certs = {
        let bytes = std::fs::read(cert_path).map_err(|e| {
            GatewayError::Tls(format!(
                "failed to read certificate {}: {e}",
                cert_path.display()
            ))
        })?;
        CertificateDer::pem_slice_iter(&bytes)
            .collect::<Result<Vec<_>, rustls_pki_types::pem::Error>>()
            .map_err(|e| GatewayError::Tls(format!("failed to parse certificates: {e}")))?
    };
    if certs.is_empty() {
        return Err(GatewayError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key = {
        let bytes = std::fs::read(key_path).map_err(|e| {
            GatewayError::Tls(format!("failed to read key {}: {e}", key_path.display()))
        })?;
        let mut keys: Vec<PrivateKeyDer<'_>> = PrivateKeyDer::pem_slice_iter(&bytes)
            .collect::<Result<Vec<_>, rustls_pki_types::pem::Error>>()
            .map_err(|e| GatewayError::Tls(format!("failed to parse private key: {e}")))?;
        let Some(k) = keys.pop() else {
            return Err(GatewayError::NoPrivateKey);
        };
        k
    };

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut server = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| GatewayError::Tls(format!("unsupported protocol versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Tls(format!("failed to build TLS config: {e}")))?;
    server.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let rcgen::CertifiedKey { cert, signing_key } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, signing_key.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn builds_from_pem_files() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = write_pair(dir.path());
        assert!(build_acceptor(&cert, &key).is_ok());
    }

    #[test]
    fn missing_certificate_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (_, key) = write_pair(dir.path());
        let Err(err) = build_acceptor(&dir.path().join("nope.pem"), &key) else {
            panic!("missing certificate accepted");
        };
        assert!(matches!(err, GatewayError::Tls(msg) if msg.contains("nope.pem")));
    }

    #[test]
    fn key_file_without_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = write_pair(dir.path());
        let Err(err) = build_acceptor(&cert, &cert) else {
            panic!("certificate accepted as key");
        };
        assert!(matches!(err, GatewayError::NoPrivateKey));
    }

    #[test]
    fn garbage_certificate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_, key) = write_pair(dir.path());
        let bogus = dir.path().join("bogus.pem");
        std::fs::write(&bogus, "not a certificate").unwrap();
        assert!(matches!(
            build_acceptor(&bogus, &key),
            Err(GatewayError::Tls(_))
        ));
    }
}
