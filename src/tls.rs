use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::config;

/// Build a TLS acceptor from the configured PEM files, or `None` when TLS is off.
pub fn acceptor_from_config(cfg: &config::ServerConfig) -> io::Result<Option<TlsAcceptor>> {
    match (&cfg.tls_cert, &cfg.tls_key) {
        (Some(cert), Some(key)) => load_acceptor(Path::new(cert), Path::new(key)).map(Some),
        (None, None) => Ok(None),
        _ => Err(io::Error::new(
            ErrorKind::InvalidInput,
            "TLS needs both a certificate and a key",
        )),
    }
}

fn load_acceptor(cert_path: &Path, key_path: &Path) -> io::Result<TlsAcceptor> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates in {}", cert_path.display()),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidInput,
                format!("no private key in {}", key_path.display()),
            )
        })?;

    let mut tls = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    tls.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(tls)))
}
