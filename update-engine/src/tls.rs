//! Certificate files kept per host in the instance directory.

use std::{fs, io::BufReader, path::Path};

use base64::Engine as _;
use sha2::{Digest as _, Sha256};
use tracing::info;

use crate::{Error, instance::write_private};

/// Encodes one DER certificate as PEM.
pub fn pem_encode(der: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    // `encoded` is pure ASCII, so byte chunks are char boundaries.
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Reads the first certificate of a PEM file as DER.
pub fn read_certificate(path: &Path) -> Result<Vec<u8>, Error> {
    let file = fs::File::open(path)
        .map_err(|e| Error::io(format!("failed opening `{}`", path.display()), e))?;
    let mut reader = BufReader::new(file);
    match rustls_pemfile::certs(&mut reader).next() {
        Some(Ok(der)) => Ok(der.as_ref().to_vec()),
        Some(Err(e)) => Err(Error::io(
            format!("failed parsing `{}`", path.display()),
            e,
        )),
        None => Err(Error::Certificate(format!(
            "`{}` contains no certificate",
            path.display()
        ))),
    }
}

/// Lowercase hex SHA-256 of a DER certificate.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Stores a certificate observed on first use.
pub fn record_certificate(path: &Path, der: &[u8]) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("failed creating `{}`", parent.display()), e))?;
    }
    fs::write(path, pem_encode(der))
        .map_err(|e| Error::io(format!("failed writing `{}`", path.display()), e))?;
    info!(
        path = %path.display(),
        fingerprint = %fingerprint(der),
        "recorded device certificate"
    );
    Ok(())
}

/// Generates a self-signed certificate for `host` and writes it with its key.
/// The key is private to the owner. Returns the certificate fingerprint.
pub fn generate_self_signed(
    host: &str,
    cert_path: &Path,
    key_path: &Path,
) -> Result<String, Error> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![host.to_owned()])
            .map_err(|e| Error::Certificate(e.to_string()))?;
    write_private(key_path, key_pair.serialize_pem().as_bytes())
        .map_err(|e| Error::io(format!("failed writing `{}`", key_path.display()), e))?;
    if let Some(parent) = cert_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("failed creating `{}`", parent.display()), e))?;
    }
    fs::write(cert_path, cert.pem())
        .map_err(|e| Error::io(format!("failed writing `{}`", cert_path.display()), e))?;
    let fingerprint = fingerprint(cert.der());
    info!(host, %fingerprint, "generated self-signed certificate");
    Ok(fingerprint)
}
