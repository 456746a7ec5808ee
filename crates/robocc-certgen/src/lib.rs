//! TLS certificate generation for robocc.
//!
//! Agents and control centers each present a self-signed certificate on
//! their QUIC endpoint. The SHA-256 fingerprint is printed so operators can
//! tell endpoints apart in logs.

pub mod error;

use std::path::{Path, PathBuf};

pub use error::CertgenError;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};

/// File name of the PEM certificate inside a key directory.
pub const CERT_FILE: &str = "robocc.crt";

/// File name of the PEM private key inside a key directory.
pub const KEY_FILE: &str = "robocc.key";

/// A generated certificate and private key pair.
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
    /// SHA-256 fingerprint of the DER-encoded certificate.
    pub fingerprint: String,
}

impl GeneratedCert {
    /// Write the certificate and key into `dir` as [`CERT_FILE`] and [`KEY_FILE`].
    pub fn write_to(&self, dir: &Path) -> Result<(PathBuf, PathBuf), CertgenError> {
        std::fs::create_dir_all(dir)?;
        let cert_path = dir.join(CERT_FILE);
        let key_path = dir.join(KEY_FILE);
        std::fs::write(&cert_path, &self.cert_pem)?;
        std::fs::write(&key_path, &self.key_pem)?;
        Ok((cert_path, key_path))
    }
}

/// Generate a new self-signed certificate for a robocc endpoint.
///
/// The certificate is valid for the given hostname and includes
/// `localhost` and `127.0.0.1` as subject alternative names.
pub fn generate_certificate(hostname: &str) -> Result<GeneratedCert, CertgenError> {
    let key_pair = KeyPair::generate().map_err(|e| CertgenError::Generation(e.to_string()))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, hostname);
    dn.push(DnType::OrganizationName, "robocc");
    params.distinguished_name = dn;

    params.subject_alt_names = vec![
        dns_name(hostname)?,
        dns_name("localhost")?,
        SanType::IpAddress(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)),
    ];

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertgenError::Generation(e.to_string()))?;

    Ok(GeneratedCert {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        fingerprint: sha256_fingerprint(cert.der()),
    })
}

fn dns_name(name: &str) -> Result<SanType, CertgenError> {
    Ok(SanType::DnsName(name.try_into().map_err(
        |e: rcgen::Error| CertgenError::Generation(e.to_string()),
    )?))
}

/// Compute SHA-256 fingerprint of DER-encoded certificate bytes.
fn sha256_fingerprint(der: &[u8]) -> String {
    use std::fmt::Write;
    let digest = ring::digest::digest(&ring::digest::SHA256, der);
    let mut fingerprint = String::from("SHA256:");
    for (i, byte) in digest.as_ref().iter().enumerate() {
        if i > 0 {
            fingerprint.push(':');
        }
        let _ = write!(fingerprint, "{byte:02x}");
    }
    fingerprint
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_cert_succeeds() {
        let cert = generate_certificate("rover").unwrap();
        assert!(cert.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(cert.key_pem.contains("BEGIN PRIVATE KEY"));
        assert!(cert.fingerprint.starts_with("SHA256:"));
    }

    #[test]
    fn fingerprint_has_32_bytes() {
        let cert = generate_certificate("rover").unwrap();
        let hex = cert.fingerprint.trim_start_matches("SHA256:");
        assert_eq!(hex.split(':').count(), 32);
    }

    #[test]
    fn generate_cert_different_each_time() {
        let a = generate_certificate("agent-a").unwrap();
        let b = generate_certificate("agent-b").unwrap();
        assert_ne!(a.key_pem, b.key_pem);
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn write_to_creates_both_files() {
        let dir = std::env::temp_dir().join(format!("robocc-certgen-{}", std::process::id()));
        let cert = generate_certificate("rover").unwrap();

        let (cert_path, key_path) = cert.write_to(&dir).unwrap();
        assert_eq!(std::fs::read_to_string(&cert_path).unwrap(), cert.cert_pem);
        assert_eq!(std::fs::read_to_string(&key_path).unwrap(), cert.key_pem);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
