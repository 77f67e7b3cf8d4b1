//! TLS material for exporter transports.
//!
//! Certificates are read and parsed as X.509 when the configuration is
//! built, so a missing, unreadable or malformed file is reported with every
//! other mistake instead of on the first export.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rustls_pki_types::pem::PemObject;
use rustls::RootCertStore;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

use crate::error::ConfigError;

/// PEM material read from the configured files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    ca: Option<Vec<u8>>,
    identity: Option<ClientIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ClientIdentity {
    certificate: Vec<u8>,
    key: Vec<u8>,
}

impl TlsMaterial {
    /// Reads and validates the configured files.
    ///
    /// Returns `Ok(None)` when no path is set.
    ///
    /// # Errors
    ///
    /// [`ConfigError::CertificateAuthority`] for an unreadable or empty CA
    /// bundle, [`ConfigError::ClientCertificate`] for an unreadable client
    /// pair or when only one half of the pair is set.
    pub fn load(
        certificate: Option<&str>,
        client_certificate: Option<&str>,
        client_key: Option<&str>,
    ) -> Result<Option<Self>, ConfigError> {
        if certificate.is_none() && client_certificate.is_none() && client_key.is_none() {
            return Ok(None);
        }

        let ca = certificate.map(|path| read_ca(Path::new(path))).transpose()?;

        let identity = match (client_certificate, client_key) {
            (None, None) => None,
            (Some(certificate), Some(key)) => Some(read_identity(
                Path::new(certificate),
                Path::new(key),
            )?),
            _ => {
                return Err(ConfigError::ClientCertificate {
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "client_certificate and client_key must be set together",
                    ),
                })
            }
        };

        Ok(Some(Self { ca, identity }))
    }

    /// Returns `true` when a client identity is present.
    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// gRPC TLS settings. Without a CA bundle the platform roots are used.
    pub fn tonic_config(&self, domain: Option<&str>) -> ClientTlsConfig {
        let mut config = ClientTlsConfig::new();
        config = match &self.ca {
            Some(ca) => config.ca_certificate(Certificate::from_pem(ca)),
            None => config.with_enabled_roots(),
        };
        if let Some(identity) = &self.identity {
            config = config.identity(Identity::from_pem(&identity.certificate, &identity.key));
        }
        if let Some(domain) = domain {
            config = config.domain_name(domain);
        }
        config
    }

    /// HTTP client trusting the CA bundle and presenting the client identity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Exporter`] when the client cannot be built.
    pub fn http_client(&self, timeout: Option<Duration>) -> Result<reqwest::Client, ConfigError> {
        let mut builder = reqwest::Client::builder().use_rustls_tls();

        if let Some(ca) = &self.ca {
            let certificates = reqwest::Certificate::from_pem_bundle(ca)
                .map_err(|e| ConfigError::exporter("http client", e))?;
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }
        if let Some(identity) = &self.identity {
            let pem = [identity.certificate.as_slice(), identity.key.as_slice()].concat();
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ConfigError::exporter("http client", e))?;
            builder = builder.identity(identity);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        builder
            .build()
            .map_err(|e| ConfigError::exporter("http client", e))
    }
}

fn read_ca(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let ca_error = |reason: String| ConfigError::CertificateAuthority {
        path: PathBuf::from(path),
        reason,
    };

    let pem = fs::read(path).map_err(|e| ca_error(e.to_string()))?;
    match parse_certificates(&pem) {
        Ok(0) => Err(ca_error("no certificates found".to_string())),
        Ok(_) => Ok(pem),
        Err(reason) => Err(ca_error(reason)),
    }
}

/// Parses every certificate in `pem` as X.509 and returns how many there are.
fn parse_certificates(pem: &[u8]) -> Result<usize, String> {
    let certificates = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    let count = certificates.len();

    let mut store = RootCertStore::empty();
    for certificate in certificates {
        store
            .add(certificate)
            .map_err(|e| format!("invalid certificate: {e}"))?;
    }
    Ok(count)
}

fn read_identity(certificate: &Path, key: &Path) -> Result<ClientIdentity, ConfigError> {
    let wrap = |source: io::Error| ConfigError::ClientCertificate { source };
    let invalid = |message: String| wrap(io::Error::new(io::ErrorKind::InvalidData, message));

    let certificate_pem = fs::read(certificate).map_err(wrap)?;
    let key_pem = fs::read(key).map_err(wrap)?;

    if parse_certificates(&certificate_pem).map_err(invalid)? == 0 {
        return Err(invalid(
            "tls: failed to find any PEM data in certificate input".to_string(),
        ));
    }
    PrivateKeyDer::from_pem_slice(&key_pem)
        .map_err(|e| invalid(format!("tls: failed to find any PEM data in key input: {e}")))?;

    Ok(ClientIdentity {
        certificate: certificate_pem,
        key: key_pem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Armor and base64 are fine, the DER inside is not a certificate.
    const TRUNCATED_CERTIFICATE_PEM: &str = "-----BEGIN CERTIFICATE-----\n\
        MIIBszCCAVmgAwIBAgIUZm9vYmFyYmF6cXV4cXV1eGNvcmdlMAoGCCqGSM49BAMC\n\
        -----END CERTIFICATE-----\n";

    /// A self-signed certificate and its key, both PEM.
    fn self_signed() -> (String, String) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    fn pem_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn path(file: &tempfile::NamedTempFile) -> &str {
        file.path().to_str().unwrap()
    }

    #[test]
    fn test_no_paths() {
        assert_eq!(TlsMaterial::load(None, None, None).unwrap(), None);
    }

    #[test]
    fn test_ca_only() {
        let (certificate, _) = self_signed();
        let ca = pem_file(&certificate);
        let material = TlsMaterial::load(Some(path(&ca)), None, None).unwrap().unwrap();
        assert!(!material.has_identity());
    }

    #[test]
    fn test_missing_ca_file() {
        let err = TlsMaterial::load(Some("/nonexistent/ca.pem"), None, None).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("could not create certificate authority chain from certificate"));
    }

    #[test]
    fn test_ca_without_pem_data() {
        let ca = pem_file("not a certificate");
        let err = TlsMaterial::load(Some(path(&ca)), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::CertificateAuthority { .. }));
    }

    #[test]
    fn test_ca_with_malformed_der() {
        let ca = pem_file(TRUNCATED_CERTIFICATE_PEM);
        let err = TlsMaterial::load(Some(path(&ca)), None, None).unwrap_err();
        let ConfigError::CertificateAuthority { reason, .. } = err else {
            panic!("expected certificate authority error");
        };
        assert!(reason.starts_with("invalid certificate"));
    }

    #[test]
    fn test_client_pair() {
        let (certificate, key) = self_signed();
        let cert = pem_file(&certificate);
        let key = pem_file(&key);
        let material = TlsMaterial::load(None, Some(path(&cert)), Some(path(&key)))
            .unwrap()
            .unwrap();
        assert!(material.has_identity());
    }

    #[test]
    fn test_client_certificate_without_pem_data() {
        let (_, key) = self_signed();
        let cert = pem_file("garbage");
        let key = pem_file(&key);
        let err = TlsMaterial::load(None, Some(path(&cert)), Some(path(&key))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not use client certificate: tls: failed to find any PEM data in certificate input"
        );
    }

    #[test]
    fn test_unreadable_client_key_wraps_io_error() {
        let (certificate, _) = self_signed();
        let cert = pem_file(&certificate);
        let err = TlsMaterial::load(None, Some(path(&cert)), Some("/nonexistent/key.pem"))
            .unwrap_err();
        let ConfigError::ClientCertificate { source } = err else {
            panic!("expected client certificate error");
        };
        assert_eq!(source.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_half_a_pair() {
        let (certificate, _) = self_signed();
        let cert = pem_file(&certificate);
        let err = TlsMaterial::load(None, Some(path(&cert)), None).unwrap_err();
        assert!(matches!(err, ConfigError::ClientCertificate { .. }));
    }
}
