//! Broker transport security
//!
//! Maps the optional SCRAM credentials and TLS trust store onto librdkafka
//! client properties.

use openssl::pkcs12::Pkcs12;
use rdkafka::config::ClientConfig;
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ProjectionError, Result};

pub const SCRAM_MECHANISM: &str = "SCRAM-SHA-512";

/// Security protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProtocol {
    /// Plain text (no security)
    Plaintext,
    /// SSL/TLS
    Ssl,
    /// SASL over SSL
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScramCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Trust material used to validate the broker certificate
#[derive(Debug, Clone)]
pub struct TrustStore {
    pub path: PathBuf,
    pub password: SecretString,
}

impl TrustStore {
    fn is_pkcs12(&self) -> bool {
        matches!(
            self.path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase)
                .as_deref(),
            Some("p12") | Some("pfx")
        )
    }

    /// Decode a PKCS#12 trust store into a PEM bundle of every certificate it holds
    fn pkcs12_to_pem(&self) -> Result<String> {
        let der = read_trust_store(&self.path)?;
        let parsed = Pkcs12::from_der(&der)?.parse2(self.password.expose_secret())?;

        let mut pem = Vec::new();
        if let Some(chain) = parsed.ca {
            for cert in chain.iter() {
                pem.extend(cert.to_pem()?);
            }
        }
        if let Some(cert) = parsed.cert {
            pem.extend(cert.to_pem()?);
        }

        if pem.is_empty() {
            return Err(ProjectionError::Tls(format!(
                "trust store {} contains no certificates",
                self.path.display()
            )));
        }

        String::from_utf8(pem).map_err(|e| ProjectionError::Tls(e.to_string()))
    }
}

fn read_trust_store(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        ProjectionError::Tls(format!("cannot read trust store {}: {}", path.display(), e))
    })
}

/// Kafka security configuration
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub scram: Option<ScramCredentials>,
    pub tls: Option<TrustStore>,
}

impl SecurityConfig {
    pub fn protocol(&self) -> SecurityProtocol {
        match (&self.scram, &self.tls) {
            (Some(_), _) => SecurityProtocol::SaslSsl,
            (None, Some(_)) => SecurityProtocol::Ssl,
            (None, None) => SecurityProtocol::Plaintext,
        }
    }

    /// Write the security properties into a client configuration
    pub fn apply(&self, config: &mut ClientConfig) -> Result<()> {
        let protocol = self.protocol();
        config.set("security.protocol", protocol.as_str());

        if let Some(scram) = &self.scram {
            config
                .set("sasl.mechanism", SCRAM_MECHANISM)
                .set("sasl.username", &scram.username)
                .set("sasl.password", scram.password.expose_secret());
        }

        if let Some(trust_store) = &self.tls {
            if trust_store.is_pkcs12() {
                config.set("ssl.ca.pem", trust_store.pkcs12_to_pem()?);
            } else {
                if !trust_store.path.exists() {
                    return Err(ProjectionError::Tls(format!(
                        "trust store {} does not exist",
                        trust_store.path.display()
                    )));
                }
                config.set("ssl.ca.location", trust_store.path.to_string_lossy());
            }
        }

        debug!(
            protocol = protocol.as_str(),
            sasl = self.scram.is_some(),
            trust_store = ?self.tls.as_ref().map(|t| t.path.display().to_string()),
            "Applied Kafka security configuration"
        );

        Ok(())
    }
}
