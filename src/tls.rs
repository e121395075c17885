//! Mutual TLS between the queue and its resource agents.
//!
//! Both sides load a PEM identity plus the fleet CA. Agents demand a client
//! certificate signed by that CA; the queue verifies the agent's certificate
//! against the same CA.

use std::path::PathBuf;

use tokio::fs;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::TlsConfig;

/// Name both sides agree on for certificate verification, since resources
/// are dialed by address rather than by a resolvable host name.
pub const FLEET_DOMAIN: &str = "hashfleet";

/// Error type for TLS configuration issues.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("CA certificate path not configured")]
    MissingCaCert,

    #[error("Certificate path not configured")]
    MissingCert,

    #[error("Private key path not configured")]
    MissingKey,

    #[error("CA certificate not found: {0}")]
    CaCertNotFound(PathBuf),

    #[error("Certificate not found: {0}")]
    CertNotFound(PathBuf),

    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("TLS enabled but missing required paths (--ca-cert, --cert, --key)")]
    Incomplete,

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Loaded TLS materials ready for use with tonic.
#[derive(Clone)]
pub struct TlsIdentity {
    identity: Identity,
    ca_cert: Certificate,
}

impl TlsIdentity {
    /// Load TLS materials from file paths specified in the config.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Any required path is not configured
    /// - Any file does not exist or cannot be read
    pub async fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let ca_cert_path = config
            .ca_cert_path
            .as_ref()
            .ok_or(TlsError::MissingCaCert)?;
        let cert_path = config.cert_path.as_ref().ok_or(TlsError::MissingCert)?;
        let key_path = config.key_path.as_ref().ok_or(TlsError::MissingKey)?;

        if !ca_cert_path.exists() {
            return Err(TlsError::CaCertNotFound(ca_cert_path.clone()));
        }
        if !cert_path.exists() {
            return Err(TlsError::CertNotFound(cert_path.clone()));
        }
        if !key_path.exists() {
            return Err(TlsError::KeyNotFound(key_path.clone()));
        }

        let ca_pem = fs::read(ca_cert_path).await?;
        let cert_pem = fs::read(cert_path).await?;
        let key_pem = fs::read(key_path).await?;

        Ok(Self::from_pem(ca_pem, cert_pem, key_pem))
    }

    pub fn from_pem(
        ca_pem: impl AsRef<[u8]>,
        cert_pem: impl AsRef<[u8]>,
        key_pem: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            identity: Identity::from_pem(cert_pem, key_pem),
            ca_cert: Certificate::from_pem(ca_pem),
        }
    }

    /// Resolve the identity a node should run with.
    ///
    /// `Ok(None)` means plaintext: TLS was not requested, or it was requested
    /// but could not be loaded and `allow_insecure` is set.
    pub async fn resolve(config: &TlsConfig) -> Result<Option<Self>, TlsError> {
        if config.is_complete() {
            match Self::load(config).await {
                Ok(identity) => {
                    tracing::info!("TLS enabled with mTLS authentication");
                    Ok(Some(identity))
                }
                Err(e) if config.allow_insecure => {
                    tracing::warn!(
                        error = %e,
                        "TLS certificate loading failed, running in insecure mode"
                    );
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        } else if config.enabled {
            if config.allow_insecure {
                tracing::warn!(
                    "TLS enabled but certificate paths incomplete, running in insecure mode"
                );
                Ok(None)
            } else {
                Err(TlsError::Incomplete)
            }
        } else {
            tracing::warn!(
                "Running without TLS. Job parameters and resource tokens travel in plaintext."
            );
            Ok(None)
        }
    }

    /// Server side of an agent: present our certificate, require and verify
    /// the queue's client certificate against the CA.
    pub fn server_tls_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(self.identity.clone())
            .client_ca_root(self.ca_cert.clone())
    }

    /// Client side of the queue: present our certificate and verify the
    /// agent against the CA.
    pub fn client_tls_config(&self) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .domain_name(FLEET_DOMAIN)
            .ca_certificate(self.ca_cert.clone())
            .identity(self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_paths() {
        let config = TlsConfig {
            enabled: true,
            ca_cert_path: None,
            cert_path: None,
            key_path: None,
            allow_insecure: false,
        };

        let result = TlsIdentity::load(&config).await;
        assert!(matches!(result, Err(TlsError::MissingCaCert)));
    }

    #[tokio::test]
    async fn test_load_nonexistent_files() {
        let config = TlsConfig {
            enabled: true,
            ca_cert_path: Some(PathBuf::from("/nonexistent/ca.crt")),
            cert_path: Some(PathBuf::from("/nonexistent/node.crt")),
            key_path: Some(PathBuf::from("/nonexistent/node.key")),
            allow_insecure: false,
        };

        let result = TlsIdentity::load(&config).await;
        assert!(matches!(result, Err(TlsError::CaCertNotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_disabled_is_plaintext() {
        let resolved = TlsIdentity::resolve(&TlsConfig::default()).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_resolve_incomplete_fails_closed() {
        let config = TlsConfig {
            enabled: true,
            ..Default::default()
        };
        let result = TlsIdentity::resolve(&config).await;
        assert!(matches!(result, Err(TlsError::Incomplete)));
    }

    #[tokio::test]
    async fn test_resolve_insecure_fallback() {
        let config = TlsConfig {
            enabled: true,
            ca_cert_path: Some(PathBuf::from("/nonexistent/ca.crt")),
            cert_path: Some(PathBuf::from("/nonexistent/node.crt")),
            key_path: Some(PathBuf::from("/nonexistent/node.key")),
            allow_insecure: true,
        };
        let resolved = TlsIdentity::resolve(&config).await.unwrap();
        assert!(resolved.is_none());
    }
}
