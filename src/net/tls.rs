//! TLS identity for the WebTransport endpoint.
//!
//! Production loads PEM files named by `TLS_CERT_PATH`/`TLS_KEY_PATH`;
//! development falls back to a fresh self-signed certificate. The SPKI
//! hash is logged so browsers can be pointed at the dev cert.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest::{digest, SHA256};
use tracing::info;
use wtransport::Identity;

pub struct TlsConfig {
    pub identity: Identity,
    /// Base64 SHA-256 of the leaf certificate DER
    pub cert_hash: String,
}

impl TlsConfig {
    /// Load from the configured PEM paths, or generate a self-signed
    /// identity when none are set
    pub async fn load(cert_path: Option<&str>, key_path: Option<&str>) -> Result<Self> {
        let identity = match (cert_path, key_path) {
            (Some(cert), Some(key)) => {
                info!("loading TLS identity from {cert}");
                Identity::load_pemfiles(cert, key)
                    .await
                    .context("failed to load TLS PEM files")?
            }
            _ => {
                info!("no TLS paths configured, generating self-signed identity");
                Self::self_signed()?
            }
        };

        let cert_hash = Self::compute_cert_hash(&identity);
        info!("certificate hash: {cert_hash}");
        info!("chrome flag: --ignore-certificate-errors-spki-list={cert_hash}");

        Ok(Self {
            identity,
            cert_hash,
        })
    }

    fn self_signed() -> Result<Identity> {
        let params = rcgen::CertificateParams::new(vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
        ])
        .context("certificate params rejected")?;
        let key_pair = rcgen::KeyPair::generate().context("key generation failed")?;
        let cert = params
            .self_signed(&key_pair)
            .context("self-signing failed")?;

        let wt_cert = wtransport::tls::Certificate::from_der(cert.der().to_vec())
            .context("generated certificate rejected")?;
        let chain = wtransport::tls::CertificateChain::single(wt_cert);
        let key = wtransport::tls::PrivateKey::from_der_pkcs8(key_pair.serialize_der());
        Ok(Identity::new(chain, key))
    }

    fn compute_cert_hash(identity: &Identity) -> String {
        identity
            .certificate_chain()
            .as_slice()
            .first()
            .map(|cert| {
                let hash = digest(&SHA256, cert.der());
                STANDARD.encode(hash.as_ref())
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_self_signed_identity() {
        let config = TlsConfig::load(None, None).await.unwrap();
        assert!(!config.cert_hash.is_empty());
        // SHA-256 encodes to 44 base64 chars
        assert_eq!(config.cert_hash.len(), 44);
    }

    #[tokio::test]
    async fn test_cert_hash_is_base64_sha256() {
        let config = TlsConfig::load(None, None).await.unwrap();
        let decoded = STANDARD.decode(&config.cert_hash).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[tokio::test]
    async fn test_missing_pem_paths_error() {
        let result = TlsConfig::load(Some("/nonexistent/cert.pem"), Some("/nonexistent/key.pem")).await;
        assert!(result.is_err());
    }
}
