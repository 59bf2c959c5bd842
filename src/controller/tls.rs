//! TLS configuration for the controller client.
//!
//! The system root store is always trusted; an extra CA, verification bypass
//! and a client key pair for mutual TLS can be layered on top.

use reqwest::{Certificate, ClientBuilder, Identity};
use tracing::{debug, info, warn};

use super::ControllerError;
use super::config::TlsSettings;
use crate::fs;

/// Applies `settings` to `builder`.
pub(super) fn configure(
    builder: ClientBuilder,
    settings: &TlsSettings,
) -> Result<ClientBuilder, ControllerError> {
    debug!("handling TLS configuration");
    let mut configured = builder.use_rustls_tls().tls_built_in_root_certs(true);

    if let Some(path) = &settings.ca_cert_path {
        let pem = fs::read(path).map_err(|err| {
            ControllerError::Tls(format!("failed to read CA cert at {path:?}: {err}"))
        })?;
        let certificate = Certificate::from_pem(&pem).map_err(|err| {
            ControllerError::Tls(format!("failed to add CA cert at {path:?} to pool: {err}"))
        })?;
        configured = configured.add_root_certificate(certificate);
        info!(path = %path, "using CA cert");
    }

    if settings.skip_verify {
        warn!("skipping controller certificate verification");
        configured = configured.danger_accept_invalid_certs(true);
    }

    if let Some((cert_path, key_path)) = settings.client_key_pair() {
        let identity = load_identity(cert_path, key_path)?;
        configured = configured.identity(identity);
        debug!(cert = %cert_path, key = %key_path, "client certificate authentication enabled");
    }

    Ok(configured)
}

fn load_identity(
    cert_path: &camino::Utf8Path,
    key_path: &camino::Utf8Path,
) -> Result<Identity, ControllerError> {
    let key_pair_error = |message: String| {
        ControllerError::Tls(format!(
            "failed to process key pair (cert at {cert_path:?}, key at {key_path:?}): {message}"
        ))
    };
    let mut pem = fs::read(key_path).map_err(|err| key_pair_error(err.to_string()))?;
    pem.push(b'\n');
    pem.extend(fs::read(cert_path).map_err(|err| key_pair_error(err.to_string()))?);
    Identity::from_pem(&pem).map_err(|err| key_pair_error(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn temp_path(tmp: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().join(name))
            .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()))
    }

    #[test]
    fn default_settings_configure_cleanly() {
        let result = configure(reqwest::Client::builder(), &TlsSettings::default());
        assert!(result.is_ok());
    }

    #[test]
    fn missing_ca_cert_is_reported() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let settings = TlsSettings {
            ca_cert_path: Some(temp_path(&tmp, "missing-ca.pem")),
            ..TlsSettings::default()
        };
        let err = configure(reqwest::Client::builder(), &settings)
            .err()
            .unwrap_or_else(|| panic!("missing CA file should fail"));
        assert!(
            matches!(err, ControllerError::Tls(ref message) if message.contains("missing-ca.pem")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn missing_client_key_pair_is_reported() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let settings = TlsSettings {
            client_cert_path: Some(temp_path(&tmp, "client.pem")),
            client_key_path: Some(temp_path(&tmp, "client-key.pem")),
            ..TlsSettings::default()
        };
        let err = configure(reqwest::Client::builder(), &settings)
            .err()
            .unwrap_or_else(|| panic!("missing key pair should fail"));
        assert!(
            matches!(err, ControllerError::Tls(ref message) if message.contains("key pair")),
            "unexpected error: {err}"
        );
    }
}
