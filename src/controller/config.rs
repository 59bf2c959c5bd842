//! Settings for the controller HTTP client.

use std::collections::BTreeMap;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use super::ControllerError;

/// Per-request timeout applied when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle connections kept per controller host when none is configured.
pub const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 20;

/// TLS options honoured for `https` controller URLs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TlsSettings {
    /// Additional CA certificate (PEM) trusted on top of the system roots.
    pub ca_cert_path: Option<Utf8PathBuf>,
    /// Disables server certificate verification.
    pub skip_verify: bool,
    /// Client certificate (PEM) presented for mutual TLS.
    pub client_cert_path: Option<Utf8PathBuf>,
    /// Private key (PEM) matching `client_cert_path`.
    pub client_key_path: Option<Utf8PathBuf>,
}

impl TlsSettings {
    /// Returns the client certificate and key paths when both are configured.
    #[must_use]
    pub fn client_key_pair(&self) -> Option<(&Utf8Path, &Utf8Path)> {
        self.client_cert_path
            .as_deref()
            .zip(self.client_key_path.as_deref())
    }
}

/// Connection settings for [`super::ControllerClient`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientSettings {
    /// Controller base URL without a trailing slash.
    pub base_url: String,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
    /// Idle connection cap per host.
    pub max_idle_conns_per_host: usize,
    /// Headers attached to every request.
    pub custom_headers: BTreeMap<String, String>,
    /// TLS options; only consulted for `https` URLs.
    pub tls: TlsSettings,
}

impl ClientSettings {
    /// Creates settings for `base_url` with default timeouts and pooling.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Config`] when the URL is blank or does not
    /// use an `http` scheme.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ControllerError> {
        let raw = base_url.into();
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ControllerError::Config(String::from(
                "controller URL must not be empty",
            )));
        }
        if !trimmed.starts_with("http") {
            return Err(ControllerError::Config(format!(
                "controller URL {trimmed:?} is missing an http prefix"
            )));
        }
        Ok(Self {
            base_url: trimmed.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_idle_conns_per_host: DEFAULT_MAX_IDLE_CONNS_PER_HOST,
            custom_headers: BTreeMap::new(),
            tls: TlsSettings::default(),
        })
    }

    /// Overrides the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Overrides the idle connection cap.
    #[must_use]
    pub const fn with_max_idle_conns_per_host(mut self, max: usize) -> Self {
        self.max_idle_conns_per_host = max;
        self
    }

    /// Sets headers attached to every request.
    #[must_use]
    pub fn with_custom_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.custom_headers = headers;
        self
    }

    /// Sets TLS options.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    /// Returns `true` when the controller is reached over TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.base_url.starts_with("https")
    }
}
