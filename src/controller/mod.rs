//! Transport client for the VM controller REST API.
//!
//! [`Transport`] is the seam the rest of the crate talks to: raw `GET`,
//! `POST` and `DELETE` calls that return the validated response bytes.
//! [`ControllerClient`] implements it over `reqwest`, handling TLS, custom
//! headers, request timeouts, the response envelope, and a single silent
//! retry when the controller drops the connection mid-body.

mod config;
mod envelope;
mod error;
mod tls;

use std::error::Error as _;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use config::{
    ClientSettings, DEFAULT_MAX_IDLE_CONNS_PER_HOST, DEFAULT_REQUEST_TIMEOUT, TlsSettings,
};
pub use envelope::{Envelope, STATUS_OK, decode_body};
pub use error::ControllerError;

/// Delay before a request is replayed after the connection closed early.
pub const EOF_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Future returned by transport operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ControllerError>> + Send + 'a>>;

/// Raw access to controller endpoints.
///
/// Implementations return the response bytes only when the HTTP status is
/// 200 and the envelope status is `OK`; every call observes `cancel`.
pub trait Transport: Send + Sync {
    /// Issues a `GET` request with the given query parameters.
    fn get<'a>(
        &'a self,
        path: &'a str,
        query: &'a [(&'a str, &'a str)],
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<u8>>;

    /// Issues a `POST` request with a JSON payload.
    fn post<'a>(
        &'a self,
        path: &'a str,
        payload: &'a Value,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<u8>>;

    /// Issues a `DELETE` request with a JSON payload.
    fn delete<'a>(
        &'a self,
        path: &'a str,
        payload: &'a Value,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<u8>>;
}

/// `reqwest` backed [`Transport`].
#[derive(Clone, Debug)]
pub struct ControllerClient {
    http: reqwest::Client,
    base_url: String,
}

struct Outbound<'a> {
    method: Method,
    path: &'a str,
    query: &'a [(&'a str, &'a str)],
    payload: Option<&'a Value>,
}

impl ControllerClient {
    /// Builds a client from `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Tls`] when TLS material cannot be loaded and
    /// [`ControllerError::Config`] when a custom header is invalid or the
    /// underlying client cannot be built.
    pub fn new(settings: &ClientSettings) -> Result<Self, ControllerError> {
        let mut builder = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .pool_max_idle_per_host(settings.max_idle_conns_per_host)
            .default_headers(header_map(settings)?);
        if settings.is_tls() {
            builder = tls::configure(builder, &settings.tls)?;
        }
        let http = builder
            .build()
            .map_err(|err| ControllerError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
        })
    }

    /// Returns the controller base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn dispatch(
        &self,
        outbound: Outbound<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ControllerError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ControllerError::Cancelled),
            result = self.send(&outbound) => result,
        }
    }

    async fn send(&self, outbound: &Outbound<'_>) -> Result<Vec<u8>, ControllerError> {
        let url = format!("{}{}", self.base_url, outbound.path);
        let body = outbound
            .payload
            .map(|payload| {
                serde_json::to_vec(payload).map_err(|err| ControllerError::Encode {
                    method: outbound.method.to_string(),
                    url: url.clone(),
                    payload: payload.to_string(),
                    message: err.to_string(),
                })
            })
            .transpose()?;

        let outcome = match self.execute(outbound, &url, body.as_deref()).await {
            Err(err) if is_unexpected_eof(&err) => {
                debug!(
                    method = %outbound.method,
                    url = %url,
                    error = %err,
                    "connection closed before the response completed; retrying once"
                );
                tokio::time::sleep(EOF_RETRY_DELAY).await;
                self.execute(outbound, &url, body.as_deref()).await
            }
            other => other,
        };
        let (status, bytes) = outcome.map_err(|err| request_error(&outbound.method, &url, &err))?;

        debug!(
            method = %outbound.method,
            path = outbound.path,
            payload = ?outbound.payload,
            status = status.as_u16(),
            body = %String::from_utf8_lossy(&bytes),
            "controller request completed"
        );
        validate(status, &bytes)?;
        Ok(bytes)
    }

    async fn execute(
        &self,
        outbound: &Outbound<'_>,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<(StatusCode, Vec<u8>), reqwest::Error> {
        let mut request = self.http.request(outbound.method.clone(), url);
        if !outbound.query.is_empty() {
            request = request.query(outbound.query);
        }
        if let Some(bytes) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(bytes.to_vec());
        }
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        Ok((status, bytes.to_vec()))
    }
}

impl Transport for ControllerClient {
    fn get<'a>(
        &'a self,
        path: &'a str,
        query: &'a [(&'a str, &'a str)],
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<u8>> {
        Box::pin(self.dispatch(
            Outbound {
                method: Method::GET,
                path,
                query,
                payload: None,
            },
            cancel,
        ))
    }

    fn post<'a>(
        &'a self,
        path: &'a str,
        payload: &'a Value,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<u8>> {
        Box::pin(self.dispatch(
            Outbound {
                method: Method::POST,
                path,
                query: &[],
                payload: Some(payload),
            },
            cancel,
        ))
    }

    fn delete<'a>(
        &'a self,
        path: &'a str,
        payload: &'a Value,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<u8>> {
        Box::pin(self.dispatch(
            Outbound {
                method: Method::DELETE,
                path,
                query: &[],
                payload: Some(payload),
            },
            cancel,
        ))
    }
}

fn header_map(settings: &ClientSettings) -> Result<HeaderMap, ControllerError> {
    let mut headers = HeaderMap::with_capacity(settings.custom_headers.len());
    for (name, value) in &settings.custom_headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
            ControllerError::Config(format!("invalid custom header name {name:?}: {err}"))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|err| {
            ControllerError::Config(format!("invalid value for custom header {name:?}: {err}"))
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

fn validate(status: StatusCode, bytes: &[u8]) -> Result<(), ControllerError> {
    let envelope = envelope::decode_status(bytes)
        .map_err(|err| err.context(format!("status code: {}", status.as_u16())))?;
    if status != StatusCode::OK || !envelope.is_ok() {
        return Err(ControllerError::Status {
            status_code: status.as_u16(),
            message: envelope.message,
        });
    }
    Ok(())
}

fn request_error(method: &Method, url: &str, err: &reqwest::Error) -> ControllerError {
    if err.is_timeout() {
        return ControllerError::Timeout {
            method: method.to_string(),
            url: url.to_owned(),
            message: error_chain(err),
        };
    }
    ControllerError::Request {
        method: method.to_string(),
        url: url.to_owned(),
        message: error_chain(err),
    }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn is_unexpected_eof(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return false;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        let eof = cause
            .downcast_ref::<io::Error>()
            .is_some_and(|io_err| io_err.kind() == io::ErrorKind::UnexpectedEof);
        if eof {
            return true;
        }
        source = cause.source();
    }
    false
}
