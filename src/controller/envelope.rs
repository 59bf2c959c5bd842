//! Controller response envelope.
//!
//! Every endpoint answers with `{status, message, body}` where `body` is
//! endpoint specific. [`decode_body`] is the single routine that turns raw
//! response bytes into the typed payload.

use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};

use super::ControllerError;

/// Status value the controller uses for successful calls.
pub const STATUS_OK: &str = "OK";

/// Response wrapper shared by all controller endpoints.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Envelope<T> {
    /// `OK` on success, anything else on failure.
    pub status: String,
    /// Human readable message, populated on failures.
    #[serde(default)]
    pub message: String,
    /// Endpoint specific payload.
    pub body: Option<T>,
}

impl<T> Envelope<T> {
    /// Returns `true` when the controller reported success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Parses the envelope without interpreting the body.
pub(crate) fn decode_status(bytes: &[u8]) -> Result<Envelope<IgnoredAny>, ControllerError> {
    serde_json::from_slice(bytes).map_err(|err| decode_error(bytes, &err))
}

/// Decodes the typed body of a response the transport already accepted.
///
/// The envelope status is not re-checked: [`super::Transport`] only returns
/// bytes for `200 OK` responses carrying an `OK` envelope.
///
/// # Errors
///
/// Returns [`ControllerError::Decode`] when the bytes are not a valid
/// envelope for `T` or the body is missing.
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ControllerError> {
    let envelope: Envelope<T> =
        serde_json::from_slice(bytes).map_err(|err| decode_error(bytes, &err))?;
    envelope.body.ok_or_else(|| ControllerError::Decode {
        body: String::from_utf8_lossy(bytes).into_owned(),
        message: String::from("response body is missing"),
    })
}

fn decode_error(bytes: &[u8], err: &serde_json::Error) -> ControllerError {
    ControllerError::Decode {
        body: String::from_utf8_lossy(bytes).into_owned(),
        message: err.to_string(),
    }
}
