//! Error taxonomy for controller operations.
//!
//! Errors are either transient (worth retrying the whole CI job), cancelled
//! (the process was asked to stop), or fatal. Callers use
//! [`ControllerError::is_transient`] and [`ControllerError::is_cancelled`]
//! rather than matching variants so wrapped errors keep their class.

use thiserror::Error;

use crate::instance::InstanceState;

/// Errors raised while talking to the VM controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Raised when the client configuration is unusable.
    #[error("invalid controller client configuration: {0}")]
    Config(String),
    /// Raised when TLS material cannot be loaded.
    #[error("failed to configure TLS: {0}")]
    Tls(String),
    /// Raised when a request payload cannot be encoded as JSON.
    #[error("failed to encode {method} {url} payload {payload}: {message}")]
    Encode {
        /// HTTP method of the request.
        method: String,
        /// Fully qualified request URL.
        url: String,
        /// Debug rendering of the payload.
        payload: String,
        /// Serializer error message.
        message: String,
    },
    /// Raised when the request exceeds the client-side timeout.
    #[error("timed out sending {method} request to {url}: {message}")]
    Timeout {
        /// HTTP method of the request.
        method: String,
        /// Fully qualified request URL.
        url: String,
        /// Underlying client error.
        message: String,
    },
    /// Raised when the request cannot be sent or the response cannot be read.
    #[error("failed to send {method} request to {url}: {message}")]
    Request {
        /// HTTP method of the request.
        method: String,
        /// Fully qualified request URL.
        url: String,
        /// Underlying client error.
        message: String,
    },
    /// Raised when the controller answers with a non-OK envelope or a
    /// non-200 HTTP status.
    #[error("status code: {status_code}, error: {message}")]
    Status {
        /// HTTP status returned by the controller.
        status_code: u16,
        /// Message carried in the response envelope.
        message: String,
    },
    /// Raised when the response body does not match the expected structure.
    #[error("failed to decode response body {body:?}: {message}")]
    Decode {
        /// Raw body as returned by the controller.
        body: String,
        /// Deserializer error message.
        message: String,
    },
    /// Raised when `priority` is outside the accepted range.
    #[error("priority must be between 1 and 10000, got {0}")]
    InvalidPriority(i32),
    /// Raised when the controller returns an empty instance list.
    #[error("no instances returned from controller")]
    NoInstances,
    /// Raised when no instance carries the requested external id.
    #[error("instance with external id {external_id} not found")]
    InstanceNotFound {
        /// External id that was looked up.
        external_id: String,
    },
    /// Raised when instances carry the external id but none is usable.
    #[error(
        "instance with external id {external_id} exists but is not in a usable state (found state: {state})"
    )]
    UnusableInstance {
        /// External id that was looked up.
        external_id: String,
        /// State of the first matching instance.
        state: InstanceState,
    },
    /// Raised when the controller knows no node with the given id.
    #[error("node {0} not found")]
    NodeNotFound(String),
    /// Raised when no template carries the given name.
    #[error("template {0:?} not found")]
    TemplateNotFound(String),
    /// Raised when a polled instance leaves the scheduling path.
    #[error("instance {instance_id} is in an unexpected state: {state}")]
    UnexpectedState {
        /// Instance being polled.
        instance_id: String,
        /// State reported by the controller.
        state: InstanceState,
    },
    /// Raised when the process-wide cancellation token fires.
    #[error("operation cancelled")]
    Cancelled,
    /// Raised when a transient failure persists across every retry attempt.
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts performed.
        attempts: u32,
        /// Error returned by the final attempt.
        #[source]
        source: Box<ControllerError>,
    },
    /// Adds operation context to an underlying error.
    #[error("{context}: {source}")]
    Context {
        /// Description of the failed operation.
        context: String,
        /// Underlying error.
        #[source]
        source: Box<ControllerError>,
    },
}

impl ControllerError {
    /// Returns `true` when retrying the operation (or the CI job) may help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::RetriesExhausted { source, .. } | Self::Context { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }

    /// Returns `true` when the error stems from cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::RetriesExhausted { source, .. } | Self::Context { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// Wraps the error with a description of the operation that failed.
    ///
    /// Cancellation is passed through untouched so callers can still match
    /// on it directly.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        if matches!(self, Self::Cancelled) {
            return self;
        }
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn timeout() -> ControllerError {
        ControllerError::Timeout {
            method: String::from("GET"),
            url: String::from("http://controller/api/v1/vm"),
            message: String::from("deadline has elapsed"),
        }
    }

    #[rstest]
    #[case::timeout(timeout(), true)]
    #[case::status(ControllerError::Status { status_code: 500, message: String::from("boom") }, false)]
    #[case::decode(ControllerError::Decode { body: String::new(), message: String::from("eof") }, false)]
    #[case::cancelled(ControllerError::Cancelled, false)]
    #[case::wrapped_timeout(timeout().context("failed to get instance i-1"), true)]
    #[case::exhausted(ControllerError::RetriesExhausted { attempts: 3, source: Box::new(timeout()) }, true)]
    #[case::exhausted_wrapped(
        ControllerError::RetriesExhausted { attempts: 3, source: Box::new(timeout().context("terminate")) },
        true
    )]
    fn transient_classification(#[case] err: ControllerError, #[case] expected: bool) {
        assert_eq!(err.is_transient(), expected, "unexpected class for {err}");
    }

    #[test]
    fn context_keeps_cancellation_bare() {
        let err = ControllerError::Cancelled.context("waiting for instance");
        assert!(matches!(err, ControllerError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[test]
    fn context_message_prefixes_source() {
        let err = ControllerError::NodeNotFound(String::from("n-1")).context("failed to get node n-1");
        assert_eq!(err.to_string(), "failed to get node n-1: node n-1 not found");
        assert!(!err.is_transient());
    }
}
