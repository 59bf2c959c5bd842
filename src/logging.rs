//! Tracing subscriber setup for the binary.

use std::io;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Stream log output is written to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogStream {
    /// Standard output. The runner only shows `cleanup` output from here.
    Stdout,
    /// Standard error.
    #[default]
    Stderr,
}

/// Subscriber options.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LogSettings {
    /// Emits debug-level events when set.
    pub debug: bool,
    /// Destination stream.
    pub stream: LogStream,
}

impl LogSettings {
    /// Returns the most verbose level emitted.
    #[must_use]
    pub const fn max_level(self) -> Level {
        if self.debug { Level::DEBUG } else { Level::INFO }
    }

    fn writer(self) -> BoxMakeWriter {
        match self.stream {
            LogStream::Stdout => BoxMakeWriter::new(io::stdout),
            LogStream::Stderr => BoxMakeWriter::new(io::stderr),
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Installs the global `tracing` subscriber.
///
/// # Errors
///
/// Returns [`LoggingError::Install`] when a subscriber is already set.
pub fn init(settings: LogSettings) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_max_level(settings.max_level())
        .with_target(false)
        .with_ansi(false)
        .with_writer(settings.writer())
        .try_init()
        .map_err(|err| LoggingError::Install(err.to_string()))
}
