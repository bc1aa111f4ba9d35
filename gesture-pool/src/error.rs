//! Error types shared across the recognizer pool.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A definition source could not be opened or parsed.  Always fatal: no
/// partial catalog is ever handed to a recognizer.
#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("cannot open definition source {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed definition source {name}: {reason}")]
    Parse { name: String, reason: String },
}

/// A constructor was handed something it cannot work with.
#[derive(Debug, Error)]
#[error("invalid argument `{name}`: {reason}")]
pub struct InvalidArgument {
    pub name: &'static str,
    pub reason: String,
}

impl InvalidArgument {
    pub fn new(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            reason: reason.into(),
        }
    }
}

/// Errors raised by a sensor while opening per-slot gesture sources.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor is not available")]
    Unavailable,
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
}

/// A gesture frame that could not be acquired.  Recoverable: the frame is
/// skipped and the previous result state stays in place.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("gesture frame could not be acquired")]
    Unavailable,
    #[error("gesture frame carried no discrete results")]
    MissingResults,
}

/// Errors from building or driving a [`crate::pool::RecognizerPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error("failed to start worker for slot {slot}: {reason}")]
    Worker { slot: usize, reason: String },
}

/// Errors from reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Errors from loading or running a replay script.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("cannot read replay script {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("replay script step {step}: {reason}")]
    Parse { step: usize, reason: String },
    #[error("event loop failure: {0}")]
    EventLoop(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
}
