//! Conversion error types
//!
//! Every failure is returned as a value. Stream operations hand the caller's
//! input back alongside the error so nothing is lost on failure.

use crate::pipeline::ConvertedImage;
use crate::tee::Replay;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    /// No known program can produce this output format at all.
    #[error("Output format not supported by any known converter: {0}")]
    UnsupportedFormat(String),

    #[error("Input is not an image (detected {0})")]
    UnsupportedMedia(String),

    #[error("Invalid resolution {width}x{height}; must either be -1x-1 (native resolution) or above 0")]
    InvalidDimensions { width: i64, height: i64 },

    #[error("Failed to get size information from vector image: {0}")]
    MetricsUnavailable(String),

    #[error("Failed to find a suitable image conversion program on this machine to convert {from} to {to}")]
    NoSuitableTool { from: String, to: String },

    #[error("Failed to launch {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The program exited non-zero or complained on stderr. `diagnostics`
    /// is the program's own text, verbatim.
    #[error("{diagnostics}")]
    Subprocess {
        program: PathBuf,
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("{} did not finish within {after:?} and was killed", .program.display())]
    Timeout { program: PathBuf, after: Duration },

    #[error("IO error on {}: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub(crate) fn subprocess(program: PathBuf, status: ExitStatus, stderr: &str) -> Self {
        let diagnostics = if stderr.trim().is_empty() {
            format!("{} exited with {}", program.display(), status)
        } else {
            stderr.to_string()
        };
        ConvertError::Subprocess {
            program,
            exit_code: status.code(),
            diagnostics,
        }
    }

    pub(crate) fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::FileIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// A failed stream conversion.
///
/// `input` replays the caller's bytes from the first byte on. The only
/// exception is a run with input retention disabled, where bytes already
/// written to the external program cannot be recovered.
pub struct ConvertFailure<R> {
    pub error: ConvertError,
    pub input: Replay<R>,
    /// Whatever the program wrote to stdout before failing.
    pub output: Option<ConvertedImage>,
}

impl<R> ConvertFailure<R> {
    pub(crate) fn new(error: ConvertError, input: Replay<R>) -> Self {
        Self {
            error,
            input,
            output: None,
        }
    }

    pub fn into_error(self) -> ConvertError {
        self.error
    }

    pub fn into_input(self) -> Replay<R> {
        self.input
    }
}

impl<R> fmt::Debug for ConvertFailure<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertFailure")
            .field("error", &self.error)
            .field("partial_output", &self.output.as_ref().map(|o| o.len()))
            .finish_non_exhaustive()
    }
}

impl<R> fmt::Display for ConvertFailure<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

pub type ConvertResult<R> = std::result::Result<ConvertedImage, ConvertFailure<R>>;
