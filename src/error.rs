use std::fmt;
use std::path::PathBuf;

use err_derive::Error;

use crate::pipeline::RunReport;

/// Pipeline stage a per-frame failure originated from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    Detect,
    Track,
    Render,
    Write,
    Display,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Detect => "detect",
            Stage::Track => "track",
            Stage::Render => "render",
            Stage::Write => "write",
            Stage::Display => "display",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(display = "cannot open input video {:?}: {}", path, reason)]
    Input { path: PathBuf, reason: String },

    #[error(display = "cannot open output video {:?}: {}", path, reason)]
    Output { path: PathBuf, reason: String },

    #[error(display = "invalid configuration: {}", _0)]
    Config(String),

    #[error(display = "detection model error: {}", _0)]
    Model(String),

    #[error(display = "tracker error: {}", _0)]
    Tracker(String),

    #[error(display = "{} stage failed on frame {}: {}", stage, frame, inner)]
    Stage {
        stage: Stage,
        frame: u64,
        inner: Box<Error>,
    },

    #[error(display = "I/O error: {}", _0)]
    Io(std::io::Error),

    #[error(display = "JSON error: {}", _0)]
    Json(serde_json::Error),

    #[cfg(feature = "video")]
    #[error(display = "OpenCV error: {}", _0)]
    OpenCv(opencv::Error),
}

impl Error {
    pub fn at(stage: Stage, frame: u64, inner: Error) -> Self {
        Error::Stage {
            stage,
            frame,
            inner: Box::new(inner),
        }
    }

    /// Stage that failed, if this error came out of the frame loop.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<munkres::Error> for Error {
    fn from(err: munkres::Error) -> Self {
        Self::Tracker(format!("assignment failed: {:?}", err))
    }
}

#[cfg(feature = "video")]
impl From<opencv::Error> for Error {
    fn from(err: opencv::Error) -> Self {
        Self::OpenCv(err)
    }
}

/// A run that stopped on a fatal error after processing part of the stream.
///
/// Capture and writer handles were already released when this is returned;
/// `report` carries everything counted up to the failure.
#[derive(Debug)]
pub struct Aborted {
    pub report: RunReport,
    pub cause: Error,
}

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run aborted after {} frames ({} vehicles counted): {}",
            self.report.frames, self.report.total, self.cause
        )
    }
}

impl std::error::Error for Aborted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
