//! Staging a local directory into a disc image
//!
//! A build runs `Idle → Enumerating → Encoding → Done`, or ends in `Failed`.
//! Events are delivered in order over a channel; the terminal
//! [`BuildEvent::Finished`] is always the last one sent.

mod orchestrator;
mod request;

pub use orchestrator::{run_build, spawn_build, spawn_build_with, BuildHandle};
pub use request::{BuildRequest, FALLBACK_ROOT_FOLDER};

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::disc::ImageError;

/// Errors that end a build
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid build request: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding failed: {0}")]
    Encode(#[from] ImageError),

    #[error("Build completed but produced no output at {}", .0.display())]
    EmptyOutput(PathBuf),

    #[error("Build cancelled")]
    Cancelled,
}

impl From<walkdir::Error> for BuildError {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.into())
    }
}

/// Phase of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Enumerating,
    Encoding,
    Done,
    Failed,
}

impl BuildState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Enumerating | Self::Encoding)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Enumerating => write!(f, "Adding files"),
            Self::Encoding => write!(f, "Writing image"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress after one file registration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildProgress {
    pub files_added: usize,
    pub total_files: usize,
    /// `files_added / total_files * 100`
    pub percent: f64,
}

/// Summary of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub output: PathBuf,
    pub directories: usize,
    pub files: usize,
    /// Size of the written image
    pub image_bytes: u64,
    /// Links left out of the image: loops and dangling targets
    pub skipped: Vec<PathBuf>,
}

/// Ordered notifications from a running build
#[derive(Debug)]
pub enum BuildEvent {
    /// Entered a new phase; `Encoding` has no measurable progress
    StateChanged(BuildState),
    Progress(BuildProgress),
    /// Terminal notification, always last
    Finished(Result<BuildReport, BuildError>),
}

/// Cooperative cancellation flag shared with a running build
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), BuildError> {
        if self.is_cancelled() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }
}
