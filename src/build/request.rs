//! What to build and where

use std::path::{Path, PathBuf};

use super::BuildError;
use crate::config::BuildConfig;
use crate::disc::EncoderOptions;

/// Folder name used when the source directory has no final component
pub const FALLBACK_ROOT_FOLDER: &str = "ROOT";

/// A request to stage a local directory into `<destination>/<name>.iso`
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Output name as typed; may be blank until the build is committed
    pub output_name: String,
    /// Substituted for a blank `output_name`
    pub fallback_name: String,
    pub use_joliet: bool,
    pub wrap_in_source_folder: bool,
}

impl BuildRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, output_name: impl Into<String>) -> Self {
        Self::with_config(source, destination, output_name, &BuildConfig::default())
    }

    pub fn with_config(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        output_name: impl Into<String>,
        config: &BuildConfig,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            output_name: output_name.into(),
            fallback_name: config.default_output_name.clone(),
            use_joliet: config.use_joliet,
            wrap_in_source_folder: config.wrap_in_source_folder,
        }
    }

    /// Output name after trimming, blank falling back to the default and a
    /// typed `.iso` extension removed
    pub fn effective_name(&self) -> String {
        let trimmed = self.output_name.trim();
        let stem = match trimmed.len().checked_sub(4) {
            Some(cut) if trimmed.is_char_boundary(cut) && trimmed[cut..].eq_ignore_ascii_case(".iso") => {
                trimmed[..cut].trim_end()
            }
            _ => trimmed,
        };

        if stem.is_empty() {
            self.fallback_name.clone()
        } else {
            stem.to_string()
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.destination.join(format!("{}.iso", self.effective_name()))
    }

    /// Top-level folder the source tree is placed under, if wrapping
    pub fn root_folder(&self) -> Option<String> {
        if !self.wrap_in_source_folder {
            return None;
        }
        Some(source_folder_name(&self.source))
    }

    pub fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            use_joliet: self.use_joliet,
            volume_label: self.effective_name(),
        }
    }

    /// Check preconditions before anything is written
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.source.as_os_str().is_empty() {
            return Err(BuildError::Validation("no source folder selected".to_string()));
        }
        if !self.source.is_dir() {
            return Err(BuildError::Validation(format!(
                "source folder does not exist: {}",
                self.source.display()
            )));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(BuildError::Validation("no destination folder selected".to_string()));
        }
        if !self.destination.is_dir() {
            return Err(BuildError::Validation(format!(
                "destination folder does not exist: {}",
                self.destination.display()
            )));
        }

        let name = self.effective_name();
        if name.contains(['/', '\\']) {
            return Err(BuildError::Validation(format!("invalid output name: {}", name)));
        }
        Ok(())
    }
}

fn source_folder_name(source: &Path) -> String {
    source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| FALLBACK_ROOT_FOLDER.to_string())
}
