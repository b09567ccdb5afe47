//! Build panel: output settings, progress and cancellation

use eframe::egui;
use std::path::Path;
use std::sync::mpsc::TryRecvError;

use crate::build::{spawn_build, BuildError, BuildEvent, BuildHandle, BuildReport, BuildRequest, BuildState};
use crate::config::BuildConfig;

/// Build panel state
pub struct BuildView {
    /// Destination folder as typed
    destination: String,
    /// Output name as typed (blank falls back at build time)
    output_name: String,
    /// Running build, if any
    handle: Option<BuildHandle>,
    state: BuildState,
    /// Fill of the determinate progress bar
    fraction: f32,
    progress_text: String,
}

impl BuildView {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            destination: config.destination().display().to_string(),
            output_name: config.default_output_name.clone(),
            handle: None,
            state: BuildState::Idle,
            fraction: 0.0,
            progress_text: String::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    fn start(&mut self, source: &Path, config: &BuildConfig) {
        let request = BuildRequest::with_config(source, self.destination.trim(), self.output_name.clone(), config);
        log::info!(
            "Building {} from {}",
            request.output_path().display(),
            source.display()
        );

        self.state = BuildState::Idle;
        self.fraction = 0.0;
        self.progress_text.clear();
        self.handle = Some(spawn_build(request));
    }

    /// Drain build events; returns the terminal result once it arrives
    pub fn poll(&mut self) -> Option<Result<BuildReport, BuildError>> {
        let handle = self.handle.as_ref()?;

        loop {
            match handle.events().try_recv() {
                Ok(BuildEvent::StateChanged(state)) => {
                    self.state = state;
                    if state == BuildState::Encoding {
                        self.progress_text = "Writing image...".to_string();
                    }
                }
                Ok(BuildEvent::Progress(progress)) => {
                    self.fraction = (progress.percent / 100.0) as f32;
                    self.progress_text = format!(
                        "Adding files {}/{} ({:.0}%)",
                        progress.files_added, progress.total_files, progress.percent
                    );
                }
                Ok(BuildEvent::Finished(result)) => {
                    self.handle = None;
                    return Some(result);
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    self.handle = None;
                    self.state = BuildState::Failed;
                    return Some(Err(BuildError::Io(std::io::Error::other(
                        "build thread terminated unexpectedly",
                    ))));
                }
            }
        }
    }

    /// Render the panel; `source` is the staged folder, if one is open
    pub fn show(&mut self, ui: &mut egui::Ui, source: Option<&Path>, config: &BuildConfig) {
        ui.horizontal(|ui| {
            ui.label("Destination:");
            ui.add_enabled(
                !self.is_running(),
                egui::TextEdit::singleline(&mut self.destination).desired_width(260.0),
            );
            if ui.add_enabled(!self.is_running(), egui::Button::new("Browse...")).clicked() {
                if let Some(path) = rfd::FileDialog::new().set_directory(&self.destination).pick_folder() {
                    self.destination = path.display().to_string();
                }
            }

            ui.separator();
            ui.label("Name:");
            ui.add_enabled(
                !self.is_running(),
                egui::TextEdit::singleline(&mut self.output_name).desired_width(140.0),
            );
            ui.label(".iso");

            ui.separator();
            let can_build = source.is_some() && !self.is_running();
            if ui.add_enabled(can_build, egui::Button::new("Create ISO")).clicked() {
                if let Some(source) = source {
                    self.start(source, config);
                }
            }
            if self.is_running() && ui.button("Cancel").clicked() {
                if let Some(ref handle) = self.handle {
                    handle.cancel();
                }
            }
        });

        if self.is_running() {
            ui.horizontal(|ui| {
                if self.state == BuildState::Encoding {
                    ui.spinner();
                    ui.add(egui::ProgressBar::new(0.0).animate(true).text(&self.progress_text));
                } else {
                    ui.add(egui::ProgressBar::new(self.fraction).text(&self.progress_text));
                }
            });
        } else if matches!(self.state, BuildState::Done | BuildState::Failed) {
            ui.label(format!("Last build: {}", self.state));
        }
    }
}
