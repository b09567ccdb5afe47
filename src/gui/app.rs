//! Main application state and UI implementation

use eframe::egui;
use log::Level;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use super::browse_view::{BrowseAction, BrowseView};
use super::build_view::BuildView;
use crate::browse::{EntryKind, Locator};
use crate::config::{get_config, AppConfig};
use crate::logging::LogLine;
use crate::session::{Session, Source};

/// Main application state
pub struct App {
    config: &'static AppConfig,
    /// Active session, replaced wholesale on each new source
    session: Option<Session>,
    /// Receiver for a session being opened
    session_receiver: Option<Receiver<Result<Session, String>>>,
    /// Source being opened
    opening: Option<Source>,
    /// Receiver for a file being extracted
    extract_receiver: Option<Receiver<Result<PathBuf, String>>>,
    browse: BrowseView,
    build: BuildView,
    /// Status/log messages
    log_lines: Vec<LogLine>,
    /// Lines forwarded by the UI logger
    log_receiver: Option<Receiver<LogLine>>,
    /// Whether to show the log window
    show_log_window: bool,
    /// Dropped files (for drag-and-drop)
    dropped_files: Vec<egui::DroppedFile>,
}

impl App {
    /// Create a new App instance
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let config = get_config();
        Self {
            config,
            session: None,
            session_receiver: None,
            opening: None,
            extract_receiver: None,
            browse: BrowseView::default(),
            build: BuildView::new(&config.build),
            log_lines: Vec::new(),
            log_receiver: super::take_log_receiver(),
            show_log_window: false,
            dropped_files: Vec::new(),
        }
    }

    /// Add a log message
    fn log(&mut self, level: Level, message: impl Into<String>) {
        self.push_line(LogLine {
            level,
            target: "gui".to_string(),
            message: message.into(),
        });
    }

    fn push_line(&mut self, line: LogLine) {
        self.log_lines.push(line);
        // Keep only last 200 messages
        if self.log_lines.len() > 200 {
            self.log_lines.remove(0);
        }
    }

    fn poll_log(&mut self) {
        let lines: Vec<LogLine> = match self.log_receiver {
            Some(ref receiver) => receiver.try_iter().collect(),
            None => return,
        };
        for line in lines {
            self.push_line(line);
        }
    }

    /// Open a folder or image in the background
    fn open_source(&mut self, source: Source) {
        self.log(Level::Info, format!("Opening {}", source.path().display()));

        let (tx, rx) = mpsc::channel();
        self.session_receiver = Some(rx);
        self.opening = Some(source.clone());

        thread::spawn(move || {
            let result = match source {
                Source::LocalFolder(path) => Session::open_folder(path),
                Source::Image(path) => Session::open_image(path),
            };
            let _ = tx.send(result.map_err(|e| e.to_string()));
        });
    }

    /// Poll for a newly opened session
    fn poll_session(&mut self) {
        if let Some(ref receiver) = self.session_receiver {
            match receiver.try_recv() {
                Ok(Ok(session)) => {
                    self.session_receiver = None;
                    self.opening = None;
                    self.log(
                        Level::Info,
                        format!("Opened {} ({} folders)", session.label(), session.tree().len()),
                    );
                    for node in session.tree().failures() {
                        let reason = node.error.clone().unwrap_or_default();
                        self.log(Level::Warn, format!("Could not read {}: {}", node.entry.locator, reason));
                    }

                    self.browse.clear();
                    self.browse.select(&session, session.tree().root());
                    self.session = Some(session);
                }
                Ok(Err(e)) => {
                    self.session_receiver = None;
                    self.opening = None;
                    self.log(Level::Error, format!("Failed to open: {}", e));
                }
                Err(TryRecvError::Empty) => {
                    // Still opening
                }
                Err(TryRecvError::Disconnected) => {
                    self.session_receiver = None;
                    self.opening = None;
                    self.log(Level::Error, "Open thread terminated unexpectedly");
                }
            }
        }
    }

    fn poll_build(&mut self) {
        match self.build.poll() {
            Some(Ok(report)) => {
                self.log(
                    Level::Info,
                    format!(
                        "Created {} ({} files, {} bytes)",
                        report.output.display(),
                        report.files,
                        report.image_bytes
                    ),
                );
                for path in &report.skipped {
                    self.log(Level::Warn, format!("Left out of the image: {}", path.display()));
                }
            }
            Some(Err(e)) => self.log(Level::Error, e.to_string()),
            None => {}
        }
    }

    fn pick_folder(&mut self) {
        if let Some(path) = rfd::FileDialog::new().pick_folder() {
            self.open_source(Source::LocalFolder(path));
        }
    }

    fn pick_image(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("Disc images", &["iso"])
            .add_filter("All Files", &["*"])
            .pick_file()
        {
            self.open_source(Source::Image(path));
        }
    }

    /// Handle a double-clicked detail row
    fn activate(&mut self, action: BrowseAction) {
        let BrowseAction::Activate(row) = action;
        if row.kind() == EntryKind::Directory {
            let target = self
                .session
                .as_ref()
                .and_then(|s| s.tree().find(row.locator()).map(|id| (s, id)));
            if let Some((session, id)) = target {
                self.browse.select(session, id);
            }
            return;
        }

        let Some(ref session) = self.session else {
            return;
        };
        match row.locator() {
            Locator::Local(path) => {
                self.log(Level::Info, format!("File ready at {}", path.display()));
            }
            Locator::Image(_) => {
                let job = session.extract_job(row.entry.clone());
                let staging = self.config.extract.staging_dir();
                let (tx, rx) = mpsc::channel();
                self.extract_receiver = Some(rx);
                self.log(Level::Info, format!("Extracting {}", row.name()));

                thread::spawn(move || {
                    let _ = tx.send(job.run(&staging).map_err(|e| e.to_string()));
                });
            }
        }
    }

    /// Poll for a finished extraction
    fn poll_extract(&mut self) {
        if let Some(ref receiver) = self.extract_receiver {
            match receiver.try_recv() {
                Ok(result) => {
                    self.extract_receiver = None;
                    match result {
                        Ok(path) => self.log(Level::Info, format!("File ready at {}", path.display())),
                        Err(e) => self.log(Level::Error, format!("Extraction failed: {}", e)),
                    }
                }
                Err(TryRecvError::Empty) => {
                    // Still extracting
                }
                Err(TryRecvError::Disconnected) => {
                    self.extract_receiver = None;
                    self.log(Level::Error, "Extraction thread terminated unexpectedly");
                }
            }
        }
    }

    fn handle_dropped(&mut self, path: PathBuf) {
        if path.is_dir() {
            self.open_source(Source::LocalFolder(path));
        } else {
            self.open_source(Source::Image(path));
        }
    }
}

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_log();
        self.poll_session();
        self.poll_build();
        self.poll_extract();
        self.browse.poll(self.config.capacity.reference_bytes);

        // Request repaint while loading
        if self.session_receiver.is_some()
            || self.extract_receiver.is_some()
            || self.browse.is_loading()
            || self.build.is_running()
        {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }

        // Handle dropped files
        ctx.input(|i| {
            if !i.raw.dropped_files.is_empty() {
                self.dropped_files = i.raw.dropped_files.clone();
            }
        });
        if let Some(path) = self.dropped_files.pop().and_then(|f| f.path) {
            self.handle_dropped(path);
        }

        let busy = self.session_receiver.is_some() || self.build.is_running();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                ui.heading("ISO Stager");
                ui.separator();
                if ui.add_enabled(!busy, egui::Button::new("Open folder...")).clicked() {
                    self.pick_folder();
                }
                if ui.add_enabled(!busy, egui::Button::new("Open image...")).clicked() {
                    self.pick_image();
                }
                if let Some(ref source) = self.opening {
                    ui.spinner();
                    ui.label(format!("Reading {}", source.path().display()));
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(format!("v{}", env!("CARGO_PKG_VERSION")));
                    ui.separator();
                    let log_btn_text = if self.log_lines.is_empty() {
                        "Log".to_string()
                    } else {
                        format!("Log ({})", self.log_lines.len())
                    };
                    if ui.button(log_btn_text).clicked() {
                        self.show_log_window = !self.show_log_window;
                    }
                });
            });
            ui.add_space(4.0);
        });

        // Build panel only applies to a staged local folder
        let staged_source = match self.session.as_ref().map(|s| s.source()) {
            Some(Source::LocalFolder(path)) => Some(path.clone()),
            _ => None,
        };
        egui::TopBottomPanel::bottom("build_panel").show(ctx, |ui| {
            ui.add_space(4.0);
            self.build
                .show(ui, staged_source.as_deref(), &self.config.build);
            ui.add_space(4.0);
        });

        if let Some(ref session) = self.session {
            egui::SidePanel::left("tree_panel")
                .resizable(true)
                .default_width(260.0)
                .show(ctx, |ui| {
                    ui.heading("Folders");
                    ui.separator();
                    self.browse.show_tree(ui, session);
                });
        }

        let mut action = None;
        egui::CentralPanel::default().show(ctx, |ui| {
            if self.session.is_some() {
                action = self
                    .browse
                    .show_details(ui, self.config.capacity.reference_bytes);
            } else {
                ui.centered_and_justified(|ui| {
                    ui.label("Open a folder to stage, or an ISO image to browse. You can also drop one here.");
                });
            }
        });
        if let Some(action) = action {
            self.activate(action);
        }

        self.browse.show_capacity_warning(ctx);

        // Log window (separate window, hidden by default)
        if self.show_log_window {
            let lines = &mut self.log_lines;
            egui::Window::new("Log")
                .open(&mut self.show_log_window)
                .default_size([500.0, 300.0])
                .resizable(true)
                .show(ctx, |ui| {
                    if ui.button("Clear").clicked() {
                        lines.clear();
                    }
                    ui.separator();
                    egui::ScrollArea::vertical()
                        .auto_shrink([false, false])
                        .stick_to_bottom(true)
                        .show(ui, |ui| {
                            for line in lines.iter() {
                                let color = match line.level {
                                    Level::Error => egui::Color32::RED,
                                    Level::Warn => egui::Color32::YELLOW,
                                    Level::Info => ui.visuals().text_color(),
                                    Level::Debug | Level::Trace => egui::Color32::GRAY,
                                };
                                ui.colored_label(color, line.to_string());
                            }
                        });
                });
        }

        preview_files_being_dropped(ctx);
    }
}

/// Preview files being dragged over the window
fn preview_files_being_dropped(ctx: &egui::Context) {
    use egui::{Align2, Color32, Id, LayerId, Order, TextStyle};

    if !ctx.input(|i| i.raw.hovered_files.is_empty()) {
        let painter = ctx.layer_painter(LayerId::new(Order::Foreground, Id::new("file_drop_target")));

        let screen_rect = ctx.screen_rect();
        painter.rect_filled(screen_rect, 0.0, Color32::from_black_alpha(192));
        painter.text(
            screen_rect.center(),
            Align2::CENTER_CENTER,
            "Drop a folder to stage or an ISO to browse",
            TextStyle::Heading.resolve(&ctx.style()),
            Color32::WHITE,
        );
    }
}
