//! Tree and detail panes for the active session

use eframe::egui;
use egui::collapsing_header::CollapsingState;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use crate::browse::{DetailRow, DirTree, EntryKind, NodeId, PathEntry};
use crate::capacity::{evaluate, format_size, CapacityReading, StatusTier};
use crate::session::Session;

/// Something the user asked for in the detail pane
pub enum BrowseAction {
    /// A row was double-clicked
    Activate(DetailRow),
}

/// Browse view state
#[derive(Default)]
pub struct BrowseView {
    /// Selected tree node
    selected: Option<NodeId>,
    /// Rows of the selected directory
    rows: Vec<DetailRow>,
    /// Highlighted row
    selected_row: Option<usize>,
    /// Capacity of the selected directory
    reading: Option<CapacityReading>,
    /// Over-capacity notice waiting to be acknowledged
    show_capacity_warning: bool,
    /// Receiver for the detail listing being computed
    listing_receiver: Option<Receiver<Result<Vec<DetailRow>, String>>>,
    /// Listing failure
    error: Option<String>,
}

impl BrowseView {
    /// Forget everything about the previous session
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_loading(&self) -> bool {
        self.listing_receiver.is_some()
    }

    /// Select a tree node and start listing it in the background
    pub fn select(&mut self, session: &Session, id: NodeId) {
        let Some(node) = session.tree().node(id) else {
            return;
        };

        self.selected = Some(id);
        self.rows.clear();
        self.selected_row = None;
        self.reading = None;
        self.error = None;

        let job = session.listing_job(node.entry.clone());
        let (tx, rx) = mpsc::channel();
        self.listing_receiver = Some(rx);

        thread::spawn(move || {
            let _ = tx.send(job.run().map_err(|e| e.to_string()));
        });
    }

    /// Poll for listing results
    pub fn poll(&mut self, reference_bytes: u64) {
        if let Some(ref receiver) = self.listing_receiver {
            match receiver.try_recv() {
                Ok(Ok(rows)) => {
                    // A directory's aggregate is the sum of its children
                    let total = rows.iter().fold(0u64, |sum, row| sum.saturating_add(row.size));
                    let reading = evaluate(total, reference_bytes);
                    if reading.exceeds_capacity() {
                        log::warn!(
                            "Selection is {} ({}), more than the disc can hold",
                            reading.formatted_size,
                            reading.percent_text()
                        );
                    }
                    self.show_capacity_warning = reading.exceeds_capacity();
                    self.reading = Some(reading);
                    self.rows = rows;
                    self.listing_receiver = None;
                }
                Ok(Err(e)) => {
                    log::error!("Listing failed: {}", e);
                    self.error = Some(e);
                    self.listing_receiver = None;
                }
                Err(TryRecvError::Empty) => {
                    // Still listing
                }
                Err(TryRecvError::Disconnected) => {
                    self.error = Some("Listing thread terminated unexpectedly".to_string());
                    self.listing_receiver = None;
                }
            }
        }
    }

    /// Render the directory tree
    pub fn show_tree(&mut self, ui: &mut egui::Ui, session: &Session) {
        let tree = session.tree();
        let mut clicked = None;

        egui::ScrollArea::vertical()
            .id_salt("dir_tree")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                tree_node(ui, tree, tree.root(), self.selected, &mut clicked);
            });

        if let Some(id) = clicked {
            self.select(session, id);
        }
    }

    /// Render the detail grid and capacity bar; returns an activation if any
    pub fn show_details(&mut self, ui: &mut egui::Ui, reference_bytes: u64) -> Option<BrowseAction> {
        let mut action = None;

        if let Some(ref reading) = self.reading {
            capacity_bar(ui, reading, reference_bytes);
            ui.separator();
        }

        if self.is_loading() {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label("Calculating sizes...");
            });
        } else if let Some(ref error) = self.error {
            ui.colored_label(egui::Color32::RED, format!("Error: {}", error));
        } else if self.selected.is_none() {
            ui.label("Select a folder in the tree");
        } else if self.rows.is_empty() {
            ui.label("This folder is empty");
        } else {
            egui::ScrollArea::vertical()
                .id_salt("detail_rows")
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    egui::Grid::new("detail_grid")
                        .num_columns(3)
                        .striped(true)
                        .show(ui, |ui| {
                            ui.strong("Name");
                            ui.strong("Type");
                            ui.strong("Size");
                            ui.end_row();

                            for (index, row) in self.rows.iter().enumerate() {
                                let selected = self.selected_row == Some(index);
                                let response = ui.selectable_label(selected, row.name());
                                if response.clicked() {
                                    self.selected_row = Some(index);
                                }
                                if response.double_clicked() {
                                    action = Some(BrowseAction::Activate(row.clone()));
                                }
                                ui.label(type_label(&row.entry));
                                ui.label(&row.formatted_size);
                                ui.end_row();
                            }
                        });
                });
        }

        action
    }

    /// Over-capacity notice, shown once per evaluation
    pub fn show_capacity_warning(&mut self, ctx: &egui::Context) {
        if !self.show_capacity_warning {
            return;
        }
        let Some(ref reading) = self.reading else {
            return;
        };

        let message = format!(
            "The selection is {} ({}) and will not fit on the disc.",
            reading.formatted_size,
            reading.percent_text()
        );
        egui::Window::new("Capacity exceeded")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(message);
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    self.show_capacity_warning = false;
                }
            });
    }
}

fn tree_node(ui: &mut egui::Ui, tree: &DirTree, id: NodeId, selected: Option<NodeId>, clicked: &mut Option<NodeId>) {
    let Some(node) = tree.node(id) else {
        return;
    };

    let mut text = if node.parent.is_none() {
        tree.label().to_string()
    } else {
        node.entry.name.clone()
    };
    if node.error.is_some() {
        text.push_str(" (unreadable)");
    }
    let is_selected = selected == Some(id);

    let children = tree.children(id);
    if children.is_empty() {
        ui.horizontal(|ui| {
            ui.add_space(ui.spacing().indent);
            if ui.selectable_label(is_selected, text).clicked() {
                *clicked = Some(id);
            }
        });
        return;
    }

    let state_id = ui.make_persistent_id(("tree_node", id.0));
    CollapsingState::load_with_default_open(ui.ctx(), state_id, node.parent.is_none())
        .show_header(ui, |ui| {
            if ui.selectable_label(is_selected, text).clicked() {
                *clicked = Some(id);
            }
        })
        .body(|ui| {
            for &child in children {
                tree_node(ui, tree, child, selected, clicked);
            }
        });
}

fn type_label(entry: &PathEntry) -> &'static str {
    match entry.kind {
        EntryKind::Directory => EntryKind::Directory.display_name(),
        EntryKind::File => entry.category().map(|c| c.display_name()).unwrap_or("File"),
    }
}

fn capacity_bar(ui: &mut egui::Ui, reading: &CapacityReading, reference_bytes: u64) {
    let color = match reading.tier {
        StatusTier::Ok => egui::Color32::from_rgb(60, 160, 80),
        StatusTier::Warning => egui::Color32::from_rgb(220, 160, 40),
        StatusTier::Over => egui::Color32::from_rgb(200, 50, 50),
    };

    ui.horizontal(|ui| {
        ui.label("Capacity:");
        ui.add(
            egui::ProgressBar::new(reading.fill)
                .fill(color)
                .text(format!(
                    "{} of {} ({})",
                    reading.formatted_size,
                    format_size(reference_bytes),
                    reading.percent_text()
                )),
        );
    });
    if reading.tier != StatusTier::Ok {
        ui.colored_label(color, reading.tier.to_string());
    }
}
