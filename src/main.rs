//! ISO Stager
//!
//! A cross-platform GUI application that stages folders into ISO images and
//! browses existing ones.

use eframe::egui;

use iso_stager::gui;
use iso_stager::logging::UiLogger;

fn main() -> eframe::Result<()> {
    match UiLogger::init() {
        Ok(receiver) => gui::set_log_receiver(receiver),
        Err(_) => {
            let _ = env_logger::try_init();
        }
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([960.0, 640.0])
            .with_min_inner_size([720.0, 480.0])
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        "ISO Stager",
        options,
        Box::new(|cc| Ok(Box::new(gui::App::new(cc)))),
    )
}
