//! GUI module using egui/eframe
//!
//! A thin front end over the browsing session and the build pipeline.

mod app;
mod browse_view;
mod build_view;

pub use app::App;

use std::sync::mpsc::Receiver;
use std::sync::Mutex;

use crate::logging::LogLine;

/// Global storage for the log receiver, used to transfer from main() to App::new()
static LOG_RECEIVER: Mutex<Option<Receiver<LogLine>>> = Mutex::new(None);

/// Store the log receiver for the App to take during initialization
pub fn set_log_receiver(receiver: Receiver<LogLine>) {
    if let Ok(mut guard) = LOG_RECEIVER.lock() {
        *guard = Some(receiver);
    }
}

/// Take the log receiver (called once by App::new)
pub(crate) fn take_log_receiver() -> Option<Receiver<LogLine>> {
    LOG_RECEIVER.lock().ok().and_then(|mut guard| guard.take())
}
