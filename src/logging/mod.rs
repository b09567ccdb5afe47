//! Log output routed to the UI

mod ui_logger;

pub use ui_logger::{LogLine, UiLogger};
