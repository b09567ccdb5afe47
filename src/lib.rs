//! ISO Stager Library
//!
//! Stage a local folder into an ISO 9660 image, or browse and extract the
//! contents of an existing one, through a single tree-and-detail model.

pub mod browse;
pub mod build;
pub mod capacity;
pub mod config;
pub mod disc;
pub mod extract;
pub mod gui;
pub mod logging;
pub mod session;
