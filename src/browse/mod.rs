//! Uniform browsing of local folders and disc images
//!
//! Directories and files are modelled the same way on both backends. Every
//! [`PathEntry`] carries an explicit backend tag, so an image path is never
//! mistaken for a local one.

mod backend;
mod detail;
mod entry;
mod size;
mod tree;

pub use backend::{Backend, BrowseError, ImageBackend, Listed, LocalBackend};
pub use detail::{list_children, list_children_cached, DetailRow};
pub use entry::{
    classify, compare_names, strip_version_suffix, BackendKind, EntryKind, FileCategory, Locator, PathEntry,
};
pub use size::{size_of, SizeCache};
pub use tree::{build_from_image, build_from_local, build_tree, DirTree, NodeId, TreeNode};
