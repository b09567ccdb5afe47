//! Directory-only hierarchy for the navigation tree
//!
//! Files never become tree nodes; they only surface through the detail
//! listing. Nodes live in an arena and are addressed by [`NodeId`].

use std::path::Path;

use super::backend::{Backend, BrowseError, ImageBackend, LocalBackend};
use super::entry::{compare_names, Locator, PathEntry};
use crate::disc::ImageDecoder;

/// Index of a node inside a [`DirTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// A directory node
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub entry: PathEntry,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Distance from the root (root is 0)
    pub depth: usize,
    /// Listing failure for this directory; its subtree is left empty
    pub error: Option<String>,
}

/// A fully built directory tree with a synthetic root label
#[derive(Debug, Clone)]
pub struct DirTree {
    label: String,
    nodes: Vec<TreeNode>,
}

impl DirTree {
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Display label of the root (session timestamp or image name)
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.0)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Number of directory nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Find the node for a locator
    pub fn find(&self, locator: &Locator) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| &n.entry.locator == locator)
            .map(NodeId)
    }

    /// Nodes whose listing failed during the build
    pub fn failures(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter().filter(|n| n.error.is_some())
    }

    /// Pre-order traversal (parents before children, siblings in sorted order)
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TreeNode)> + '_ {
        let mut stack = vec![self.root()];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            let node = &self.nodes[id.0];
            stack.extend(node.children.iter().rev().copied());
            Some((id, node))
        })
    }
}

/// Build the directory tree of any backend
///
/// Failing to list the root fails the build. Failing to list any other
/// directory is recorded on that node and the remaining siblings are still
/// built.
pub fn build_tree<B: Backend + ?Sized>(backend: &mut B, label: impl Into<String>) -> Result<DirTree, BrowseError> {
    let mut nodes = vec![TreeNode {
        entry: backend.root(),
        parent: None,
        children: Vec::new(),
        depth: 0,
        error: None,
    }];

    let mut stack = vec![NodeId(0)];
    while let Some(id) = stack.pop() {
        let listing = match backend.list(&nodes[id.0].entry) {
            Ok(listing) => listing,
            Err(e) if id.0 == 0 => return Err(e),
            Err(e) => {
                log::warn!("Could not read {}: {}", nodes[id.0].entry.locator, e);
                nodes[id.0].error = Some(e.to_string());
                continue;
            }
        };

        let mut dirs: Vec<PathEntry> = listing
            .into_iter()
            .filter(|child| child.entry.is_directory())
            .map(|child| child.entry)
            .collect();
        dirs.sort_by(|a, b| compare_names(&a.name, &b.name));

        let depth = nodes[id.0].depth + 1;
        for entry in dirs {
            let child = NodeId(nodes.len());
            nodes.push(TreeNode {
                entry,
                parent: Some(id),
                children: Vec::new(),
                depth,
                error: None,
            });
            nodes[id.0].children.push(child);
            stack.push(child);
        }
    }

    log::debug!("Built tree with {} directories", nodes.len());

    Ok(DirTree {
        label: label.into(),
        nodes,
    })
}

/// Build the tree of a local folder
pub fn build_from_local(root: &Path, label: impl Into<String>) -> Result<DirTree, BrowseError> {
    build_tree(&mut LocalBackend::new(root), label)
}

/// Build the tree of an opened image
pub fn build_from_image<D: ImageDecoder>(decoder: &mut D, label: impl Into<String>) -> Result<DirTree, BrowseError> {
    build_tree(&mut ImageBackend::new(decoder), label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::{DiscImage, EncoderOptions, ImageEncoder, IsoWriter};
    use std::fs;
    use std::io::Cursor;

    fn names(tree: &DirTree, id: NodeId) -> Vec<String> {
        tree.children(id)
            .iter()
            .map(|c| tree.node(*c).unwrap().entry.name.clone())
            .collect()
    }

    #[test]
    fn test_local_tree_has_only_sorted_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("beta/inner")).unwrap();
        fs::create_dir(dir.path().join("Alpha")).unwrap();
        fs::create_dir(dir.path().join("gamma")).unwrap();
        fs::write(dir.path().join("file.txt"), b"x").unwrap();

        let tree = build_from_local(dir.path(), "20240101_1200").unwrap();
        assert_eq!(tree.label(), "20240101_1200");
        assert_eq!(names(&tree, tree.root()), vec!["Alpha", "beta", "gamma"]);
        assert_eq!(tree.len(), 5);

        let beta = tree.children(tree.root())[1];
        assert_eq!(names(&tree, beta), vec!["inner"]);
        assert_eq!(tree.node(tree.children(beta)[0]).unwrap().depth, 2);
    }

    #[test]
    fn test_empty_root_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let tree = build_from_local(dir.path(), "root").unwrap();
        assert!(tree.is_empty());
        assert!(tree.children(tree.root()).is_empty());
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(build_from_local(&dir.path().join("missing"), "root").is_err());
    }

    #[test]
    fn test_preorder_iteration() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/a1")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();

        let tree = build_from_local(dir.path(), "root").unwrap();
        let order: Vec<String> = tree.iter().skip(1).map(|(_, n)| n.entry.name.clone()).collect();
        assert_eq!(order, vec!["a", "a1", "b"]);
    }

    #[test]
    fn test_image_tree_excludes_files() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("f.txt");
        fs::write(&file, b"data").unwrap();

        let mut writer = IsoWriter::new(EncoderOptions::default());
        writer.add_directory("Zeta").unwrap();
        writer.add_directory("alpha/deep").unwrap();
        writer.add_file("alpha/f.txt", &file).unwrap();
        writer.add_file("top.txt", &file).unwrap();
        let mut out = Vec::new();
        writer.build(&mut out).unwrap();

        let mut image = DiscImage::new(Cursor::new(out)).unwrap();
        let tree = build_from_image(&mut image, "backup.iso").unwrap();

        assert_eq!(tree.label(), "backup.iso");
        assert_eq!(names(&tree, tree.root()), vec!["alpha", "Zeta"]);
        let alpha = tree.children(tree.root())[0];
        assert_eq!(names(&tree, alpha), vec!["deep"]);
        assert!(tree.find(&Locator::Image("alpha/deep".to_string())).is_some());
    }

    #[test]
    fn test_image_directory_loop_is_recorded_not_followed() {
        let mut writer = IsoWriter::new(EncoderOptions {
            use_joliet: false,
            volume_label: "LOOP".to_string(),
        });
        writer.add_directory("A").unwrap();
        writer.add_directory("B").unwrap();
        let mut out = Vec::new();
        writer.build(&mut out).unwrap();

        // Point "A" (third record of the root extent) back at the root
        let root_lba = u32::from_le_bytes(out[16 * 2048 + 158..16 * 2048 + 162].try_into().unwrap());
        let a_record = root_lba as usize * 2048 + 68;
        out[a_record + 2..a_record + 6].copy_from_slice(&root_lba.to_le_bytes());
        out[a_record + 6..a_record + 10].copy_from_slice(&root_lba.to_be_bytes());

        let mut image = DiscImage::new(Cursor::new(out)).unwrap();
        let tree = build_from_image(&mut image, "loop.iso").unwrap();

        assert_eq!(names(&tree, tree.root()), vec!["A", "B"]);
        assert_eq!(tree.len(), 3);
        let failed: Vec<&str> = tree.failures().map(|n| n.entry.name.as_str()).collect();
        assert_eq!(failed, vec!["A"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subtree_is_recorded_and_siblings_kept() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("locked/hidden")).unwrap();
        fs::create_dir(dir.path().join("open")).unwrap();
        let locked = dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits are not enforced for root
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let tree = build_from_local(dir.path(), "root").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(names(&tree, tree.root()), vec!["locked", "open"]);
        let failed: Vec<&TreeNode> = tree.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].entry.name, "locked");
    }
}
