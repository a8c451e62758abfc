//! WorkspaceEditor: the editor view backing diff previews.
//!
//! Workspace roots come from config; unsaved buffer text is pushed by the
//! editor integration through `buffer_update` / `buffer_close`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use idelink_core::{EditorHost, FileRef};

#[derive(Default)]
pub struct WorkspaceEditor {
    roots: Mutex<Vec<PathBuf>>,
    buffers: Mutex<HashMap<PathBuf, String>>,
}

impl WorkspaceEditor {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: Mutex::new(roots),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_root(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        let mut roots = self.roots.lock().unwrap_or_else(PoisonError::into_inner);
        if !roots.contains(&root) {
            roots.push(root);
        }
    }

    /// Returns whether `root` was open.
    pub fn remove_root(&self, root: &Path) -> bool {
        let mut roots = self.roots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = roots.len();
        roots.retain(|r| r != root);
        before != roots.len()
    }

    pub fn update_buffer(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), text.into());
    }

    /// Returns whether a buffer was open.
    pub fn close_buffer(&self, path: &Path) -> bool {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some()
    }
}

impl EditorHost for WorkspaceEditor {
    fn resolve_file(&self, path: &str) -> Option<FileRef> {
        let path = Path::new(path);
        std::fs::metadata(path)
            .is_ok_and(|m| m.is_file())
            .then(|| FileRef::new(path))
    }

    fn workspace_roots(&self) -> Vec<PathBuf> {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn live_buffer_text(&self, file: &FileRef) -> Option<String> {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&file.path)
            .cloned()
    }

    fn read_file(&self, file: &FileRef) -> std::io::Result<String> {
        std::fs::read_to_string(&file.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_only_existing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").expect("write");
        let editor = WorkspaceEditor::new(vec![dir.path().to_path_buf()]);

        assert!(editor.resolve_file(&file.to_string_lossy()).is_some());
        assert!(editor.resolve_file(&dir.path().to_string_lossy()).is_none());
        assert!(editor.resolve_file("/missing.txt").is_none());
    }

    #[test]
    fn buffer_shadows_disk_until_closed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "disk").expect("write");
        let editor = WorkspaceEditor::default();
        let target = FileRef::new(&file);

        editor.update_buffer(&file, "unsaved");
        assert_eq!(editor.live_buffer_text(&target).as_deref(), Some("unsaved"));
        assert!(editor.close_buffer(&file));
        assert!(!editor.close_buffer(&file));
        assert_eq!(editor.live_buffer_text(&target), None);
        assert_eq!(editor.read_file(&target).expect("read"), "disk");
    }

    #[test]
    fn roots_are_deduplicated() {
        let editor = WorkspaceEditor::new(vec![PathBuf::from("/proj")]);
        editor.add_root("/proj");
        editor.add_root("/other");
        assert_eq!(editor.workspace_roots().len(), 2);
        assert!(editor.remove_root(Path::new("/proj")));
        assert!(!editor.remove_root(Path::new("/proj")));
    }
}
