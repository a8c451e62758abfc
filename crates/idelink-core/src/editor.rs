//! Editor-side collaborators of the diff registry.

use std::path::{Path, PathBuf};

use crate::error::HostError;

/// A resolved, editor-tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub path: PathBuf,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Display name (final path component).
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// The editor's document and file-system view.
pub trait EditorHost: Send + Sync {
    /// `None` when no file exists at `path`.
    fn resolve_file(&self, path: &str) -> Option<FileRef>;

    /// Roots of the currently open workspaces.
    fn workspace_roots(&self) -> Vec<PathBuf>;

    /// In-memory text of an open buffer, saved or not.
    fn live_buffer_text(&self, file: &FileRef) -> Option<String>;

    fn read_file(&self, file: &FileRef) -> std::io::Result<String>;
}

/// A proposed edit as handed to the preview presenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedEdit {
    pub file_path: String,
    pub target: FileRef,
    pub proposed_content: String,
}

/// Shows and dismisses diff previews.
pub trait PreviewPresenter: Send + Sync {
    /// Transient view object shown to the user.
    type Handle: Send + 'static;

    fn present(&self, workspace: &Path, edit: &ProposedEdit) -> Result<Self::Handle, HostError>;

    fn dismiss(&self, workspace: &Path, handle: Self::Handle) -> Result<(), HostError>;
}

/// Owning workspace of `file_path`: the longest root it lies under.
///
/// Matching is by whole path components, so `/proj2/a` does not belong to
/// `/proj`.
pub fn owning_workspace(roots: &[PathBuf], file_path: &Path) -> Option<PathBuf> {
    roots
        .iter()
        .filter(|root| file_path.starts_with(root))
        .max_by_key(|root| root.components().count())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_root_wins() {
        let roots = vec![PathBuf::from("/proj"), PathBuf::from("/proj/sub")];
        assert_eq!(
            owning_workspace(&roots, Path::new("/proj/sub/a.txt")),
            Some(PathBuf::from("/proj/sub"))
        );
        assert_eq!(
            owning_workspace(&roots, Path::new("/proj/b.txt")),
            Some(PathBuf::from("/proj"))
        );
    }

    #[test]
    fn sibling_prefix_does_not_match() {
        let roots = vec![PathBuf::from("/proj")];
        assert_eq!(owning_workspace(&roots, Path::new("/proj2/a.txt")), None);
    }

    #[test]
    fn file_ref_name() {
        assert_eq!(FileRef::new("/proj/src/a.txt").name(), "a.txt");
    }
}
