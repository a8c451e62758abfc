//! Diff Registry: proposed-edit previews requested by the companion.
//!
//! `open` and `close` answer the control protocol immediately; the preview
//! itself is shown and dismissed later on the UI loop. An `isError=false`
//! reply from `open` therefore means "accepted", not "visible".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::editor::{EditorHost, FileRef, PreviewPresenter, ProposedEdit, owning_workspace};
use crate::protocol::ToolResult;
use crate::ui::UiScheduler;

/// One proposed edit awaiting review.
#[derive(Debug)]
pub struct DiffSession<H> {
    pub file_path: String,
    pub target: FileRef,
    pub proposed_content: String,
    /// Root of the workspace that owns the preview.
    pub workspace: PathBuf,
    pub preview: H,
    pub opened_at: DateTime<Utc>,
}

/// Status view of a registered diff session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub file_path: String,
    pub workspace: PathBuf,
    pub proposed_bytes: usize,
    pub opened_at: DateTime<Utc>,
}

// ─── Table ───────────────────────────────────────────────────────

/// Path-keyed table of diff sessions behind a single mutex.
///
/// Only whole-entry operations are exposed, so there is never more than
/// one entry per path and concurrent open/close cannot lose updates.
pub struct DiffTable<H> {
    entries: Mutex<HashMap<String, DiffSession<H>>>,
}

impl<H> Default for DiffTable<H> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<H> DiffTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, returning the entry it replaced (last writer wins).
    pub fn put(&self, session: DiffSession<H>) -> Option<DiffSession<H>> {
        self.lock().insert(session.file_path.clone(), session)
    }

    pub fn remove(&self, file_path: &str) -> Option<DiffSession<H>> {
        self.lock().remove(file_path)
    }

    pub fn get<R>(&self, file_path: &str, read: impl FnOnce(&DiffSession<H>) -> R) -> Option<R> {
        self.lock().get(file_path).map(read)
    }

    pub fn contains(&self, file_path: &str) -> bool {
        self.lock().contains_key(file_path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every entry owned by the workspace at `root`.
    pub fn remove_workspace(&self, root: &Path) -> Vec<DiffSession<H>> {
        let mut entries = self.lock();
        let paths: Vec<String> = entries
            .values()
            .filter(|s| s.workspace == root)
            .map(|s| s.file_path.clone())
            .collect();
        paths.iter().filter_map(|p| entries.remove(p)).collect()
    }

    pub fn summaries(&self) -> Vec<DiffSummary> {
        let mut out: Vec<DiffSummary> = self
            .lock()
            .values()
            .map(|s| DiffSummary {
                file_path: s.file_path.clone(),
                workspace: s.workspace.clone(),
                proposed_bytes: s.proposed_content.len(),
                opened_at: s.opened_at,
            })
            .collect();
        out.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        out
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DiffSession<H>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── Registry ────────────────────────────────────────────────────

pub struct DiffRegistry<E, P: PreviewPresenter> {
    editor: Arc<E>,
    presenter: Arc<P>,
    scheduler: Arc<dyn UiScheduler>,
    table: Arc<DiffTable<P::Handle>>,
}

impl<E, P> DiffRegistry<E, P>
where
    E: EditorHost + 'static,
    P: PreviewPresenter + 'static,
{
    pub fn new(editor: Arc<E>, presenter: Arc<P>, scheduler: Arc<dyn UiScheduler>) -> Self {
        Self {
            editor,
            presenter,
            scheduler,
            table: Arc::new(DiffTable::new()),
        }
    }

    pub fn table(&self) -> &DiffTable<P::Handle> {
        &self.table
    }

    /// `open_diff`: validate, then schedule the preview and reply at once.
    pub fn open(&self, file_path: &str, new_content: &str) -> ToolResult {
        let Some(target) = self.editor.resolve_file(file_path) else {
            return ToolResult::error(format!("File not found: {file_path}"));
        };
        let roots = self.editor.workspace_roots();
        let Some(workspace) = owning_workspace(&roots, Path::new(file_path)) else {
            return ToolResult::error(format!("No open project found for file: {file_path}"));
        };

        let edit = ProposedEdit {
            file_path: file_path.to_string(),
            target,
            proposed_content: new_content.to_string(),
        };
        let presenter = Arc::clone(&self.presenter);
        let table = Arc::clone(&self.table);
        self.scheduler.invoke_later(Box::new(move || {
            show_preview(presenter.as_ref(), &table, workspace, edit);
        }));

        ToolResult::accepted()
    }

    /// `close_diff`: reply with the file's final content, then drop the
    /// entry and its preview on the UI loop.
    pub fn close(&self, file_path: &str) -> ToolResult {
        let content = self.final_content(file_path);

        let presenter = Arc::clone(&self.presenter);
        let table = Arc::clone(&self.table);
        let path = file_path.to_string();
        self.scheduler.invoke_later(Box::new(move || {
            let Some(session) = table.remove(&path) else {
                return;
            };
            dismiss_preview(presenter.as_ref(), session);
        }));

        ToolResult::text(content)
    }

    /// Live buffer text if the editor has one, else the on-disk bytes,
    /// else empty.
    pub fn final_content(&self, file_path: &str) -> String {
        let Some(file) = self.editor.resolve_file(file_path) else {
            return String::new();
        };
        if let Some(text) = self.editor.live_buffer_text(&file) {
            return text;
        }
        match self.editor.read_file(&file) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(file_path, "failed to read file for close_diff: {e}");
                String::new()
            }
        }
    }

    /// Drop every preview of a closing workspace.
    pub fn evict_workspace(&self, root: &Path) {
        let presenter = Arc::clone(&self.presenter);
        let table = Arc::clone(&self.table);
        let root = root.to_path_buf();
        self.scheduler.invoke_later(Box::new(move || {
            for session in table.remove_workspace(&root) {
                dismiss_preview(presenter.as_ref(), session);
            }
        }));
    }

    pub fn active_diffs(&self) -> Vec<DiffSummary> {
        self.table.summaries()
    }
}

fn show_preview<P: PreviewPresenter>(
    presenter: &P,
    table: &DiffTable<P::Handle>,
    workspace: PathBuf,
    edit: ProposedEdit,
) {
    let handle = match presenter.present(&workspace, &edit) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(file_path = %edit.file_path, "failed to open diff preview: {e}");
            return;
        }
    };
    tracing::info!(file_path = %edit.file_path, workspace = %workspace.display(), "diff preview opened");

    let session = DiffSession {
        file_path: edit.file_path,
        target: edit.target,
        proposed_content: edit.proposed_content,
        workspace,
        preview: handle,
        opened_at: Utc::now(),
    };
    if let Some(previous) = table.put(session) {
        dismiss_preview(presenter, previous);
    }
}

fn dismiss_preview<P: PreviewPresenter>(presenter: &P, session: DiffSession<P::Handle>) {
    let file_path = session.file_path;
    match presenter.dismiss(&session.workspace, session.preview) {
        Ok(()) => tracing::debug!(%file_path, "diff preview dismissed"),
        Err(e) => tracing::warn!(%file_path, "failed to dismiss diff preview: {e}"),
    }
}
