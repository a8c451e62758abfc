//! In-memory collaborators for tests.
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for downstream crates and integration tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::capability::{RawTransport, RunningProbe, SessionSurface, TextPaster, TextTyper};
use crate::editor::{EditorHost, FileRef, PreviewPresenter, ProposedEdit};
use crate::error::HostError;
use crate::host::{SessionHost, SessionResource, TerminationCallback};
use crate::types::{ContainerId, SessionMarkers, SessionRef, WidgetId};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Surface ─────────────────────────────────────────────────────

/// A surface with a configurable capability set. Injected text is recorded
/// as `"<strategy>:<text>"` (`raw`, `type`, `paste`).
pub struct FakeSurface {
    widget: WidgetId,
    raw: bool,
    typer: bool,
    paster: bool,
    probe: Mutex<Option<bool>>,
    fail_injection: AtomicBool,
    fail_execute: AtomicBool,
    written: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
}

impl FakeSurface {
    pub fn new(widget: &str) -> Self {
        Self {
            widget: WidgetId::new(widget),
            raw: false,
            typer: false,
            paster: false,
            probe: Mutex::new(None),
            fail_injection: AtomicBool::new(false),
            fail_execute: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn with_typer(mut self) -> Self {
        self.typer = true;
        self
    }

    pub fn with_paster(mut self) -> Self {
        self.paster = true;
        self
    }

    pub fn with_probe(self, running: bool) -> Self {
        self.set_running(Some(running));
        self
    }

    /// `None` removes the running probe capability.
    pub fn set_running(&self, running: Option<bool>) {
        *lock(&self.probe) = running;
    }

    pub fn fail_injection(&self, fail: bool) {
        self.fail_injection.store(fail, Ordering::SeqCst);
    }

    pub fn fail_execute(&self, fail: bool) {
        self.fail_execute.store(fail, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<String> {
        lock(&self.written).clone()
    }

    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    fn record(&self, strategy: &str, text: &str) -> Result<(), HostError> {
        if self.fail_injection.load(Ordering::SeqCst) {
            return Err(HostError::Failed(format!("{strategy} rejected")));
        }
        lock(&self.written).push(format!("{strategy}:{text}"));
        Ok(())
    }
}

impl RawTransport for FakeSurface {
    fn write(&self, text: &str) -> Result<(), HostError> {
        self.record("raw", text)
    }
}

impl TextTyper for FakeSurface {
    fn type_text(&self, text: &str) -> Result<(), HostError> {
        self.record("type", text)
    }
}

impl TextPaster for FakeSurface {
    fn paste_text(&self, text: &str) -> Result<(), HostError> {
        self.record("paste", text)
    }
}

impl RunningProbe for FakeSurface {
    fn is_command_running(&self) -> Result<bool, HostError> {
        (*lock(&self.probe)).ok_or_else(|| HostError::Failed("no probe".into()))
    }
}

impl SessionSurface for FakeSurface {
    fn widget(&self) -> &WidgetId {
        &self.widget
    }

    fn execute(&self, command: &str) -> Result<(), HostError> {
        if self.fail_execute.load(Ordering::SeqCst) {
            return Err(HostError::Failed("execute rejected".into()));
        }
        lock(&self.executed).push(command.to_string());
        Ok(())
    }

    fn contains_focus(&self, focus: &WidgetId) -> bool {
        *focus == self.widget
    }

    fn raw_transport(&self) -> Option<&dyn RawTransport> {
        self.raw.then_some(self as &dyn RawTransport)
    }

    fn text_typer(&self) -> Option<&dyn TextTyper> {
        self.typer.then_some(self as &dyn TextTyper)
    }

    fn text_paster(&self) -> Option<&dyn TextPaster> {
        self.paster.then_some(self as &dyn TextPaster)
    }

    fn running_probe(&self) -> Option<&dyn RunningProbe> {
        lock(&self.probe)
            .is_some()
            .then_some(self as &dyn RunningProbe)
    }
}

// ─── Host ────────────────────────────────────────────────────────

struct FakeSession {
    session: SessionRef,
    markers: SessionMarkers,
    surface: Arc<FakeSurface>,
    callbacks: Vec<Arc<TerminationCallback>>,
    resources: Vec<SessionResource>,
}

#[derive(Default)]
struct HostState {
    sessions: Vec<FakeSession>,
    selected: Option<ContainerId>,
    panel_visible: bool,
    focus_requests: Vec<WidgetId>,
}

/// In-memory session host. New sessions get a raw-transport surface.
pub struct FakeHost {
    state: Mutex<HostState>,
    next_id: AtomicU64,
    created: AtomicUsize,
    workspace_open: AtomicBool,
    fail_create: AtomicBool,
    fail_bind: AtomicBool,
    fail_new_sessions: AtomicBool,
    fail_flag_writes: AtomicBool,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            next_id: AtomicU64::new(1),
            created: AtomicUsize::new(0),
            workspace_open: AtomicBool::new(true),
            fail_create: AtomicBool::new(false),
            fail_bind: AtomicBool::new(false),
            fail_new_sessions: AtomicBool::new(false),
            fail_flag_writes: AtomicBool::new(false),
        }
    }

    /// Add an untagged session, as if opened by the user.
    pub fn add_session(&self, label: &str) -> SessionRef {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = SessionRef {
            widget: WidgetId::new(format!("%{id}")),
            container: ContainerId::new(format!("@{id}")),
            label: label.to_string(),
        };
        let surface = Arc::new(FakeSurface::new(session.widget.as_str()).with_raw());
        if self.fail_new_sessions.load(Ordering::SeqCst) {
            surface.fail_execute(true);
        }
        lock(&self.state).sessions.push(FakeSession {
            session: session.clone(),
            markers: SessionMarkers::default(),
            surface,
            callbacks: Vec::new(),
            resources: Vec::new(),
        });
        session
    }

    /// Sessions created through [`SessionHost::create_session`].
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Commands executed across all sessions, in session order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state)
            .sessions
            .iter()
            .flat_map(|s| s.surface.executed())
            .collect()
    }

    pub fn focus_requests(&self) -> Vec<WidgetId> {
        lock(&self.state).focus_requests.clone()
    }

    pub fn surface_of(&self, container: &ContainerId) -> Option<Arc<FakeSurface>> {
        self.with_session(container, |s| Arc::clone(&s.surface))
    }

    pub fn set_live_running(&self, container: &ContainerId, running: Option<bool>) {
        if let Some(surface) = self.surface_of(container) {
            surface.set_running(running);
        }
    }

    pub fn fail_execute(&self, container: &ContainerId, fail: bool) {
        if let Some(surface) = self.surface_of(container) {
            surface.fail_execute(fail);
        }
    }

    /// Sessions created from now on reject every command.
    pub fn fail_new_sessions(&self, fail: bool) {
        self.fail_new_sessions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_bind(&self, fail: bool) {
        self.fail_bind.store(fail, Ordering::SeqCst);
    }

    /// Reject marker updates that set a registration flag.
    pub fn fail_flag_writes(&self, fail: bool) {
        self.fail_flag_writes.store(fail, Ordering::SeqCst);
    }

    /// Termination callbacks registered on the session.
    pub fn callback_count(&self, container: &ContainerId) -> usize {
        self.with_session(container, |s| s.callbacks.len())
            .unwrap_or_default()
    }

    pub fn hide_panel(&self) {
        lock(&self.state).panel_visible = false;
    }

    pub fn close_workspace(&self) {
        self.workspace_open.store(false, Ordering::SeqCst);
    }

    /// Fire the session's termination callbacks, outside the state lock.
    pub fn terminate(&self, container: &ContainerId) {
        let callbacks = self
            .with_session(container, |s| s.callbacks.clone())
            .unwrap_or_default();
        for callback in callbacks {
            (**callback)();
        }
    }

    /// Close the session's container, dropping everything bound to it.
    pub fn close_session(&self, container: &ContainerId) {
        let removed = {
            let mut state = lock(&self.state);
            if state.selected.as_ref() == Some(container) {
                state.selected = None;
            }
            let index = state
                .sessions
                .iter()
                .position(|s| &s.session.container == container);
            index.map(|i| state.sessions.remove(i))
        };
        drop(removed);
    }

    fn with_session<R>(&self, container: &ContainerId, f: impl FnOnce(&FakeSession) -> R) -> Option<R> {
        lock(&self.state)
            .sessions
            .iter()
            .find(|s| &s.session.container == container)
            .map(f)
    }

    fn with_session_mut<R>(
        &self,
        container: &ContainerId,
        f: impl FnOnce(&mut FakeSession) -> R,
    ) -> Result<R, HostError> {
        lock(&self.state)
            .sessions
            .iter_mut()
            .find(|s| &s.session.container == container)
            .map(f)
            .ok_or_else(|| HostError::NotFound(container.to_string()))
    }
}

impl SessionHost for FakeHost {
    fn list_sessions(&self) -> Result<Vec<SessionRef>, HostError> {
        Ok(lock(&self.state)
            .sessions
            .iter()
            .map(|s| s.session.clone())
            .collect())
    }

    fn create_session(&self, _base_dir: &Path, label: &str) -> Result<SessionRef, HostError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(HostError::Failed("cannot create session".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.add_session(label))
    }

    fn surface(&self, session: &SessionRef) -> Result<Arc<dyn SessionSurface>, HostError> {
        self.surface_of(&session.container)
            .map(|s| s as Arc<dyn SessionSurface>)
            .ok_or_else(|| HostError::NotFound(session.container.to_string()))
    }

    fn markers(&self, container: &ContainerId) -> Result<SessionMarkers, HostError> {
        self.with_session(container, |s| s.markers)
            .ok_or_else(|| HostError::NotFound(container.to_string()))
    }

    fn update_markers(
        &self,
        container: &ContainerId,
        update: &mut dyn FnMut(&mut SessionMarkers),
    ) -> Result<SessionMarkers, HostError> {
        let fail_flags = self.fail_flag_writes.load(Ordering::SeqCst);
        self.with_session_mut(container, |s| {
            let mut next = s.markers;
            update(&mut next);
            let sets_flag = (next.callback_registered && !s.markers.callback_registered)
                || (next.remap_registered && !s.markers.remap_registered);
            if fail_flags && sets_flag {
                return Err(HostError::Failed("cannot write markers".into()));
            }
            s.markers = next;
            Ok(next)
        })?
    }

    fn set_label(&self, container: &ContainerId, label: &str) -> Result<(), HostError> {
        self.with_session_mut(container, |s| s.session.label = label.to_string())
    }

    fn selected_container(&self) -> Result<Option<ContainerId>, HostError> {
        Ok(lock(&self.state).selected.clone())
    }

    fn is_panel_visible(&self) -> Result<bool, HostError> {
        Ok(lock(&self.state).panel_visible)
    }

    fn select_container(&self, container: &ContainerId) -> Result<(), HostError> {
        lock(&self.state).selected = Some(container.clone());
        Ok(())
    }

    fn activate_panel(&self) -> Result<(), HostError> {
        lock(&self.state).panel_visible = true;
        Ok(())
    }

    fn request_focus(&self, widget: &WidgetId) -> Result<(), HostError> {
        lock(&self.state).focus_requests.push(widget.clone());
        Ok(())
    }

    fn on_termination(
        &self,
        session: &SessionRef,
        callback: TerminationCallback,
    ) -> Result<(), HostError> {
        let callback = Arc::new(callback);
        self.with_session_mut(&session.container, |s| s.callbacks.push(callback))
    }

    fn bind_to_session(
        &self,
        container: &ContainerId,
        resource: SessionResource,
    ) -> Result<(), HostError> {
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(HostError::Failed("cannot bind".into()));
        }
        self.with_session_mut(container, |s| s.resources.push(resource))
    }

    fn is_workspace_open(&self) -> bool {
        self.workspace_open.load(Ordering::SeqCst)
    }
}

// ─── Editor ──────────────────────────────────────────────────────

/// Editor with in-memory files, unsaved buffers and workspace roots.
#[derive(Default)]
pub struct FakeEditor {
    roots: Mutex<Vec<PathBuf>>,
    files: Mutex<HashMap<String, String>>,
    buffers: Mutex<HashMap<String, String>>,
}

impl FakeEditor {
    pub fn new(roots: &[&str]) -> Self {
        Self {
            roots: Mutex::new(roots.iter().map(PathBuf::from).collect()),
            ..Self::default()
        }
    }

    pub fn add_root(&self, root: &str) {
        lock(&self.roots).push(PathBuf::from(root));
    }

    pub fn put_file(&self, path: &str, content: &str) {
        lock(&self.files).insert(path.to_string(), content.to_string());
    }

    /// Unsaved in-editor text for `path`.
    pub fn set_buffer(&self, path: &str, text: &str) {
        lock(&self.buffers).insert(path.to_string(), text.to_string());
    }
}

impl EditorHost for FakeEditor {
    fn resolve_file(&self, path: &str) -> Option<FileRef> {
        lock(&self.files)
            .contains_key(path)
            .then(|| FileRef::new(path))
    }

    fn workspace_roots(&self) -> Vec<PathBuf> {
        lock(&self.roots).clone()
    }

    fn live_buffer_text(&self, file: &FileRef) -> Option<String> {
        lock(&self.buffers)
            .get(file.path.to_string_lossy().as_ref())
            .cloned()
    }

    fn read_file(&self, file: &FileRef) -> io::Result<String> {
        lock(&self.files)
            .get(file.path.to_string_lossy().as_ref())
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}

// ─── Presenter ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct FakePreview {
    pub id: u64,
    pub file_path: String,
}

/// Presenter that records which previews were shown and dismissed.
#[derive(Default)]
pub struct RecordingPresenter {
    next_id: AtomicU64,
    presented: Mutex<Vec<String>>,
    dismissed: Mutex<Vec<String>>,
    fail_present: AtomicBool,
    fail_dismiss: AtomicBool,
}

impl RecordingPresenter {
    pub fn presented(&self) -> Vec<String> {
        lock(&self.presented).clone()
    }

    pub fn dismissed(&self) -> Vec<String> {
        lock(&self.dismissed).clone()
    }

    pub fn fail_present(&self, fail: bool) {
        self.fail_present.store(fail, Ordering::SeqCst);
    }

    pub fn fail_dismiss(&self, fail: bool) {
        self.fail_dismiss.store(fail, Ordering::SeqCst);
    }
}

impl PreviewPresenter for RecordingPresenter {
    type Handle = FakePreview;

    fn present(&self, _workspace: &Path, edit: &ProposedEdit) -> Result<FakePreview, HostError> {
        if self.fail_present.load(Ordering::SeqCst) {
            return Err(HostError::Failed("cannot present".into()));
        }
        lock(&self.presented).push(edit.file_path.clone());
        Ok(FakePreview {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            file_path: edit.file_path.clone(),
        })
    }

    fn dismiss(&self, _workspace: &Path, handle: FakePreview) -> Result<(), HostError> {
        if self.fail_dismiss.load(Ordering::SeqCst) {
            return Err(HostError::Failed("cannot dismiss".into()));
        }
        lock(&self.dismissed).push(handle.file_path);
        Ok(())
    }
}
