//! Session Manager: one companion session per workspace.
//!
//! The manager discovers the tagged session among everything the
//! [`SessionHost`] owns, reuses it while it is idle, leaves it alone while a
//! companion run is in progress, and creates a fresh one when reuse fails.
//! Foregrounding is always deferred to the UI loop.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::capability::{SessionSurface, inject_text, probe_running_state};
use crate::error::{DispatchError, HostError, LaunchError};
use crate::host::SessionHost;
use crate::keys::KeyDispatcher;
use crate::plan::CommandPlanner;
use crate::remap::{DEFAULT_DEBOUNCE, DEFAULT_NEWLINE_SEQUENCE, RemapObserver};
use crate::types::{ContainerId, RunState, SessionMarkers, SessionRef};
use crate::ui::UiScheduler;

/// Display label given to the companion session's container.
pub const DEFAULT_LABEL: &str = "Companion";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Label of the managed container; also the fallback identity signal.
    pub label: String,
    /// Sequence injected for Shift+Enter.
    pub remap_sequence: String,
    pub debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            remap_sequence: DEFAULT_NEWLINE_SEQUENCE.to_string(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// The tagged session as found by [`SessionManager::locate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedSession {
    pub session: SessionRef,
    pub markers: SessionMarkers,
}

/// Read-only snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub session: Option<SessionRef>,
    pub markers: Option<SessionMarkers>,
    /// Cached run state, overridden by a live probe when one is available.
    pub run_state: RunState,
    pub displayed: bool,
}

pub struct SessionManager<H: SessionHost + 'static> {
    host: Arc<H>,
    planner: Arc<dyn CommandPlanner>,
    scheduler: Arc<dyn UiScheduler>,
    keys: KeyDispatcher,
    config: SessionConfig,
    /// Held across locate, probe and dispatch so two launches never race
    /// a send into the same session.
    launch_lock: Mutex<()>,
}

impl<H: SessionHost + 'static> SessionManager<H> {
    pub fn new(
        host: Arc<H>,
        planner: Arc<dyn CommandPlanner>,
        scheduler: Arc<dyn UiScheduler>,
        keys: KeyDispatcher,
        config: SessionConfig,
    ) -> Self {
        Self {
            host,
            planner,
            scheduler,
            keys,
            config,
            launch_lock: Mutex::new(()),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn key_dispatcher(&self) -> &KeyDispatcher {
        &self.keys
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ─── Launch ──────────────────────────────────────────────────

    /// Run `command` in the companion session, creating it if needed, and
    /// bring the session to the foreground.
    ///
    /// A session that is still running a command is only foregrounded.
    /// The only failure returned is dispatch into a freshly created session
    /// (or failing to create it); everything else is logged.
    pub fn launch(&self, base_dir: &Path, command: &str) -> Result<(), LaunchError> {
        let _guard = self
            .launch_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(found) = self.locate() {
            self.ensure_termination_callback(&found.session);
            self.ensure_input_remap(&found.session);

            if self.is_running(&found) {
                tracing::info!(container = %found.session.container, "focusing active companion session");
                self.focus(&found.session);
                return Ok(());
            }

            match self.dispatch(&found.session, command) {
                Ok(()) => {
                    tracing::info!(container = %found.session.container, "reused companion session for new run");
                    self.focus(&found.session);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        container = %found.session.container,
                        "companion session cannot be reused, creating a new one: {e}"
                    );
                    self.clear_identity(&found.session.container);
                }
            }
        }

        let session = self
            .host
            .create_session(base_dir, &self.config.label)
            .map_err(LaunchError::Create)?;
        tracing::info!(
            container = %session.container,
            base_dir = %base_dir.display(),
            "created companion session"
        );

        self.mark(&session);
        self.ensure_input_remap(&session);
        if let Err(e) = self.dispatch(&session, command) {
            self.clear_identity(&session.container);
            return Err(e.into());
        }
        self.focus(&session);
        Ok(())
    }

    // ─── Queries ─────────────────────────────────────────────────

    /// The tagged session, or else one carrying the companion label.
    ///
    /// A tag always wins over a label, so a demoted session that kept its
    /// label is not picked over its tagged replacement.
    pub fn locate(&self) -> Option<LocatedSession> {
        let sessions = match self.host.list_sessions() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("failed to inspect existing sessions: {e}");
                return None;
            }
        };
        let candidates: Vec<LocatedSession> = sessions
            .into_iter()
            .map(|session| {
                let markers = match self.host.markers(&session.container) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!(container = %session.container, "failed to read markers: {e}");
                        SessionMarkers::default()
                    }
                };
                LocatedSession { session, markers }
            })
            .collect();

        let tagged = candidates.iter().position(|c| c.markers.tagged);
        let labelled = || {
            candidates
                .iter()
                .position(|c| c.session.label == self.config.label)
        };
        let index = tagged.or_else(labelled)?;
        candidates.into_iter().nth(index)
    }

    /// Whether the companion session is the selected content of a visible
    /// panel. Never fails.
    pub fn is_session_active(&self) -> bool {
        self.find_displayed().is_some()
    }

    /// Inject `text` into the displayed companion session and foreground it.
    pub fn type_into_active_session(&self, text: &str) -> bool {
        let Some(found) = self.find_displayed() else {
            return false;
        };
        let surface = match self.host.surface(&found.session) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(container = %found.session.container, "failed to type into companion session: {e}");
                return false;
            }
        };
        let ok = inject_text(surface.as_ref(), text);
        if ok {
            self.focus(&found.session);
        }
        ok
    }

    pub fn status(&self) -> SessionStatus {
        let Some(found) = self.locate() else {
            return SessionStatus {
                session: None,
                markers: None,
                run_state: RunState::Unknown,
                displayed: false,
            };
        };
        let live = self.live_running(&found.session);
        let displayed = self.is_displayed(&found.session.container);
        SessionStatus {
            run_state: found.markers.run_state.resolve(live),
            markers: Some(found.markers),
            session: Some(found.session),
            displayed,
        }
    }

    fn find_displayed(&self) -> Option<LocatedSession> {
        let found = self.locate()?;
        self.is_displayed(&found.session.container).then_some(found)
    }

    fn is_displayed(&self, container: &ContainerId) -> bool {
        let displayed = || -> Result<bool, HostError> {
            let selected = self.host.selected_container()?;
            if selected.as_ref() != Some(container) {
                return Ok(false);
            }
            self.host.is_panel_visible()
        };
        displayed().unwrap_or_else(|e| {
            tracing::warn!(%container, "failed to inspect companion session display state: {e}");
            false
        })
    }

    /// Live probe result, written back to the cache, else the cached flag.
    fn is_running(&self, found: &LocatedSession) -> bool {
        let live = self.live_running(&found.session);
        if let Some(running) = live {
            self.set_run_state(&found.session.container, RunState::from_running(running));
        }
        found.markers.run_state.resolve(live).is_running()
    }

    fn live_running(&self, session: &SessionRef) -> Option<bool> {
        let surface = self.host.surface(session).ok()?;
        probe_running_state(surface.as_ref())
    }

    // ─── Dispatch ────────────────────────────────────────────────

    fn dispatch(&self, session: &SessionRef, command: &str) -> Result<(), DispatchError> {
        let mut plan = self
            .planner
            .build_plan(command)
            .ok_or(DispatchError::Plan)?;

        let executed = self
            .host
            .surface(session)
            .map_err(DispatchError::Surface)
            .and_then(|surface| execute(surface.as_ref(), plan.command()));

        match executed {
            Ok(()) => {
                self.set_run_state(&session.container, RunState::Running);
                tracing::debug!(container = %session.container, command = plan.command(), "dispatched command");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(container = %session.container, "failed to execute companion command: {e}");
                self.set_run_state(&session.container, RunState::Idle);
                plan.cleanup_on_failure();
                Err(e)
            }
        }
    }

    // ─── Markers ─────────────────────────────────────────────────

    fn mark(&self, session: &SessionRef) {
        let tagged = self.host.update_markers(&session.container, &mut |m| {
            m.tagged = true;
            m.run_state = RunState::Idle;
        });
        if let Err(e) = tagged {
            tracing::warn!(container = %session.container, "failed to tag companion session: {e}");
            return;
        }
        self.ensure_termination_callback(session);
        if let Err(e) = self.host.set_label(&session.container, &self.config.label) {
            tracing::warn!(container = %session.container, "failed to label companion session: {e}");
        }
    }

    fn clear_identity(&self, container: &ContainerId) {
        if let Err(e) = self
            .host
            .update_markers(container, &mut SessionMarkers::clear_identity)
        {
            tracing::warn!(%container, "failed to clear companion session markers: {e}");
        }
    }

    fn set_run_state(&self, container: &ContainerId, state: RunState) {
        if let Err(e) = self
            .host
            .update_markers(container, &mut |m| m.run_state = state)
        {
            tracing::debug!(%container, "failed to record run state: {e}");
        }
    }

    fn ensure_termination_callback(&self, session: &SessionRef) {
        let container = &session.container;
        match self.host.markers(container) {
            Ok(m) if m.callback_registered => return,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%container, "failed to read markers: {e}");
                return;
            }
        }

        // Flag before registration: an unrecorded flag must not stack callbacks.
        if let Err(e) = self
            .host
            .update_markers(container, &mut |m| m.callback_registered = true)
        {
            tracing::warn!(%container, "failed to record termination callback: {e}");
            return;
        }

        let host = Arc::downgrade(&self.host);
        let target = container.clone();
        let callback = Box::new(move || {
            let Some(host) = host.upgrade() else {
                return;
            };
            if let Err(e) = host.update_markers(&target, &mut |m| m.run_state = RunState::Idle) {
                tracing::debug!(container = %target, "failed to record termination: {e}");
            }
        });

        if let Err(e) = self.host.on_termination(session, callback) {
            tracing::warn!(%container, "failed to register termination callback: {e}");
            self.clear_flag(container, &mut |m| m.callback_registered = false);
        }
    }

    /// Attach the Shift+Enter remapper once per session. The subscription
    /// is owned by the session's container and dropped with it.
    fn ensure_input_remap(&self, session: &SessionRef) {
        let container = &session.container;
        match self.host.markers(container) {
            Ok(m) if m.remap_registered => return,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%container, "failed to read markers: {e}");
                return;
            }
        }

        let surface = match self.host.surface(session) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(%container, "no surface for input remapping: {e}");
                return;
            }
        };
        let observer = RemapObserver::new(
            surface,
            Arc::clone(&self.scheduler),
            self.config.remap_sequence.clone(),
            self.config.debounce,
        );
        let subscription = self.keys.register(Arc::new(observer));

        // An unrecorded flag or a failed bind drops the subscription: an
        // observer must never outlive its session or be attached twice.
        if let Err(e) = self
            .host
            .update_markers(container, &mut |m| m.remap_registered = true)
        {
            tracing::warn!(%container, "failed to record input remapper: {e}");
            drop(subscription);
            return;
        }
        match self.host.bind_to_session(container, Box::new(subscription)) {
            Ok(()) => tracing::debug!(%container, "attached Shift+Enter remapper"),
            Err(e) => {
                tracing::warn!(%container, "failed to bind key observer to session: {e}");
                self.clear_flag(container, &mut |m| m.remap_registered = false);
            }
        }
    }

    fn clear_flag(&self, container: &ContainerId, update: &mut dyn FnMut(&mut SessionMarkers)) {
        if let Err(e) = self.host.update_markers(container, update) {
            tracing::warn!(%container, "failed to roll back registration flag: {e}");
        }
    }

    // ─── Focus ───────────────────────────────────────────────────

    fn focus(&self, session: &SessionRef) {
        let host = Arc::clone(&self.host);
        let session = session.clone();
        self.scheduler.invoke_later(Box::new(move || {
            foreground(host.as_ref(), &session);
        }));
    }
}

fn execute(surface: &dyn SessionSurface, command: &str) -> Result<(), DispatchError> {
    surface.execute(command).map_err(DispatchError::Execute)
}

/// Select the session's container, activate the panel, focus the widget.
/// Runs on the UI loop; failures are logged only.
fn foreground<H: SessionHost>(host: &H, session: &SessionRef) {
    if !host.is_workspace_open() {
        return;
    }
    let container = &session.container;

    let select_and_activate = || -> Result<(), HostError> {
        if host.selected_container()?.as_ref() != Some(container) {
            host.select_container(container)?;
        }
        host.activate_panel()
    };
    if let Err(e) = select_and_activate() {
        tracing::warn!(%container, "failed to focus companion session: {e}");
        return;
    }
    if let Err(e) = host.request_focus(&session.widget) {
        tracing::warn!(widget = %session.widget, "failed to request focus for companion session: {e}");
    }
}
