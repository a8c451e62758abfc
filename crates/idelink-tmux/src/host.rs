//! TmuxHost: one tmux session holds the workspace's windows.
//!
//! Identity and run state live in window user options (`@idelink`,
//! `@idelink_run`) so other tools can see them. Callback and remap
//! registrations are in-process only: they die with the daemon, and so
//! do the flags that guard them.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use idelink_core::host::{SessionResource, TerminationCallback};
use idelink_core::{
    ContainerId, HostError, SessionHost, SessionMarkers, SessionRef, SessionSurface, WidgetId,
};

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;
use crate::surface::{SurfaceCapabilities, TmuxSurface};
use crate::window_info::{
    RUN_STATE_OPTION, TAG_OPTION, TmuxWindowInfo, default_shells, list_windows, run_state_value,
};

const CREATED_FORMAT: &str = "#{window_id}\t#{pane_id}";

#[derive(Default)]
struct WindowState {
    callback_registered: bool,
    remap_registered: bool,
    callbacks: Vec<Arc<TerminationCallback>>,
    resources: Vec<SessionResource>,
    last_running: Option<bool>,
}

/// Result of one [`TmuxHost::poll`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollOutcome {
    /// Windows whose command finished since the previous poll.
    pub terminated: usize,
    /// Tracked windows that no longer exist.
    pub closed: usize,
}

pub struct TmuxHost<R> {
    runner: Arc<R>,
    session: String,
    caps: SurfaceCapabilities,
    shells: Arc<[String]>,
    windows: Mutex<HashMap<ContainerId, WindowState>>,
    workspace_open: AtomicBool,
}

impl<R: TmuxCommandRunner> TmuxHost<R> {
    pub fn new(runner: Arc<R>, session: impl Into<String>) -> Self {
        Self {
            runner,
            session: session.into(),
            caps: SurfaceCapabilities::default(),
            shells: default_shells().into(),
            windows: Mutex::new(HashMap::new()),
            workspace_open: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, caps: SurfaceCapabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Commands treated as an idle shell prompt.
    #[must_use]
    pub fn with_shells(mut self, shells: Vec<String>) -> Self {
        self.shells = shells.into();
        self
    }

    pub fn session_name(&self) -> &str {
        &self.session
    }

    pub fn runner(&self) -> &Arc<R> {
        &self.runner
    }

    /// Every window of the managed tmux session; empty if it does not exist.
    pub fn windows(&self) -> Result<Vec<TmuxWindowInfo>, HostError> {
        if !self.session_exists()? {
            return Ok(Vec::new());
        }
        Ok(list_windows(self.runner.as_ref(), &self.session)?)
    }

    /// Detect finished commands and closed windows.
    ///
    /// Termination callbacks fire on a running → idle transition. State
    /// bound to windows that vanished is dropped, which releases their key
    /// observers.
    pub fn poll(&self) -> Result<PollOutcome, HostError> {
        let windows = self.windows()?;
        let live: HashSet<&str> = windows.iter().map(|w| w.window_id.as_str()).collect();

        let mut fired = Vec::new();
        let vanished: Vec<WindowState> = {
            let mut state = self.lock();
            for w in &windows {
                let Some(ws) = state.get_mut(&ContainerId::new(&w.window_id)) else {
                    continue;
                };
                let running = w.is_command_running(&self.shells);
                // First sighting: trust the persisted run state, so a command
                // that exited before any poll still counts as finished.
                let was_running = ws.last_running.unwrap_or(w.run_state.is_running());
                if was_running && !running {
                    tracing::info!(window = %w.window_id, "companion command finished");
                    fired.extend(ws.callbacks.iter().cloned());
                }
                ws.last_running = Some(running);
            }
            let gone: Vec<ContainerId> = state
                .keys()
                .filter(|c| !live.contains(c.as_str()))
                .cloned()
                .collect();
            gone.iter().filter_map(|c| state.remove(c)).collect()
        };

        // Callbacks write markers, which takes the lock again.
        for callback in &fired {
            (**callback)();
        }
        if !vanished.is_empty() {
            tracing::debug!(closed = vanished.len(), "released state of closed windows");
        }
        Ok(PollOutcome {
            terminated: fired.len(),
            closed: vanished.len(),
        })
    }

    /// The workspace is going away: refuse further focus requests and drop
    /// everything bound to windows.
    pub fn close(&self) {
        self.workspace_open.store(false, Ordering::SeqCst);
        let released: HashMap<ContainerId, WindowState> = std::mem::take(&mut *self.lock());
        drop(released);
    }

    fn session_exists(&self) -> Result<bool, HostError> {
        let target = format!("={}", self.session);
        match self.runner.run(&["has-session", "-t", &target]) {
            Ok(_) => Ok(true),
            Err(TmuxError::CommandFailed(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn window(&self, container: &ContainerId) -> Result<TmuxWindowInfo, HostError> {
        self.windows()?
            .into_iter()
            .find(|w| w.window_id == container.as_str())
            .ok_or_else(|| HostError::NotFound(format!("tmux window {container}")))
    }

    fn display(&self, target: &str, format: &str) -> Result<String, HostError> {
        let out = self
            .runner
            .run(&["display-message", "-p", "-t", target, format])?;
        Ok(out.trim_end_matches('\n').to_string())
    }

    fn set_window_option(
        &self,
        container: &ContainerId,
        option: &str,
        value: Option<&str>,
    ) -> Result<(), HostError> {
        let window = container.as_str();
        match value {
            Some(v) => self
                .runner
                .run(&["set-option", "-w", "-t", window, option, v])?,
            None => self
                .runner
                .run(&["set-option", "-w", "-u", "-t", window, option])?,
        };
        Ok(())
    }

    fn read_markers(
        &self,
        windows: &HashMap<ContainerId, WindowState>,
        container: &ContainerId,
    ) -> Result<SessionMarkers, HostError> {
        let info = self.window(container)?;
        let local = windows.get(container);
        Ok(SessionMarkers {
            tagged: info.tagged,
            run_state: info.run_state,
            callback_registered: local.is_some_and(|w| w.callback_registered),
            remap_registered: local.is_some_and(|w| w.remap_registered),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContainerId, WindowState>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: TmuxCommandRunner + 'static> SessionHost for TmuxHost<R> {
    fn list_sessions(&self) -> Result<Vec<SessionRef>, HostError> {
        Ok(self
            .windows()?
            .iter()
            .map(TmuxWindowInfo::session_ref)
            .collect())
    }

    fn create_session(&self, base_dir: &Path, label: &str) -> Result<SessionRef, HostError> {
        let dir = base_dir.to_string_lossy();
        let out = if self.session_exists()? {
            let target = format!("={}:", self.session);
            self.runner.run(&[
                "new-window", "-d", "-P", "-F", CREATED_FORMAT, "-t", &target, "-c", &dir, "-n",
                label,
            ])?
        } else {
            self.runner.run(&[
                "new-session",
                "-d",
                "-P",
                "-F",
                CREATED_FORMAT,
                "-s",
                &self.session,
                "-c",
                &dir,
                "-n",
                label,
            ])?
        };

        let line = out.trim();
        let (window_id, pane_id) = line.split_once('\t').ok_or_else(|| {
            HostError::from(TmuxError::ParseError {
                line_num: 1,
                detail: format!("unexpected new-window output: {line:?}"),
            })
        })?;
        tracing::debug!(window = window_id, pane = pane_id, "created tmux window");
        Ok(SessionRef {
            widget: WidgetId::new(pane_id),
            container: ContainerId::new(window_id),
            label: label.to_string(),
        })
    }

    fn surface(&self, session: &SessionRef) -> Result<Arc<dyn SessionSurface>, HostError> {
        Ok(Arc::new(TmuxSurface::new(
            Arc::clone(&self.runner),
            session.widget.clone(),
            self.caps,
            Arc::clone(&self.shells),
        )))
    }

    fn markers(&self, container: &ContainerId) -> Result<SessionMarkers, HostError> {
        let windows = self.lock();
        self.read_markers(&windows, container)
    }

    fn update_markers(
        &self,
        container: &ContainerId,
        update: &mut dyn FnMut(&mut SessionMarkers),
    ) -> Result<SessionMarkers, HostError> {
        let mut windows = self.lock();
        let current = self.read_markers(&windows, container)?;
        let mut next = current;
        update(&mut next);

        if next.tagged != current.tagged {
            self.set_window_option(container, TAG_OPTION, next.tagged.then_some("1"))?;
        }
        if next.run_state != current.run_state {
            self.set_window_option(container, RUN_STATE_OPTION, run_state_value(next.run_state))?;
        }
        let local = windows.entry(container.clone()).or_default();
        local.callback_registered = next.callback_registered;
        local.remap_registered = next.remap_registered;
        Ok(next)
    }

    fn set_label(&self, container: &ContainerId, label: &str) -> Result<(), HostError> {
        self.runner
            .run(&["rename-window", "-t", container.as_str(), label])?;
        Ok(())
    }

    fn selected_container(&self) -> Result<Option<ContainerId>, HostError> {
        if !self.session_exists()? {
            return Ok(None);
        }
        let id = self.display(&format!("={}", self.session), "#{window_id}")?;
        Ok((!id.is_empty()).then(|| ContainerId::new(id)))
    }

    /// The "panel" is the tmux session; it is visible while a client is
    /// attached to it.
    fn is_panel_visible(&self) -> Result<bool, HostError> {
        if !self.session_exists()? {
            return Ok(false);
        }
        let attached = self.display(&format!("={}", self.session), "#{session_attached}")?;
        Ok(attached.trim().parse::<u32>().is_ok_and(|n| n > 0))
    }

    fn select_container(&self, container: &ContainerId) -> Result<(), HostError> {
        self.runner
            .run(&["select-window", "-t", container.as_str()])?;
        Ok(())
    }

    /// Switch the most recently active client to the session unless one is
    /// already there. Without any client there is nothing to activate.
    fn activate_panel(&self) -> Result<(), HostError> {
        let out = self
            .runner
            .run(&["list-clients", "-F", "#{client_name}\t#{client_session}"])?;
        let clients: Vec<(&str, &str)> = out
            .lines()
            .filter_map(|l| l.split_once('\t'))
            .collect();
        if clients.iter().any(|(_, s)| *s == self.session) {
            return Ok(());
        }
        let Some((client, _)) = clients.first() else {
            tracing::debug!(session = %self.session, "no tmux client attached; nothing to activate");
            return Ok(());
        };
        let target = format!("={}", self.session);
        self.runner
            .run(&["switch-client", "-c", client, "-t", &target])?;
        Ok(())
    }

    fn request_focus(&self, widget: &WidgetId) -> Result<(), HostError> {
        self.runner.run(&["select-pane", "-t", widget.as_str()])?;
        Ok(())
    }

    fn on_termination(
        &self,
        session: &SessionRef,
        callback: TerminationCallback,
    ) -> Result<(), HostError> {
        self.lock()
            .entry(session.container.clone())
            .or_default()
            .callbacks
            .push(Arc::new(callback));
        Ok(())
    }

    fn bind_to_session(
        &self,
        container: &ContainerId,
        resource: SessionResource,
    ) -> Result<(), HostError> {
        // Binding to a window that is already gone would leak the resource
        // until the next poll.
        self.window(container)?;
        self.lock()
            .entry(container.clone())
            .or_default()
            .resources
            .push(resource);
        Ok(())
    }

    fn is_workspace_open(&self) -> bool {
        self.workspace_open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::MockRunner;
    use idelink_core::RunState;
    use std::sync::atomic::AtomicUsize;

    /// Scripted tmux: windows come from a mutable list-windows output.
    struct FakeTmux {
        runner: Arc<MockRunner>,
        windows: Arc<Mutex<String>>,
    }

    impl FakeTmux {
        fn new(session_exists: bool, windows: &str) -> Self {
            let listing = Arc::new(Mutex::new(windows.to_string()));
            let shared = Arc::clone(&listing);
            let runner = Arc::new(MockRunner::new(move |args| match args[0] {
                "has-session" if !session_exists => {
                    Err(TmuxError::CommandFailed("can't find session".into()))
                }
                "list-windows" => Ok(shared.lock().expect("lock").clone()),
                "new-session" | "new-window" => Ok("@7\t%9\n".to_string()),
                "display-message" if args.last() == Some(&"#{window_id}") => Ok("@1\n".to_string()),
                "display-message" => Ok("1\n".to_string()),
                "list-clients" => Ok("/dev/pts/1\tother\n".to_string()),
                _ => Ok(String::new()),
            }));
            Self {
                runner,
                windows: listing,
            }
        }

        fn host(&self) -> TmuxHost<MockRunner> {
            TmuxHost::new(Arc::clone(&self.runner), "idelink")
        }

        fn set_windows(&self, windows: &str) {
            *self.windows.lock().expect("lock") = windows.to_string();
        }
    }

    const ONE_WINDOW: &str = "@1\tCompanion\t%2\tzsh\t/proj\t0\t1\t1\t\t\n";

    #[test]
    fn lists_windows_as_sessions() {
        let tmux = FakeTmux::new(true, ONE_WINDOW);
        let sessions = tmux.host().list_sessions().expect("list");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].container, ContainerId::new("@1"));
        assert_eq!(sessions[0].widget, WidgetId::new("%2"));
    }

    #[test]
    fn missing_tmux_session_means_no_sessions() {
        let tmux = FakeTmux::new(false, ONE_WINDOW);
        let host = tmux.host();
        assert!(host.list_sessions().expect("list").is_empty());
        assert!(tmux.runner.calls_to("list-windows").is_empty());
        assert_eq!(host.selected_container().expect("selected"), None);
        assert!(!host.is_panel_visible().expect("visible"));
    }

    #[test]
    fn create_starts_session_when_absent() {
        let tmux = FakeTmux::new(false, "");
        let session = tmux
            .host()
            .create_session(Path::new("/proj"), "Companion")
            .expect("create");
        assert_eq!(session.container, ContainerId::new("@7"));
        assert_eq!(session.widget, WidgetId::new("%9"));
        assert_eq!(session.label, "Companion");

        let call = &tmux.runner.calls_to("new-session")[0];
        assert!(call.contains(&"idelink".to_string()));
        assert!(call.contains(&"/proj".to_string()));
    }

    #[test]
    fn create_adds_window_when_present() {
        let tmux = FakeTmux::new(true, ONE_WINDOW);
        tmux.host()
            .create_session(Path::new("/proj"), "Companion")
            .expect("create");
        assert_eq!(tmux.runner.calls_to("new-window").len(), 1);
        assert!(tmux.runner.calls_to("new-session").is_empty());
    }

    #[test]
    fn update_markers_writes_window_options() {
        let tmux = FakeTmux::new(true, ONE_WINDOW);
        let host = tmux.host();
        let container = ContainerId::new("@1");

        let next = host
            .update_markers(&container, &mut |m| {
                m.tagged = true;
                m.run_state = RunState::Running;
                m.remap_registered = true;
            })
            .expect("update");
        assert!(next.tagged && next.remap_registered);

        let sets = tmux.runner.calls_to("set-option");
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0], ["set-option", "-w", "-t", "@1", "@idelink", "1"]);
        assert_eq!(
            sets[1],
            ["set-option", "-w", "-t", "@1", "@idelink_run", "running"]
        );

        // In-process flags survive; tmux options are re-read.
        let markers = host.markers(&container).expect("markers");
        assert!(markers.remap_registered);
        assert!(!markers.tagged, "fake tmux did not persist the option");
    }

    #[test]
    fn clearing_identity_unsets_options() {
        let tmux = FakeTmux::new(true, "@1\tCompanion\t%2\tzsh\t/proj\t0\t1\t1\t1\tidle\n");
        let host = tmux.host();
        host.update_markers(&ContainerId::new("@1"), &mut SessionMarkers::clear_identity)
            .expect("update");

        let sets = tmux.runner.calls_to("set-option");
        assert_eq!(sets[0], ["set-option", "-w", "-u", "-t", "@1", "@idelink"]);
        assert_eq!(sets[1], ["set-option", "-w", "-u", "-t", "@1", "@idelink_run"]);
    }

    #[test]
    fn unknown_window_markers_not_found() {
        let tmux = FakeTmux::new(true, ONE_WINDOW);
        assert!(matches!(
            tmux.host().markers(&ContainerId::new("@99")),
            Err(HostError::NotFound(_))
        ));
    }

    #[test]
    fn poll_fires_callback_when_command_finishes() {
        let tmux = FakeTmux::new(true, "@1\tCompanion\t%2\topencode\t/proj\t0\t1\t1\t1\trunning\n");
        let host = tmux.host();
        let session = host.list_sessions().expect("list").remove(0);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        host.on_termination(
            &session,
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("register");

        assert_eq!(host.poll().expect("poll").terminated, 0);
        tmux.set_windows("@1\tCompanion\t%2\tzsh\t/proj\t0\t1\t1\t1\trunning\n");
        assert_eq!(host.poll().expect("poll").terminated, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // Staying idle does not fire again.
        assert_eq!(host.poll().expect("poll").terminated, 0);
    }

    #[test]
    fn poll_fires_callback_when_command_exited_before_first_poll() {
        let tmux = FakeTmux::new(true, "@1\tCompanion\t%2\tzsh\t/proj\t0\t1\t1\t1\trunning\n");
        let host = tmux.host();
        let session = host.list_sessions().expect("list").remove(0);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        host.on_termination(
            &session,
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("register");

        assert_eq!(host.poll().expect("poll").terminated, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(host.poll().expect("poll").terminated, 0);
    }

    #[test]
    fn first_poll_of_idle_window_does_not_fire() {
        let tmux = FakeTmux::new(true, "@1\tCompanion\t%2\tzsh\t/proj\t0\t1\t1\t1\tidle\n");
        let host = tmux.host();
        let session = host.list_sessions().expect("list").remove(0);
        host.on_termination(&session, Box::new(|| {}))
            .expect("register");
        assert_eq!(host.poll().expect("poll").terminated, 0);
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn poll_releases_resources_of_closed_windows() {
        let tmux = FakeTmux::new(true, ONE_WINDOW);
        let host = tmux.host();
        let dropped = Arc::new(AtomicBool::new(false));
        host.bind_to_session(
            &ContainerId::new("@1"),
            Box::new(DropFlag(Arc::clone(&dropped))),
        )
        .expect("bind");

        host.poll().expect("poll");
        assert!(!dropped.load(Ordering::SeqCst));

        tmux.set_windows("");
        assert_eq!(host.poll().expect("poll").closed, 1);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn bind_to_missing_window_fails() {
        let tmux = FakeTmux::new(true, ONE_WINDOW);
        let dropped = Arc::new(AtomicBool::new(false));
        let result = tmux.host().bind_to_session(
            &ContainerId::new("@5"),
            Box::new(DropFlag(Arc::clone(&dropped))),
        );
        assert!(result.is_err());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn close_releases_everything() {
        let tmux = FakeTmux::new(true, ONE_WINDOW);
        let host = tmux.host();
        let dropped = Arc::new(AtomicBool::new(false));
        host.bind_to_session(
            &ContainerId::new("@1"),
            Box::new(DropFlag(Arc::clone(&dropped))),
        )
        .expect("bind");
        host.close();
        assert!(!host.is_workspace_open());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn focus_primitives() {
        let tmux = FakeTmux::new(true, ONE_WINDOW);
        let host = tmux.host();
        assert_eq!(
            host.selected_container().expect("selected"),
            Some(ContainerId::new("@1"))
        );
        assert!(host.is_panel_visible().expect("visible"));

        host.select_container(&ContainerId::new("@1")).expect("select");
        host.activate_panel().expect("activate");
        host.request_focus(&WidgetId::new("%2")).expect("focus");

        assert_eq!(tmux.runner.calls_to("select-window").len(), 1);
        let switch = &tmux.runner.calls_to("switch-client")[0];
        assert_eq!(switch, &["switch-client", "-c", "/dev/pts/1", "-t", "=idelink"]);
        assert_eq!(tmux.runner.calls_to("select-pane")[0][2], "%2");
    }
}
