use std::path::Path;
use std::sync::Arc;

use crate::capability::SessionSurface;
use crate::error::HostError;
use crate::types::{ContainerId, SessionMarkers, SessionRef, WidgetId};

/// Invoked by the host when the command running in a session terminates.
pub type TerminationCallback = Box<dyn Fn() + Send + Sync>;

/// A resource whose lifetime is tied to one session's container.
/// The host drops it when the container is closed.
pub type SessionResource = Box<dyn Send + Sync>;

/// The workspace's session host: enumerates, creates and presents the
/// interactive sessions, and stores per-container markers.
///
/// Abstraction over terminal hosts (editor terminal tool window, tmux, ...).
/// Implementations are synchronous; the session manager defers all
/// presentation calls to the UI loop itself.
pub trait SessionHost: Send + Sync {
    /// Every session currently owned by this workspace's host.
    fn list_sessions(&self) -> Result<Vec<SessionRef>, HostError>;

    fn create_session(&self, base_dir: &Path, label: &str) -> Result<SessionRef, HostError>;

    fn surface(&self, session: &SessionRef) -> Result<Arc<dyn SessionSurface>, HostError>;

    fn markers(&self, container: &ContainerId) -> Result<SessionMarkers, HostError>;

    /// Read-modify-write of a container's markers as one atomic step.
    fn update_markers(
        &self,
        container: &ContainerId,
        update: &mut dyn FnMut(&mut SessionMarkers),
    ) -> Result<SessionMarkers, HostError>;

    fn set_label(&self, container: &ContainerId, label: &str) -> Result<(), HostError>;

    /// The container currently selected in the hosting panel.
    fn selected_container(&self) -> Result<Option<ContainerId>, HostError>;

    fn is_panel_visible(&self) -> Result<bool, HostError>;

    fn select_container(&self, container: &ContainerId) -> Result<(), HostError>;

    fn activate_panel(&self) -> Result<(), HostError>;

    fn request_focus(&self, widget: &WidgetId) -> Result<(), HostError>;

    fn on_termination(
        &self,
        session: &SessionRef,
        callback: TerminationCallback,
    ) -> Result<(), HostError>;

    /// Hand `resource` to the container so it is dropped with the session.
    fn bind_to_session(
        &self,
        container: &ContainerId,
        resource: SessionResource,
    ) -> Result<(), HostError>;

    /// `false` once the workspace has closed.
    fn is_workspace_open(&self) -> bool;
}
