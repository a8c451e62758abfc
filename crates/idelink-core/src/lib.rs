//! idelink-core: session orchestration and diff-preview registry.
//!
//! Keeps exactly one companion session alive per workspace, remaps the
//! reserved Shift+Enter combination into a literal newline, injects text
//! through whatever capability a session surface exposes, and tracks
//! proposed-edit previews requested over the control protocol.
//!
//! Everything that touches a real editor or terminal lives behind the
//! traits in [`host`], [`capability`], [`editor`] and [`ui`]; the
//! `idelink-tmux` crate provides the tmux implementation.

pub mod capability;
pub mod diff;
pub mod editor;
pub mod error;
pub mod host;
pub mod keys;
pub mod mention;
pub mod plan;
pub mod protocol;
pub mod remap;
pub mod session;
pub mod types;
pub mod ui;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use capability::{SessionSurface, inject_text, probe_running_state};
pub use diff::{DiffRegistry, DiffSession, DiffSummary, DiffTable};
pub use editor::{EditorHost, FileRef, PreviewPresenter, ProposedEdit};
pub use error::{DispatchError, HostError, InjectError, LaunchError};
pub use host::SessionHost;
pub use keys::{KeyDispatcher, KeyEvent, KeyObserver, KeySubscription};
pub use mention::{LineRange, format_mention};
pub use plan::{CommandPlan, CommandPlanner, ScriptPlanner, with_port_env};
pub use protocol::{ContentItem, ToolResult};
pub use remap::{InputRemapper, RemapObserver};
pub use session::{SessionConfig, SessionManager, SessionStatus};
pub use types::{ContainerId, RunState, SessionMarkers, SessionRef, ShellFamily, WidgetId};
pub use ui::{QueueScheduler, UiScheduler, UiTask};
