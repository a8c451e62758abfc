//! idelink-tmux: tmux as the companion session host.
//! Windows of one tmux session are the containers, their panes the
//! widgets. Subprocess execution sits behind [`TmuxCommandRunner`] so
//! every higher layer is testable with a scripted runner.

pub mod error;
pub mod executor;
pub mod host;
pub mod preview;
pub mod surface;
pub mod window_info;

pub use error::TmuxError;
pub use executor::{TmuxCommandRunner, TmuxExecutor};
pub use host::{PollOutcome, TmuxHost};
pub use preview::{TmuxPreview, TmuxPreviewPresenter};
pub use surface::{SurfaceCapabilities, TmuxSurface};
pub use window_info::{LIST_WINDOWS_FORMAT, TmuxWindowInfo, list_windows, parse_list_windows_output};
