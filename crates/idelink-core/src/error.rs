//! Error taxonomy shared by the core components.
//!
//! Only [`LaunchError`] ever reaches a caller of the session manager.
//! Resolution failures become protocol payloads, injection failures
//! become `false`, and focus failures are logged and dropped.

use std::fmt;

use thiserror::Error;

/// Failure reported by a host collaborator (terminal host, surface, preview).
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host operation failed: {0}")]
    Failed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("host io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which text-injection strategy was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectStrategy {
    RawTransport,
    TypeText,
    PasteText,
}

impl InjectStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawTransport => "raw transport",
            Self::TypeText => "type-text",
            Self::PasteText => "paste-text",
        }
    }
}

impl fmt::Display for InjectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("no text injection capability available")]
    Unavailable,

    #[error("{strategy} injection failed: {source}")]
    Failed {
        strategy: InjectStrategy,
        #[source]
        source: HostError,
    },
}

/// Sending a command into a session failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("command could not be prepared for execution")]
    Plan,

    #[error("session surface unavailable: {0}")]
    Surface(#[source] HostError),

    #[error("failed to execute command: {0}")]
    Execute(#[source] HostError),
}

/// The one failure `SessionManager::launch` propagates to its caller.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to create companion session: {0}")]
    Create(#[source] HostError),

    #[error("failed to execute companion command: {0}")]
    Dispatch(#[from] DispatchError),
}
