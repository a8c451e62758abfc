//! TmuxCommandRunner trait and TmuxExecutor (sync subprocess wrapper).

use std::sync::Arc;

use crate::error::TmuxError;

/// Trait for executing tmux commands. Enables mock injection for testing.
pub trait TmuxCommandRunner: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError>;
}

impl<T: TmuxCommandRunner + ?Sized> TmuxCommandRunner for &T {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        (**self).run(args)
    }
}

impl<T: TmuxCommandRunner + ?Sized> TmuxCommandRunner for Arc<T> {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        (**self).run(args)
    }
}

/// Real tmux executor using `std::process::Command`.
#[derive(Debug, Clone)]
pub struct TmuxExecutor {
    tmux_bin: String,
    socket_path: Option<String>,
}

impl TmuxExecutor {
    pub fn new(tmux_bin: impl Into<String>) -> Self {
        Self {
            tmux_bin: tmux_bin.into(),
            socket_path: None,
        }
    }

    /// Talk to the server at `path` (`tmux -S`) instead of the default one.
    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    pub fn tmux_bin(&self) -> &str {
        &self.tmux_bin
    }
}

impl Default for TmuxExecutor {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TmuxCommandRunner for TmuxExecutor {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let mut cmd = std::process::Command::new(&self.tmux_bin);
        if let Some(ref path) = self.socket_path {
            cmd.args(["-S", path]);
        }
        cmd.args(args);
        tracing::trace!(?args, "tmux");
        let output = cmd.output().map_err(TmuxError::Io)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TmuxError::CommandFailed(format!(
                "{} exited {}: {}",
                args.first().copied().unwrap_or("tmux"),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::{Mutex, PoisonError};

    use super::TmuxCommandRunner;
    use crate::error::TmuxError;

    type Responder = Box<dyn Fn(&[&str]) -> Result<String, TmuxError> + Send + Sync>;

    /// Records every invocation and answers through a responder closure.
    pub(crate) struct MockRunner {
        calls: Mutex<Vec<Vec<String>>>,
        respond: Responder,
    }

    impl MockRunner {
        pub(crate) fn new(
            respond: impl Fn(&[&str]) -> Result<String, TmuxError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        /// Every command succeeds with empty output.
        pub(crate) fn ok() -> Self {
            Self::new(|_| Ok(String::new()))
        }

        pub(crate) fn calls(&self) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Invocations of one tmux subcommand.
        pub(crate) fn calls_to(&self, subcommand: &str) -> Vec<Vec<String>> {
            self.calls()
                .into_iter()
                .filter(|c| c.first().map(String::as_str) == Some(subcommand))
                .collect()
        }
    }

    impl TmuxCommandRunner for MockRunner {
        fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(args.iter().map(|a| a.to_string()).collect());
            (self.respond)(args)
        }
    }
}
