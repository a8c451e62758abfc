//! Command Script Planner.
//!
//! Turns a raw command string into something the session's shell can
//! execute. Single-line commands go through as-is; multi-line or very long
//! commands are written to a temporary script which the plan then invokes.
//! A plan carries a cleanup action for the case where dispatch fails after
//! the plan was produced.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::ShellFamily;

/// Default environment variable carrying the control-protocol port.
pub const DEFAULT_PORT_ENV_VAR: &str = "IDELINK_SERVER_PORT";

/// Commands longer than this are materialized as a script.
pub const DEFAULT_INLINE_LIMIT: usize = 1024;

type Cleanup = Box<dyn FnOnce() + Send>;

/// One launch attempt's executable command plus its rollback action.
pub struct CommandPlan {
    command: String,
    cleanup: Option<Cleanup>,
}

impl CommandPlan {
    /// A plan with nothing to clean up.
    pub fn inline(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cleanup: None,
        }
    }

    pub fn with_cleanup(command: impl Into<String>, cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            command: command.into(),
            cleanup: Some(Box::new(cleanup)),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Roll back preparation after a failed dispatch. Safe to call any
    /// number of times; only the first call does anything.
    pub fn cleanup_on_failure(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl std::fmt::Debug for CommandPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPlan")
            .field("command", &self.command)
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

pub trait CommandPlanner: Send + Sync {
    /// `None` when the command cannot be prepared.
    fn build_plan(&self, raw: &str) -> Option<CommandPlan>;
}

// ─── Script planner ──────────────────────────────────────────────

/// Planner that materializes long commands as shell scripts.
pub struct ScriptPlanner {
    shell: ShellFamily,
    inline_limit: usize,
    script_dir: Option<PathBuf>,
    scripts: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScriptPlanner {
    pub fn new(shell: ShellFamily) -> Self {
        Self {
            shell,
            inline_limit: DEFAULT_INLINE_LIMIT,
            script_dir: None,
            scripts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_inline_limit(mut self, limit: usize) -> Self {
        self.inline_limit = limit;
        self
    }

    /// Write scripts into `dir` instead of the system temp directory.
    #[must_use]
    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = Some(dir.into());
        self
    }

    pub fn shell(&self) -> ShellFamily {
        self.shell
    }

    /// Scripts created and not yet removed.
    pub fn live_scripts(&self) -> Vec<PathBuf> {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove every remaining script. Called when the workspace closes.
    pub fn cleanup_all(&self) -> usize {
        let paths: Vec<PathBuf> = std::mem::take(
            &mut *self.scripts.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut removed = 0;
        for path in paths {
            if remove_script(&path) {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "removed temporary command scripts");
        }
        removed
    }

    fn needs_script(&self, raw: &str) -> bool {
        raw.contains('\n') || raw.len() > self.inline_limit
    }

    fn materialize(&self, raw: &str) -> std::io::Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("idelink-").suffix(script_extension(self.shell));
        let mut file = match &self.script_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(script_body(self.shell, raw).as_bytes())?;
        file.flush()?;
        let path = file.into_temp_path().keep().map_err(|e| e.error)?;
        Ok(path)
    }
}

impl CommandPlanner for ScriptPlanner {
    fn build_plan(&self, raw: &str) -> Option<CommandPlan> {
        let raw = raw.trim_end();
        if raw.trim().is_empty() {
            tracing::warn!("refusing to plan an empty command");
            return None;
        }
        if !self.needs_script(raw) {
            return Some(CommandPlan::inline(raw));
        }

        let path = match self.materialize(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("failed to write command script: {e}");
                return None;
            }
        };
        tracing::debug!(path = %path.display(), "materialized command script");

        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.clone());

        let command = script_invocation(self.shell, &path);
        let scripts = Arc::clone(&self.scripts);
        Some(CommandPlan::with_cleanup(command, move || {
            scripts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|p| p != &path);
            remove_script(&path);
        }))
    }
}

fn remove_script(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to remove command script: {e}");
            false
        }
    }
}

fn script_extension(shell: ShellFamily) -> &'static str {
    match shell {
        ShellFamily::Posix => ".sh",
        ShellFamily::Cmd => ".cmd",
        ShellFamily::PowerShell => ".ps1",
    }
}

fn script_body(shell: ShellFamily, raw: &str) -> String {
    match shell {
        ShellFamily::Posix => format!("#!/bin/sh\n{}\n", raw.trim_end()),
        ShellFamily::Cmd => {
            let lines: Vec<&str> = raw.trim_end().lines().collect();
            format!("@echo off\r\n{}\r\n", lines.join("\r\n"))
        }
        ShellFamily::PowerShell => format!("{}\n", raw.trim_end()),
    }
}

fn script_invocation(shell: ShellFamily, path: &Path) -> String {
    let path = path.to_string_lossy();
    match shell {
        ShellFamily::Posix => format!("sh {}", posix_quote(&path)),
        ShellFamily::Cmd => format!("call \"{path}\""),
        ShellFamily::PowerShell => format!("& '{}'", path.replace('\'', "''")),
    }
}

/// Single-quote `s` for a POSIX shell.
pub fn posix_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

// ─── Launch environment ──────────────────────────────────────────

/// Prefix `command` with an assignment of the control-protocol port.
///
/// Without a usable port (`None` or `0`) the command is returned as-is.
pub fn with_port_env(command: &str, port: Option<u16>, shell: ShellFamily, var: &str) -> String {
    let Some(port) = port.filter(|p| *p > 0) else {
        return command.to_string();
    };
    match shell {
        ShellFamily::Posix => format!("export {var}={port} && {command}"),
        ShellFamily::Cmd => format!("set {var}={port} && {command}"),
        ShellFamily::PowerShell => format!("$env:{var}='{port}'; {command}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_passes_through() {
        let planner = ScriptPlanner::new(ShellFamily::Posix);
        let plan = planner.build_plan("opencode --port 3 \n").expect("plan");
        assert_eq!(plan.command(), "opencode --port 3");
        assert!(planner.live_scripts().is_empty());
    }

    #[test]
    fn blank_command_is_rejected() {
        let planner = ScriptPlanner::new(ShellFamily::Posix);
        assert!(planner.build_plan("   ").is_none());
    }

    #[test]
    fn multi_line_becomes_script_and_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let planner = ScriptPlanner::new(ShellFamily::Posix).with_script_dir(dir.path());
        let mut plan = planner.build_plan("cd /work\nrun --now").expect("plan");

        let scripts = planner.live_scripts();
        assert_eq!(scripts.len(), 1);
        let script = &scripts[0];
        assert!(script.exists());
        assert_eq!(script.extension().and_then(|e| e.to_str()), Some("sh"));
        let body = std::fs::read_to_string(script).expect("read script");
        assert_eq!(body, "#!/bin/sh\ncd /work\nrun --now\n");
        assert!(plan.command().starts_with("sh '"));

        plan.cleanup_on_failure();
        assert!(!script.exists());
        assert!(planner.live_scripts().is_empty());
        plan.cleanup_on_failure();
    }

    #[test]
    fn long_command_uses_script() {
        let dir = tempfile::tempdir().expect("tempdir");
        let planner = ScriptPlanner::new(ShellFamily::PowerShell)
            .with_script_dir(dir.path())
            .with_inline_limit(8);
        let plan = planner.build_plan("Write-Output 'hello world'").expect("plan");
        assert!(plan.command().starts_with("& '"));
        assert!(plan.command().ends_with(".ps1'"));
    }

    #[test]
    fn cleanup_all_removes_remaining_scripts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let planner = ScriptPlanner::new(ShellFamily::Cmd).with_script_dir(dir.path());
        let _a = planner.build_plan("echo a\necho b").expect("plan a");
        let _b = planner.build_plan("echo c\necho d").expect("plan b");
        let scripts = planner.live_scripts();
        assert_eq!(scripts.len(), 2);

        assert_eq!(planner.cleanup_all(), 2);
        assert!(scripts.iter().all(|p| !p.exists()));
        assert_eq!(planner.cleanup_all(), 0);
    }

    #[test]
    fn cmd_script_uses_crlf() {
        assert_eq!(
            script_body(ShellFamily::Cmd, "echo a\necho b\n"),
            "@echo off\r\necho a\r\necho b\r\n"
        );
    }

    #[test]
    fn posix_quote_escapes_single_quotes() {
        assert_eq!(posix_quote("/tmp/it's.sh"), r"'/tmp/it'\''s.sh'");
    }

    #[test]
    fn port_env_per_shell_family() {
        let var = DEFAULT_PORT_ENV_VAR;
        assert_eq!(
            with_port_env("opencode", Some(4123), ShellFamily::Posix, var),
            "export IDELINK_SERVER_PORT=4123 && opencode"
        );
        assert_eq!(
            with_port_env("opencode", Some(4123), ShellFamily::Cmd, var),
            "set IDELINK_SERVER_PORT=4123 && opencode"
        );
        assert_eq!(
            with_port_env("opencode", Some(4123), ShellFamily::PowerShell, var),
            "$env:IDELINK_SERVER_PORT='4123'; opencode"
        );
    }

    #[test]
    fn port_env_omitted_without_valid_port() {
        let var = DEFAULT_PORT_ENV_VAR;
        assert_eq!(with_port_env("opencode", None, ShellFamily::Posix, var), "opencode");
        assert_eq!(with_port_env("opencode", Some(0), ShellFamily::Cmd, var), "opencode");
    }
}
