//! TOML configuration file.
//!
//! Precedence: CLI flags > config file > built-in defaults. A missing file at
//! the default location is not an error; a missing `--config` file is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use idelink_core::plan::DEFAULT_INLINE_LIMIT;
use idelink_core::remap::{DEFAULT_DEBOUNCE, DEFAULT_NEWLINE_SEQUENCE};
use idelink_core::session::DEFAULT_LABEL;
use idelink_core::{SessionConfig, ShellFamily};
use idelink_tmux::SurfaceCapabilities;

pub const DEFAULT_PORT_ENV_VAR: &str = "IDELINK_SERVER_PORT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Label of the companion window.
    pub label: String,
    pub shell: ShellFamily,
    /// Command `idelink launch` runs; extra CLI arguments are appended.
    pub companion_command: String,
    pub port_env_var: String,
    /// Loopback TCP port for the control protocol. `0` picks a free port;
    /// unset disables the TCP listener.
    pub tcp_port: Option<u16>,
    pub log_level: Option<String>,
    pub poll_interval_ms: u64,
    /// Workspace roots previews may be opened under. Empty means the
    /// daemon's working directory.
    pub workspaces: Vec<PathBuf>,
    pub tmux: TmuxConfig,
    pub remap: RemapConfig,
    pub planner: PlannerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            shell: ShellFamily::host_default(),
            companion_command: "opencode".to_string(),
            port_env_var: DEFAULT_PORT_ENV_VAR.to_string(),
            tcp_port: None,
            log_level: None,
            poll_interval_ms: 500,
            workspaces: Vec::new(),
            tmux: TmuxConfig::default(),
            remap: RemapConfig::default(),
            planner: PlannerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TmuxConfig {
    pub bin: String,
    /// `tmux -S` socket; unset uses the default server.
    pub socket_path: Option<String>,
    /// tmux session holding the companion and preview windows.
    pub session: String,
    pub capabilities: SurfaceCapabilities,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            bin: "tmux".to_string(),
            socket_path: None,
            session: "idelink".to_string(),
            capabilities: SurfaceCapabilities::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemapConfig {
    pub sequence: String,
    pub debounce_ms: u64,
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            sequence: DEFAULT_NEWLINE_SEQUENCE.to_string(),
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    /// Longer commands go through a script file.
    pub inline_limit: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            inline_limit: DEFAULT_INLINE_LIMIT,
        }
    }
}

impl Config {
    /// Load from `explicit`, or from the default location if it exists.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            label: self.label.clone(),
            remap_sequence: self.remap.sequence.clone(),
            debounce: Duration::from_millis(self.remap.debounce_ms),
        }
    }
}

/// `$XDG_CONFIG_HOME/idelink/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("idelink").join("config.toml"))
}
