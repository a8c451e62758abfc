use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Handles ─────────────────────────────────────────────────────

/// Opaque handle of the live interactive surface (a terminal widget, a tmux pane).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(pub String);

/// Opaque handle of the UI slot that holds a widget (a tool-window tab, a tmux window).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl WidgetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One interactive session as enumerated by the session host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub widget: WidgetId,
    pub container: ContainerId,
    /// Human-readable display label of the container.
    pub label: String,
}

// ─── Run state ───────────────────────────────────────────────────

/// Cached knowledge of whether a command is executing in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Unknown,
    Idle,
    Running,
}

impl RunState {
    pub fn from_running(running: bool) -> Self {
        if running { Self::Running } else { Self::Idle }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// A live probe result overrides the cached state; without one the
    /// cached state stands.
    pub fn resolve(self, live: Option<bool>) -> Self {
        live.map_or(self, Self::from_running)
    }
}

/// Metadata the session manager keeps on a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionMarkers {
    /// Identity tag: this container holds the managed companion session.
    pub tagged: bool,
    pub run_state: RunState,
    pub callback_registered: bool,
    pub remap_registered: bool,
}

impl SessionMarkers {
    /// Demote the container to an ordinary session.
    ///
    /// `remap_registered` survives: the key observer stays bound to the
    /// container until the container itself goes away.
    pub fn clear_identity(&mut self) {
        self.tagged = false;
        self.run_state = RunState::Unknown;
        self.callback_registered = false;
    }
}

// ─── Shell family ────────────────────────────────────────────────

/// Shell syntax family of the session's interactive shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellFamily {
    /// sh, bash, zsh, fish, and WSL shells on Windows.
    Posix,
    /// cmd.exe
    Cmd,
    PowerShell,
}

impl ShellFamily {
    /// Family of the platform's default terminal shell.
    pub fn host_default() -> Self {
        if cfg!(windows) { Self::Cmd } else { Self::Posix }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Posix => "posix",
            Self::Cmd => "cmd",
            Self::PowerShell => "powershell",
        }
    }
}

impl Default for ShellFamily {
    fn default() -> Self {
        Self::host_default()
    }
}

impl fmt::Display for ShellFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "posix" | "sh" | "bash" | "zsh" | "wsl" => Ok(Self::Posix),
            "cmd" | "cmd.exe" => Ok(Self::Cmd),
            "powershell" | "pwsh" => Ok(Self::PowerShell),
            _ => Err(format!("unknown shell family: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_probe_overrides_cache() {
        assert_eq!(RunState::Running.resolve(Some(false)), RunState::Idle);
        assert_eq!(RunState::Unknown.resolve(Some(true)), RunState::Running);
    }

    #[test]
    fn cache_stands_without_probe() {
        assert_eq!(RunState::Running.resolve(None), RunState::Running);
        assert_eq!(RunState::Unknown.resolve(None), RunState::Unknown);
        assert!(!RunState::Unknown.is_running());
    }

    #[test]
    fn clear_identity_keeps_remap_flag() {
        let mut markers = SessionMarkers {
            tagged: true,
            run_state: RunState::Running,
            callback_registered: true,
            remap_registered: true,
        };
        markers.clear_identity();
        assert!(!markers.tagged);
        assert_eq!(markers.run_state, RunState::Unknown);
        assert!(!markers.callback_registered);
        assert!(markers.remap_registered);
    }

    #[test]
    fn shell_family_parse() {
        assert_eq!("WSL".parse::<ShellFamily>(), Ok(ShellFamily::Posix));
        assert_eq!("pwsh".parse::<ShellFamily>(), Ok(ShellFamily::PowerShell));
        assert_eq!("cmd".parse::<ShellFamily>(), Ok(ShellFamily::Cmd));
        assert!("tcsh-ish".parse::<ShellFamily>().is_err());
    }

    #[test]
    fn run_state_serde_snake_case() {
        let json = serde_json::to_string(&RunState::Running).expect("serialize");
        assert_eq!(json, "\"running\"");
    }
}
