//! TmuxWindowInfo, list-windows format string, and parser.

use idelink_core::{ContainerId, RunState, SessionRef, WidgetId};
use serde::{Deserialize, Serialize};

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;

/// Window option carrying the companion identity tag.
pub const TAG_OPTION: &str = "@idelink";

/// Window option carrying the cached run state.
pub const RUN_STATE_OPTION: &str = "@idelink_run";

/// Tab-delimited format string for `tmux list-windows -F`. Pane fields
/// refer to the window's active pane.
pub const LIST_WINDOWS_FORMAT: &str = "#{window_id}\t#{window_name}\t#{pane_id}\t#{pane_current_command}\t#{pane_current_path}\t#{pane_dead}\t#{window_active}\t#{session_attached}\t#{@idelink}\t#{@idelink_run}";

/// Foreground commands that mean "the shell is idle at its prompt".
pub const DEFAULT_SHELLS: &[&str] = &[
    "sh", "bash", "zsh", "fish", "dash", "ksh", "mksh", "tcsh", "csh", "nu", "pwsh", "login",
];

/// One window of the managed tmux session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TmuxWindowInfo {
    pub window_id: String,
    pub window_name: String,
    pub pane_id: String,
    pub current_cmd: String,
    pub current_path: String,
    pub pane_dead: bool,
    pub active: bool,
    pub session_attached: bool,
    pub tagged: bool,
    pub run_state: RunState,
}

impl TmuxWindowInfo {
    pub fn session_ref(&self) -> SessionRef {
        SessionRef {
            widget: WidgetId::new(&self.pane_id),
            container: ContainerId::new(&self.window_id),
            label: self.window_name.clone(),
        }
    }

    pub fn is_command_running(&self, shells: &[String]) -> bool {
        pane_is_running(self.pane_dead, &self.current_cmd, shells)
    }
}

/// A live pane runs a command unless its foreground process is a shell.
pub fn pane_is_running(pane_dead: bool, current_cmd: &str, shells: &[String]) -> bool {
    if pane_dead {
        return false;
    }
    // Login shells show up as "-zsh".
    let cmd = current_cmd.trim().trim_start_matches('-');
    !cmd.is_empty() && !shells.iter().any(|s| s == cmd)
}

pub fn default_shells() -> Vec<String> {
    DEFAULT_SHELLS.iter().map(|s| s.to_string()).collect()
}

/// Execute `tmux list-windows` for `session` and parse the output.
pub fn list_windows(
    runner: &impl TmuxCommandRunner,
    session: &str,
) -> Result<Vec<TmuxWindowInfo>, TmuxError> {
    let target = format!("={session}");
    let output = runner.run(&["list-windows", "-t", &target, "-F", LIST_WINDOWS_FORMAT])?;
    parse_list_windows_output(&output)
}

/// Parse the raw output of `tmux list-windows -F <FORMAT>`.
pub fn parse_list_windows_output(output: &str) -> Result<Vec<TmuxWindowInfo>, TmuxError> {
    let mut windows = Vec::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        windows.push(parse_line(line, idx + 1)?);
    }
    Ok(windows)
}

fn parse_line(line: &str, line_num: usize) -> Result<TmuxWindowInfo, TmuxError> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 8 {
        return Err(TmuxError::ParseError {
            line_num,
            detail: format!(
                "expected at least 8 tab-separated fields, got {}",
                parts.len()
            ),
        });
    }

    Ok(TmuxWindowInfo {
        window_id: parts[0].to_string(),
        window_name: parts[1].to_string(),
        pane_id: parts[2].to_string(),
        current_cmd: parts[3].to_string(),
        current_path: parts[4].to_string(),
        pane_dead: parse_bool(parts[5]),
        active: parse_bool(parts[6]),
        session_attached: parse_attached(parts[7]),
        tagged: parts.get(8).is_some_and(|s| parse_bool(s)),
        run_state: parts.get(9).map_or(RunState::Unknown, |s| parse_run_state(s)),
    })
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim(), "1" | "true")
}

/// `session_attached` is a client count.
fn parse_attached(s: &str) -> bool {
    s.trim().parse::<u32>().is_ok_and(|n| n > 0)
}

pub fn parse_run_state(s: &str) -> RunState {
    match s.trim() {
        "running" => RunState::Running,
        "idle" => RunState::Idle,
        _ => RunState::Unknown,
    }
}

/// Option value for `state`; `None` means "unset the option".
pub fn run_state_value(state: RunState) -> Option<&'static str> {
    match state {
        RunState::Running => Some("running"),
        RunState::Idle => Some("idle"),
        RunState::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::MockRunner;

    #[test]
    fn parse_tagged_window() {
        let line = "@3\tCompanion\t%5\topencode\t/proj\t0\t1\t1\t1\trunning";
        let w = parse_line(line, 1).expect("should parse");
        assert_eq!(w.window_id, "@3");
        assert_eq!(w.window_name, "Companion");
        assert_eq!(w.pane_id, "%5");
        assert_eq!(w.current_cmd, "opencode");
        assert_eq!(w.current_path, "/proj");
        assert!(!w.pane_dead);
        assert!(w.active);
        assert!(w.session_attached);
        assert!(w.tagged);
        assert_eq!(w.run_state, RunState::Running);
    }

    #[test]
    fn unset_options_parse_as_untagged_unknown() {
        let line = "@0\tzsh\t%0\tzsh\t/home\t0\t0\t0\t\t";
        let w = parse_line(line, 1).expect("should parse");
        assert!(!w.tagged);
        assert_eq!(w.run_state, RunState::Unknown);
        assert!(!w.session_attached);
    }

    #[test]
    fn multiple_attached_clients() {
        let line = "@0\tzsh\t%0\tzsh\t/home\t0\t1\t2";
        let w = parse_line(line, 1).expect("should parse");
        assert!(w.session_attached);
    }

    #[test]
    fn too_few_fields_error() {
        assert!(matches!(
            parse_line("@0\tzsh", 4),
            Err(TmuxError::ParseError { line_num: 4, .. })
        ));
    }

    #[test]
    fn empty_output() {
        assert!(parse_list_windows_output("\n").expect("parse").is_empty());
    }

    #[test]
    fn session_ref_mapping() {
        let w = parse_line("@3\tCompanion\t%5\tzsh\t/proj\t0\t1\t1\t1\tidle", 1).expect("parse");
        let s = w.session_ref();
        assert_eq!(s.widget, WidgetId::new("%5"));
        assert_eq!(s.container, ContainerId::new("@3"));
        assert_eq!(s.label, "Companion");
    }

    #[test]
    fn running_detection() {
        let shells = default_shells();
        assert!(pane_is_running(false, "opencode", &shells));
        assert!(!pane_is_running(false, "zsh", &shells));
        assert!(!pane_is_running(false, "-bash", &shells));
        assert!(!pane_is_running(true, "opencode", &shells));
        assert!(!pane_is_running(false, "", &shells));
    }

    #[test]
    fn run_state_option_values() {
        for state in [RunState::Running, RunState::Idle] {
            let value = run_state_value(state).expect("value");
            assert_eq!(parse_run_state(value), state);
        }
        assert_eq!(run_state_value(RunState::Unknown), None);
    }

    #[test]
    fn list_windows_targets_exact_session() {
        let runner = MockRunner::new(|_| Ok("@1\tCompanion\t%2\tzsh\t/p\t0\t1\t0\t1\tidle\n".to_string()));
        let windows = list_windows(&runner, "idelink").expect("list");
        assert_eq!(windows.len(), 1);
        let calls = runner.calls_to("list-windows");
        assert_eq!(calls[0][1..3].to_vec(), vec!["-t".to_string(), "=idelink".to_string()]);
    }
}
