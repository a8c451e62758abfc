//! A tmux pane as a session surface.

use std::sync::Arc;

use idelink_core::capability::{RawTransport, RunningProbe, TextPaster};
use idelink_core::{HostError, SessionSurface, WidgetId};
use serde::{Deserialize, Serialize};

use crate::executor::TmuxCommandRunner;
use crate::window_info::pane_is_running;

const PASTE_BUFFER: &str = "idelink-paste";

/// Which optional capabilities panes expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceCapabilities {
    /// `send-keys -l` straight into the pane.
    pub raw: bool,
    /// Bracketed paste through a tmux buffer.
    pub paste: bool,
    /// Foreground-command probe.
    pub probe: bool,
}

impl Default for SurfaceCapabilities {
    fn default() -> Self {
        Self {
            raw: true,
            paste: true,
            probe: true,
        }
    }
}

pub struct TmuxSurface<R> {
    runner: Arc<R>,
    widget: WidgetId,
    caps: SurfaceCapabilities,
    shells: Arc<[String]>,
}

impl<R: TmuxCommandRunner> TmuxSurface<R> {
    pub fn new(
        runner: Arc<R>,
        widget: WidgetId,
        caps: SurfaceCapabilities,
        shells: Arc<[String]>,
    ) -> Self {
        Self {
            runner,
            widget,
            caps,
            shells,
        }
    }

    fn pane(&self) -> &str {
        self.widget.as_str()
    }

    fn send_literal(&self, text: &str) -> Result<(), HostError> {
        self.runner
            .run(&["send-keys", "-t", self.pane(), "-l", "--", text])?;
        Ok(())
    }
}

impl<R: TmuxCommandRunner> SessionSurface for TmuxSurface<R> {
    fn widget(&self) -> &WidgetId {
        &self.widget
    }

    fn execute(&self, command: &str) -> Result<(), HostError> {
        self.send_literal(command)?;
        self.runner.run(&["send-keys", "-t", self.pane(), "Enter"])?;
        Ok(())
    }

    fn contains_focus(&self, focus: &WidgetId) -> bool {
        *focus == self.widget
    }

    fn raw_transport(&self) -> Option<&dyn RawTransport> {
        self.caps.raw.then_some(self as &dyn RawTransport)
    }

    fn text_paster(&self) -> Option<&dyn TextPaster> {
        self.caps.paste.then_some(self as &dyn TextPaster)
    }

    fn running_probe(&self) -> Option<&dyn RunningProbe> {
        self.caps.probe.then_some(self as &dyn RunningProbe)
    }
}

impl<R: TmuxCommandRunner> RawTransport for TmuxSurface<R> {
    fn write(&self, text: &str) -> Result<(), HostError> {
        self.send_literal(text)
    }
}

impl<R: TmuxCommandRunner> TextPaster for TmuxSurface<R> {
    fn paste_text(&self, text: &str) -> Result<(), HostError> {
        self.runner
            .run(&["set-buffer", "-b", PASTE_BUFFER, "--", text])?;
        // -p: bracketed paste if the application asked for it; -d: drop the buffer.
        self.runner.run(&[
            "paste-buffer",
            "-p",
            "-d",
            "-b",
            PASTE_BUFFER,
            "-t",
            self.pane(),
        ])?;
        Ok(())
    }
}

impl<R: TmuxCommandRunner> RunningProbe for TmuxSurface<R> {
    fn is_command_running(&self) -> Result<bool, HostError> {
        let out = self.runner.run(&[
            "display-message",
            "-p",
            "-t",
            self.pane(),
            "#{pane_dead}\t#{pane_current_command}",
        ])?;
        let line = out.trim_end_matches('\n');
        let (dead, cmd) = line
            .split_once('\t')
            .ok_or_else(|| HostError::Failed(format!("unexpected probe output: {line:?}")))?;
        Ok(pane_is_running(dead.trim() == "1", cmd, &self.shells))
    }
}
