//! Capability Resolver: polymorphic text injection and running-state probing.
//!
//! A session surface declares which optional capabilities it supports. The
//! resolver walks them in a fixed priority order; a capability the surface
//! does not expose is an ordinary negative, not an error.

use crate::error::{HostError, InjectError, InjectStrategy};
use crate::types::WidgetId;

/// Direct write to the session's raw transport (tty connector, pane input).
pub trait RawTransport {
    fn write(&self, text: &str) -> Result<(), HostError>;
}

/// "Type text" as if entered by the user.
pub trait TextTyper {
    fn type_text(&self, text: &str) -> Result<(), HostError>;
}

/// "Paste text" through the surface's paste path.
pub trait TextPaster {
    fn paste_text(&self, text: &str) -> Result<(), HostError>;
}

/// Live check of whether a command is executing in the session.
pub trait RunningProbe {
    fn is_command_running(&self) -> Result<bool, HostError>;
}

/// The live interactive surface of one session.
///
/// `execute` and `contains_focus` are mandatory; everything else is an
/// optional capability, absent by default.
pub trait SessionSurface: Send + Sync {
    fn widget(&self) -> &WidgetId;

    /// Send `command` to the session's shell for execution.
    fn execute(&self, command: &str) -> Result<(), HostError>;

    /// Whether the focus owner `focus` lies within this surface.
    fn contains_focus(&self, focus: &WidgetId) -> bool;

    fn raw_transport(&self) -> Option<&dyn RawTransport> {
        None
    }

    fn text_typer(&self) -> Option<&dyn TextTyper> {
        None
    }

    fn text_paster(&self) -> Option<&dyn TextPaster> {
        None
    }

    fn running_probe(&self) -> Option<&dyn RunningProbe> {
        None
    }
}

/// Inject `text` with the first capability the surface exposes.
///
/// Priority: raw transport, then type-text, then paste-text. The first
/// available strategy decides the outcome.
pub fn try_inject_text(
    surface: &dyn SessionSurface,
    text: &str,
) -> Result<InjectStrategy, InjectError> {
    if let Some(transport) = surface.raw_transport() {
        return attempt(InjectStrategy::RawTransport, || transport.write(text));
    }
    if let Some(typer) = surface.text_typer() {
        return attempt(InjectStrategy::TypeText, || typer.type_text(text));
    }
    if let Some(paster) = surface.text_paster() {
        return attempt(InjectStrategy::PasteText, || paster.paste_text(text));
    }
    Err(InjectError::Unavailable)
}

fn attempt(
    strategy: InjectStrategy,
    op: impl FnOnce() -> Result<(), HostError>,
) -> Result<InjectStrategy, InjectError> {
    op().map(|()| strategy)
        .map_err(|source| InjectError::Failed { strategy, source })
}

/// Boolean form of [`try_inject_text`]. Never fails; problems are logged.
pub fn inject_text(surface: &dyn SessionSurface, text: &str) -> bool {
    match try_inject_text(surface, text) {
        Ok(strategy) => {
            tracing::debug!(widget = %surface.widget(), %strategy, "injected text");
            true
        }
        Err(InjectError::Unavailable) => {
            tracing::debug!(widget = %surface.widget(), "no text injection capability");
            false
        }
        Err(e) => {
            tracing::warn!(widget = %surface.widget(), "failed to inject text: {e}");
            false
        }
    }
}

/// Best-effort live running check. `None` when the surface exposes no
/// probe or the probe fails; callers fall back to cached state.
pub fn probe_running_state(surface: &dyn SessionSurface) -> Option<bool> {
    let probe = surface.running_probe()?;
    match probe.is_command_running() {
        Ok(running) => Some(running),
        Err(e) => {
            tracing::debug!(widget = %surface.widget(), "running probe failed: {e}");
            None
        }
    }
}
