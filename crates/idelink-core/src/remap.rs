//! Input Remapper: Shift+Enter becomes a literal newline in the session.
//!
//! Terminals submit on Enter and most of them cannot tell Shift+Enter
//! apart. The remapper swallows the reserved combination, asks for a
//! literal newline to be injected, and keeps swallowing the matching
//! typed character until Enter is released.
//!
//! ```text
//! IDLE --press(Shift+Enter)--> SUPPRESSING   (consume, request newline)
//! SUPPRESSING --typed--> SUPPRESSING         (consume, drop)
//! SUPPRESSING --release(Enter)--> IDLE       (consume)
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::capability::{SessionSurface, inject_text};
use crate::keys::{KeyEvent, KeyKind, KeyObserver};
use crate::types::WidgetId;
use crate::ui::UiScheduler;

/// Presses closer together than this collapse into one (key repeat,
/// duplicate delivery through several pipelines).
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// Sequence injected for the reserved combination.
pub const DEFAULT_NEWLINE_SEQUENCE: &str = "\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapState {
    Idle,
    Suppressing,
}

/// What the caller should do with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyDisposition {
    /// Swallow the event; it must not reach the session.
    pub consumed: bool,
    /// Schedule an asynchronous injection of the newline sequence.
    pub inject: bool,
}

impl KeyDisposition {
    const PASS: Self = Self {
        consumed: false,
        inject: false,
    };
    const CONSUME: Self = Self {
        consumed: true,
        inject: false,
    };
    const CONSUME_AND_INJECT: Self = Self {
        consumed: true,
        inject: true,
    };
}

/// Pure per-session remapping state machine.
#[derive(Debug)]
pub struct InputRemapper {
    state: RemapState,
    last_accepted: Option<Instant>,
    debounce: Duration,
}

impl InputRemapper {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: RemapState::Idle,
            last_accepted: None,
            debounce,
        }
    }

    pub fn state(&self) -> RemapState {
        self.state
    }

    /// Feed one event. `in_surface` tells whether the focus owner lies
    /// within the attached session's surface.
    pub fn handle(&mut self, event: &KeyEvent, in_surface: bool, now: Instant) -> KeyDisposition {
        if !in_surface {
            // Focus moved away mid-sequence: never stay stuck suppressing.
            if event.kind == KeyKind::Released && event.is_enter() {
                self.state = RemapState::Idle;
            }
            return KeyDisposition::PASS;
        }

        match event.kind {
            KeyKind::Pressed => {
                if !(event.is_enter() && event.modifiers.shift) {
                    return KeyDisposition::PASS;
                }
                let debounced = self
                    .last_accepted
                    .is_some_and(|last| now.saturating_duration_since(last) < self.debounce);
                if debounced {
                    return KeyDisposition::CONSUME;
                }
                self.last_accepted = Some(now);
                self.state = RemapState::Suppressing;
                KeyDisposition::CONSUME_AND_INJECT
            }
            KeyKind::Typed => match self.state {
                RemapState::Suppressing => KeyDisposition::CONSUME,
                RemapState::Idle => KeyDisposition::PASS,
            },
            KeyKind::Released => {
                if self.state == RemapState::Suppressing && event.is_enter() {
                    self.state = RemapState::Idle;
                    KeyDisposition::CONSUME
                } else {
                    KeyDisposition::PASS
                }
            }
        }
    }
}

impl Default for InputRemapper {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

/// Binds an [`InputRemapper`] to one session surface.
///
/// Registered with the key dispatcher once per session; the injection
/// itself is always deferred to the UI loop, never run inside dispatch.
pub struct RemapObserver {
    surface: Arc<dyn SessionSurface>,
    remapper: Mutex<InputRemapper>,
    sequence: String,
    scheduler: Arc<dyn UiScheduler>,
}

impl RemapObserver {
    pub fn new(
        surface: Arc<dyn SessionSurface>,
        scheduler: Arc<dyn UiScheduler>,
        sequence: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        Self {
            surface,
            remapper: Mutex::new(InputRemapper::new(debounce)),
            sequence: sequence.into(),
            scheduler,
        }
    }

    pub fn widget(&self) -> &WidgetId {
        self.surface.widget()
    }

    pub fn state(&self) -> RemapState {
        self.lock().state()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InputRemapper> {
        self.remapper.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyObserver for RemapObserver {
    fn on_key(&self, event: &KeyEvent, focus: Option<&WidgetId>) -> bool {
        let in_surface = focus.is_some_and(|f| self.surface.contains_focus(f));
        let disposition = self.lock().handle(event, in_surface, Instant::now());

        if disposition.inject {
            let surface = Arc::clone(&self.surface);
            let sequence = self.sequence.clone();
            self.scheduler.invoke_later(Box::new(move || {
                if !inject_text(surface.as_ref(), &sequence) {
                    tracing::warn!(
                        widget = %surface.widget(),
                        "failed to inject Shift+Enter newline sequence"
                    );
                }
            }));
        }

        disposition.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Key, Modifiers};
    use crate::test_support::FakeSurface;
    use crate::ui::QueueScheduler;

    fn shift_enter() -> KeyEvent {
        KeyEvent::new(KeyKind::Pressed, Key::Enter, Modifiers::SHIFT)
    }

    fn typed_cr() -> KeyEvent {
        KeyEvent::new(KeyKind::Typed, Key::Char('\r'), Modifiers::SHIFT)
    }

    fn enter_release() -> KeyEvent {
        KeyEvent::new(KeyKind::Released, Key::Enter, Modifiers::NONE)
    }

    #[test]
    fn full_press_type_release_cycle() {
        let mut remap = InputRemapper::default();
        let t0 = Instant::now();

        let press = remap.handle(&shift_enter(), true, t0);
        assert!(press.consumed && press.inject);
        assert_eq!(remap.state(), RemapState::Suppressing);

        let typed = remap.handle(&typed_cr(), true, t0);
        assert!(typed.consumed && !typed.inject);

        let release = remap.handle(&enter_release(), true, t0);
        assert!(release.consumed);
        assert_eq!(remap.state(), RemapState::Idle);

        // Idle again: typed characters flow through.
        assert_eq!(remap.handle(&typed_cr(), true, t0), KeyDisposition::PASS);
    }

    #[test]
    fn presses_within_debounce_inject_once() {
        let mut remap = InputRemapper::default();
        let t0 = Instant::now();

        let first = remap.handle(&shift_enter(), true, t0);
        let second = remap.handle(&shift_enter(), true, t0 + Duration::from_millis(100));

        assert!(first.inject);
        assert!(second.consumed, "debounced press is still swallowed");
        assert!(!second.inject);
    }

    #[test]
    fn press_after_debounce_injects_again() {
        let mut remap = InputRemapper::default();
        let t0 = Instant::now();
        assert!(remap.handle(&shift_enter(), true, t0).inject);
        assert!(
            remap
                .handle(&shift_enter(), true, t0 + Duration::from_millis(151))
                .inject
        );
    }

    #[test]
    fn plain_enter_passes_through() {
        let mut remap = InputRemapper::default();
        let plain = KeyEvent::new(KeyKind::Pressed, Key::Enter, Modifiers::NONE);
        assert_eq!(
            remap.handle(&plain, true, Instant::now()),
            KeyDisposition::PASS
        );
        assert_eq!(remap.state(), RemapState::Idle);
    }

    #[test]
    fn release_outside_surface_clears_suppression() {
        let mut remap = InputRemapper::default();
        let t0 = Instant::now();
        remap.handle(&shift_enter(), true, t0);
        assert_eq!(remap.state(), RemapState::Suppressing);

        let outside = remap.handle(&enter_release(), false, t0);
        assert!(!outside.consumed, "events outside the surface are never consumed");
        assert_eq!(remap.state(), RemapState::Idle);
    }

    #[test]
    fn events_outside_surface_are_ignored() {
        let mut remap = InputRemapper::default();
        let d = remap.handle(&shift_enter(), false, Instant::now());
        assert_eq!(d, KeyDisposition::PASS);
        assert_eq!(remap.state(), RemapState::Idle);
    }

    #[test]
    fn observer_defers_injection_to_ui_loop() {
        let surface = Arc::new(FakeSurface::new("%7").with_raw());
        let scheduler = Arc::new(QueueScheduler::new());
        let observer = RemapObserver::new(
            surface.clone(),
            scheduler.clone(),
            DEFAULT_NEWLINE_SEQUENCE,
            DEFAULT_DEBOUNCE,
        );
        let focus = WidgetId::new("%7");

        assert!(observer.on_key(&shift_enter(), Some(&focus)));
        assert!(surface.written().is_empty(), "never injected inside dispatch");
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(surface.written(), vec!["raw:\n".to_string()]);
    }

    #[test]
    fn observer_without_focus_does_not_consume() {
        let surface = Arc::new(FakeSurface::new("%7").with_raw());
        let scheduler = Arc::new(QueueScheduler::new());
        let observer =
            RemapObserver::new(surface, scheduler.clone(), "\n", DEFAULT_DEBOUNCE);

        assert!(!observer.on_key(&shift_enter(), None));
        assert!(!observer.on_key(&shift_enter(), Some(&WidgetId::new("%8"))));
        assert_eq!(scheduler.pending(), 0);
    }
}
