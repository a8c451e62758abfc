//! Key events and the process-wide key observer hub.
//!
//! Observers are registered with a [`KeyDispatcher`] and stay registered
//! exactly as long as the returned [`KeySubscription`] lives. Dropping the
//! subscription deregisters the observer.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};

use crate::types::WidgetId;

// ─── Events ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Pressed,
    /// A character was produced by the key press.
    Typed,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Enter,
    Char(char),
    /// Any other named key ("tab", "escape", ...).
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        shift: false,
        ctrl: false,
        alt: false,
        meta: false,
    };

    pub const SHIFT: Self = Self {
        shift: true,
        ..Self::NONE
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub kind: KeyKind,
    pub key: Key,
    #[serde(default)]
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(kind: KeyKind, key: Key, modifiers: Modifiers) -> Self {
        Self {
            kind,
            key,
            modifiers,
        }
    }

    pub fn is_enter(&self) -> bool {
        matches!(self.key, Key::Enter)
    }
}

// ─── Dispatcher ──────────────────────────────────────────────────

/// Receives every key event before normal delivery.
///
/// Returns `true` when the event was consumed; later observers and the
/// normal delivery path then never see it.
pub trait KeyObserver: Send + Sync {
    fn on_key(&self, event: &KeyEvent, focus: Option<&WidgetId>) -> bool;
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(u64, Arc<dyn KeyObserver>)>,
}

/// Process-wide hub that fans key events out to registered observers.
#[derive(Clone, Default)]
pub struct KeyDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl KeyDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn KeyObserver>) -> KeySubscription {
        let mut reg = self.lock();
        let id = reg.next_id;
        reg.next_id += 1;
        reg.observers.push((id, observer));
        KeySubscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` with the current focus owner. Observers run in
    /// registration order until one consumes the event.
    pub fn dispatch(&self, event: &KeyEvent, focus: Option<&WidgetId>) -> bool {
        // Snapshot so observers never run under the registry lock.
        let observers: Vec<Arc<dyn KeyObserver>> = self
            .lock()
            .observers
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        observers.iter().any(|o| o.on_key(event, focus))
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped registration of one observer. Dropping it deregisters.
#[must_use = "dropping the subscription deregisters the observer"]
pub struct KeySubscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Drop for KeySubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut reg = registry.lock().unwrap_or_else(PoisonError::into_inner);
            reg.observers.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        hits: AtomicUsize,
        consume: bool,
    }

    impl KeyObserver for Counting {
        fn on_key(&self, _event: &KeyEvent, _focus: Option<&WidgetId>) -> bool {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.consume
        }
    }

    fn counting(consume: bool) -> Arc<Counting> {
        Arc::new(Counting {
            hits: AtomicUsize::new(0),
            consume,
        })
    }

    fn enter() -> KeyEvent {
        KeyEvent::new(KeyKind::Pressed, Key::Enter, Modifiers::NONE)
    }

    #[test]
    fn drop_deregisters() {
        let hub = KeyDispatcher::new();
        let obs = counting(false);
        let sub = hub.register(obs.clone());
        assert_eq!(hub.observer_count(), 1);

        hub.dispatch(&enter(), None);
        drop(sub);
        assert_eq!(hub.observer_count(), 0);
        hub.dispatch(&enter(), None);
        assert_eq!(obs.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn consuming_observer_stops_delivery() {
        let hub = KeyDispatcher::new();
        let first = counting(true);
        let second = counting(false);
        let _a = hub.register(first.clone());
        let _b = hub.register(second.clone());

        assert!(hub.dispatch(&enter(), None));
        assert_eq!(first.hits.load(Ordering::SeqCst), 1);
        assert_eq!(second.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscription_outliving_hub_is_harmless() {
        let hub = KeyDispatcher::new();
        let sub = hub.register(counting(false));
        drop(hub);
        drop(sub);
    }

    #[test]
    fn key_event_json_shape() {
        let event: KeyEvent = serde_json::from_str(
            r#"{"kind":"pressed","key":"enter","modifiers":{"shift":true}}"#,
        )
        .expect("parse");
        assert_eq!(
            event,
            KeyEvent::new(KeyKind::Pressed, Key::Enter, Modifiers::SHIFT)
        );

        let typed: KeyEvent =
            serde_json::from_str(r#"{"kind":"typed","key":{"char":"\r"}}"#).expect("parse");
        assert_eq!(typed.key, Key::Char('\r'));
        assert_eq!(typed.modifiers, Modifiers::NONE);
    }
}
