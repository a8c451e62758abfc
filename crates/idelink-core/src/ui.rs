//! UI-affinity scheduling.
//!
//! Focus changes, container selection, preview presentation and remapped
//! newline injection never run inline on the caller's thread. They are
//! handed to a [`UiScheduler`], which runs them in order on a single
//! UI loop.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-continue handoff onto the UI loop.
pub trait UiScheduler: Send + Sync {
    fn invoke_later(&self, task: UiTask);
}

/// A scheduler whose loop is driven explicitly with [`run_pending`].
///
/// Used by embedders that own their event loop, and by tests.
///
/// [`run_pending`]: QueueScheduler::run_pending
#[derive(Default)]
pub struct QueueScheduler {
    queue: Mutex<VecDeque<UiTask>>,
}

impl QueueScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run queued tasks in FIFO order, including tasks queued while
    /// running. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Release the lock before running so tasks may schedule more work.
            let next = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl UiScheduler for QueueScheduler {
    fn invoke_later(&self, task: UiTask) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tasks_are_deferred_until_run() {
        let scheduler = QueueScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        scheduler.invoke_later(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn nested_scheduling_runs_in_same_drain() {
        let scheduler = Arc::new(QueueScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_sched = Arc::clone(&scheduler);
        let o1 = Arc::clone(&order);
        scheduler.invoke_later(Box::new(move || {
            o1.lock().expect("lock").push("outer");
            let o2 = Arc::clone(&o1);
            inner_sched.invoke_later(Box::new(move || {
                o2.lock().expect("lock").push("inner");
            }));
        }));

        assert_eq!(scheduler.run_pending(), 2);
        assert_eq!(*order.lock().expect("lock"), vec!["outer", "inner"]);
    }
}
