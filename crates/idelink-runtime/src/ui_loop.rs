//! UiLoop: the single thread every UI effect runs on.

use std::panic::AssertUnwindSafe;

use tokio::sync::{mpsc, oneshot};

use idelink_core::{UiScheduler, UiTask};

pub struct UiLoop {
    tx: mpsc::UnboundedSender<UiTask>,
}

impl UiLoop {
    /// Start the loop thread. It exits once every handle is dropped.
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<UiTask>();
        std::thread::Builder::new()
            .name("idelink-ui".to_string())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    if std::panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        tracing::error!("UI task panicked");
                    }
                }
                tracing::debug!("UI loop stopped");
            })?;
        Ok(Self { tx })
    }

    /// Wait until every task queued before this call has run.
    pub async fn drain(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.invoke_later(Box::new(move || {
            let _ = done_tx.send(());
        }));
        let _ = done_rx.await;
    }
}

impl UiScheduler for UiLoop {
    fn invoke_later(&self, task: UiTask) {
        if self.tx.send(task).is_err() {
            tracing::warn!("UI loop is gone; dropping task");
        }
    }
}
