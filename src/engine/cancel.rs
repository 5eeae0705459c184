// src/engine/cancel.rs

//! Cancellation signal delivered to a running poller.
//!
//! The only input that may reach an execution from outside its worker. The
//! handle side is cloneable and can be fired from anywhere; the poller only
//! observes it between client calls.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct CancelListener {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelListener) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelListener { rx })
}

impl CancelHandle {
    /// Request cancellation. Repeated calls are harmless.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> CancelListener {
        CancelListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelListener {
    /// A listener that never fires.
    pub fn never() -> Self {
        let (handle, listener) = cancel_pair();
        // Dropping the sender is fine: `cancelled()` parks forever once the
        // channel is closed without a request.
        drop(handle);
        listener
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
