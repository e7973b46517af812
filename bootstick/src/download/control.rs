//! Cooperative pause and cancellation shared between the workflow and the
//! transfer loop.
//!
//! Nothing is interrupted preemptively. The workflow checks the token
//! between stages, the downloader between chunks. A paused transfer keeps
//! its connection and waits for [`TransferControl::resume`] or cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct TransferControl {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    paused: AtomicBool,
    resumed: Notify,
    cancel: CancellationToken,
}

impl TransferControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("Transfer paused");
        }
    }

    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("Transfer resumed");
        }
        self.inner.resumed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Request cancellation. Idempotent; also releases paused waiters.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Completes once cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }

    /// Block while paused. Returns `false` if cancelled before or during
    /// the wait.
    pub async fn wait_while_paused(&self) -> bool {
        while self.is_paused() && !self.is_cancelled() {
            let resumed = self.inner.resumed.notified();
            if !self.is_paused() {
                break;
            }
            tokio::select! {
                _ = resumed => {}
                _ = self.inner.cancel.cancelled() => {}
            }
        }
        !self.is_cancelled()
    }
}

impl std::fmt::Debug for TransferControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferControl")
            .field("paused", &self.is_paused())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
