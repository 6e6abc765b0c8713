//! Per-run cancellation signal for the detection dispatcher.

use tokio::sync::watch;

/// Creates a linked handle/token pair. The handle is kept by whoever may stop
/// the run; the token is polled by the run itself.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run is cancelled, or once its handle is dropped.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn token_observes_cancel() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());

        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel observed")
            .unwrap();
        assert!(token.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_handle_releases_waiters() {
        let (handle, token) = cancel_pair();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("waiter released");
    }
}
