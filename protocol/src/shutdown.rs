//! Cooperative cancellation over a `watch` channel.
//!
//! `true` means "stop". A dropped sender is not a stop signal: waiting on a
//! receiver whose sender is gone pends forever.

use tokio::sync::watch;

pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

pub fn is_cancelled(rx: &ShutdownReceiver) -> bool {
    *rx.borrow()
}

/// Resolves once the flag flips to `true`
pub async fn cancelled(rx: &mut ShutdownReceiver) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
