//! Cooperative shutdown
//!
//! The loop checks [`Shutdown::is_triggered`] between ladders and sleeps
//! through [`Shutdown::sleep`], which returns early once shutdown is
//! requested. Nothing interrupts a cycle that is already running.

use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`; `false` if shutdown was requested meanwhile
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }

        let stopped = async {
            // a dropped trigger can never fire
            if self.rx.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = stopped => false,
        }
    }
}
