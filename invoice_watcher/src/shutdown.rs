//! Process-wide shutdown signal.
//!
//! A [`ShutdownTrigger`] is held by whoever controls the watcher's lifetime; every background task holds a cheap
//! [`Shutdown`] clone and checks it between units of work. Dropping the trigger counts as triggering it.
use tokio::sync::watch;

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, Shutdown { receiver })
}

#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // An error only means that every task has already exited
        let _ = self.sender.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Resolves once shutdown has been triggered. Cancel-safe.
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
