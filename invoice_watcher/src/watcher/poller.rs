use std::{sync::Arc, time::Duration};

use log::*;
use tokio::time::MissedTickBehavior;

use crate::{shutdown::Shutdown, traits::InvoiceStore, watcher::WatchQueue};

/// Periodically re-enqueues every pending invoice, in case a trigger event was missed. The first poll happens as
/// soon as the poller starts.
pub struct Poller {
    store: Arc<dyn InvoiceStore>,
    queue: WatchQueue,
    interval: Duration,
    shutdown: Shutdown,
}

impl Poller {
    pub fn new(store: Arc<dyn InvoiceStore>, queue: WatchQueue, interval: Duration, shutdown: Shutdown) -> Self {
        Self { store, queue, interval, shutdown }
    }

    pub async fn run(self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("🕰️ Pending invoice poller started. Polling every {}s", self.interval.as_secs());
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                _ = timer.tick() => {
                    self.poll_once().await;
                },
            }
        }
        info!("🕰️ Pending invoice poller has stopped");
    }

    /// Enqueues every pending invoice once. Returns the number of invoices enqueued.
    pub async fn poll_once(&self) -> usize {
        enqueue_pending(self.store.as_ref(), &self.queue).await
    }
}

/// Enqueues every invoice the store reports as pending. Store failures are logged and count as zero invoices.
pub async fn enqueue_pending(store: &dyn InvoiceStore, queue: &WatchQueue) -> usize {
    match store.fetch_pending_invoices().await {
        Ok(ids) => {
            let count = ids.into_iter().filter(|id| queue.enqueue(id.clone())).count();
            debug!("🕰️ Enqueued {count} pending invoice(s)");
            count
        },
        Err(e) => {
            error!("🕰️ Could not fetch the pending invoices. {e}");
            0
        },
    }
}
