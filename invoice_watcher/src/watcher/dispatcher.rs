use std::sync::Arc;

use log::*;
use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinSet},
};

use crate::{
    db_types::InvoiceId,
    shutdown::Shutdown,
    watcher::{reconciler::InvoiceReconciler, InFlightInvoices, WatchRequests},
};

/// Pulls invoice ids off the watch queue and runs one reconciliation loop per id.
///
/// An id that already has a loop is dropped; the running loop will pick up whatever prompted the request, or the
/// poller will on its next tick.
pub struct Dispatcher {
    requests: WatchRequests,
    in_flight: InFlightInvoices,
    reconciler: InvoiceReconciler,
    slots: Option<Arc<Semaphore>>,
    shutdown: Shutdown,
}

impl Dispatcher {
    pub fn new(
        requests: WatchRequests,
        in_flight: InFlightInvoices,
        reconciler: InvoiceReconciler,
        max_concurrent_invoices: Option<usize>,
        shutdown: Shutdown,
    ) -> Self {
        let slots = max_concurrent_invoices.map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self { requests, in_flight, reconciler, slots, shutdown }
    }

    /// Runs until shutdown is signalled or every [`crate::watcher::WatchQueue`] has been dropped, then waits for all
    /// running loops to finish.
    pub async fn run(mut self) {
        info!("👀️ Dispatcher started");
        let mut loops = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                Some(result) = loops.join_next(), if !loops.is_empty() => log_loop_exit(result),
                request = self.requests.next() => match request {
                    Some(id) => self.dispatch(&mut loops, id),
                    None => {
                        debug!("👀️ The watch queue has closed");
                        break;
                    },
                },
            }
        }
        info!("👀️ Dispatcher is stopping. Waiting for {} reconciliation loop(s) to finish", loops.len());
        while let Some(result) = loops.join_next().await {
            log_loop_exit(result);
        }
        info!("👀️ Dispatcher has stopped");
    }

    fn dispatch(&self, loops: &mut JoinSet<()>, id: InvoiceId) {
        let guard = match self.in_flight.try_claim(&id) {
            Some(guard) => guard,
            None => {
                debug!("👀️ Invoice {id} is already being watched");
                return;
            },
        };
        debug!("👀️ Dispatching invoice {id}");
        let reconciler = self.reconciler.clone();
        let slots = self.slots.clone();
        let shutdown = self.shutdown.clone();
        loops.spawn(async move {
            let _guard = guard;
            let _permit = match slots {
                Some(slots) => tokio::select! {
                    biased;
                    _ = shutdown.wait() => return,
                    permit = slots.acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                },
                None => None,
            };
            reconciler.watch(id).await;
        });
    }
}

fn log_loop_exit(result: Result<(), JoinError>) {
    match result {
        Ok(()) => {},
        Err(e) if e.is_panic() => error!("👀️ A reconciliation loop panicked. {e}"),
        Err(e) => warn!("👀️ A reconciliation loop was cancelled. {e}"),
    }
}
