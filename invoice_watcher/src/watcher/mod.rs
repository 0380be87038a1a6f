//! # The invoice watcher
//!
//! [`InvoiceWatcher`] wires the moving parts together:
//!
//! * the [`TriggerHandlers`] listen for new blocks, received outputs and new invoices on the [`EventBus`], and
//!   enqueue the invoices concerned;
//! * the [`Poller`] enqueues every pending invoice on a fixed interval;
//! * the [`Dispatcher`] runs one reconciliation loop per enqueued invoice, never more than one per invoice at a
//!   time.
//!
//! Call [`InvoiceWatcher::start`] to spawn these tasks, and [`WatcherHandle::stop`] to shut them down again.
mod dispatcher;
mod poller;
mod queue;
mod reconciler;
mod triggers;

use std::sync::Arc;

pub use dispatcher::Dispatcher;
use log::*;
pub use poller::{enqueue_pending, Poller};
pub use queue::{watch_queue, InFlightGuard, InFlightInvoices, WatchQueue, WatchRequests};
pub use reconciler::{InvoiceReconciler, KnownStates, LoopState, PassResult, UnfinishedWrites};
use tokio::task::JoinHandle;
pub use triggers::TriggerHandlers;

use crate::{
    config::WatcherConfig,
    events::EventBus,
    shutdown::{shutdown_channel, ShutdownTrigger},
    traits::{CoinSource, InvoiceStore},
};

pub struct InvoiceWatcher {
    config: WatcherConfig,
    store: Arc<dyn InvoiceStore>,
    coin_source: Arc<dyn CoinSource>,
    bus: EventBus,
}

impl InvoiceWatcher {
    pub fn new(
        config: WatcherConfig,
        store: Arc<dyn InvoiceStore>,
        coin_source: Arc<dyn CoinSource>,
        bus: EventBus,
    ) -> Self {
        Self { config, store, coin_source, bus }
    }

    /// Subscribes to the trigger events and spawns the dispatcher, the poller and the trigger handlers. Must be
    /// called from within a tokio runtime.
    pub fn start(self) -> WatcherHandle {
        let (trigger, shutdown) = shutdown_channel();
        let (queue, requests) = watch_queue();
        let in_flight = InFlightInvoices::default();
        let triggers = TriggerHandlers::new(&self.bus, self.store.clone(), queue.clone());
        let reconciler = InvoiceReconciler::new(
            self.store.clone(),
            self.coin_source,
            self.bus,
            self.config.retry,
            shutdown.clone(),
        );
        let max_concurrent = self.config.max_concurrent_invoices;
        let dispatcher = Dispatcher::new(requests, in_flight.clone(), reconciler, max_concurrent, shutdown.clone());
        let poller = Poller::new(self.store, queue.clone(), self.config.poll_interval, shutdown.clone());
        let mut tasks = vec![tokio::spawn(dispatcher.run()), tokio::spawn(poller.run())];
        tasks.extend(triggers.start_handlers(shutdown));
        info!("👀️ Invoice watcher started");
        WatcherHandle { trigger, queue, in_flight, tasks }
    }
}

/// Controls a running [`InvoiceWatcher`].
pub struct WatcherHandle {
    trigger: ShutdownTrigger,
    queue: WatchQueue,
    in_flight: InFlightInvoices,
    tasks: Vec<JoinHandle<()>>,
}

impl WatcherHandle {
    /// A queue for requesting reconciliation of specific invoices directly.
    pub fn queue(&self) -> WatchQueue {
        self.queue.clone()
    }

    /// The invoices that currently have a reconciliation loop.
    pub fn in_flight(&self) -> &InFlightInvoices {
        &self.in_flight
    }

    /// Signals shutdown and waits for every background task to finish. Reconciliation loops finish the pass they are
    /// in; no pass is interrupted half-way through its writes.
    pub async fn stop(self) {
        info!("👀️ Stopping the invoice watcher");
        self.trigger.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("👀️ A watcher task did not shut down cleanly. {e}");
            }
        }
        info!("👀️ Invoice watcher stopped");
    }
}
