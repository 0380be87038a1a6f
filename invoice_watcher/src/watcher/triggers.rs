//! Turns the consumed bus events into watch requests.
//!
//! | Event                   | Effect                                                |
//! |-------------------------|-------------------------------------------------------|
//! | [`NewBlockEvent`]       | every pending invoice is enqueued                     |
//! | [`TxOutReceivedEvent`]  | the invoice owning the output script is enqueued      |
//! | [`InvoiceCreatedEvent`] | the new invoice is enqueued                           |
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::task::JoinHandle;

use crate::{
    events::{EventBus, EventHandler, Handler, InvoiceCreatedEvent, NewBlockEvent, TxOutReceivedEvent},
    shutdown::Shutdown,
    traits::InvoiceStore,
    watcher::{poller::enqueue_pending, WatchQueue},
};

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct TriggerHandlers {
    on_new_block: EventHandler<NewBlockEvent>,
    on_tx_out_received: EventHandler<TxOutReceivedEvent>,
    on_invoice_created: EventHandler<InvoiceCreatedEvent>,
}

impl TriggerHandlers {
    /// Subscribes to the trigger events. Events published from here on are handled once the handlers are started.
    pub fn new(bus: &EventBus, store: Arc<dyn InvoiceStore>, queue: WatchQueue) -> Self {
        let on_new_block: Handler<NewBlockEvent> = {
            let store = store.clone();
            let queue = queue.clone();
            Arc::new(move |ev: NewBlockEvent| {
                let store = store.clone();
                let queue = queue.clone();
                Box::pin(async move {
                    debug!("📬️ New block on {}. Enqueuing pending invoices.", ev.network);
                    enqueue_pending(store.as_ref(), &queue).await;
                }) as HandlerFuture
            })
        };
        let on_tx_out_received: Handler<TxOutReceivedEvent> = {
            let queue = queue.clone();
            Arc::new(move |ev: TxOutReceivedEvent| {
                let store = store.clone();
                let queue = queue.clone();
                Box::pin(async move {
                    match store.resolve_invoice_by_script(&ev.script_pub_key, &ev.network).await {
                        Ok(Some(id)) => {
                            debug!("📬️ Output received on {} for invoice {id}", ev.network);
                            queue.enqueue(id);
                        },
                        Ok(None) => {
                            trace!("📬️ Output to {} on {} belongs to no invoice", ev.script_pub_key, ev.network)
                        },
                        Err(e) => warn!("📬️ Could not resolve the invoice for script {}. {e}", ev.script_pub_key),
                    }
                }) as HandlerFuture
            })
        };
        let on_invoice_created: Handler<InvoiceCreatedEvent> = Arc::new(move |ev: InvoiceCreatedEvent| {
            let queue = queue.clone();
            Box::pin(async move {
                debug!("📬️ Invoice {} was created", ev.invoice_id);
                queue.enqueue(ev.invoice_id);
            }) as HandlerFuture
        });
        Self {
            on_new_block: EventHandler::new(bus.subscribe(), on_new_block),
            on_tx_out_received: EventHandler::new(bus.subscribe(), on_tx_out_received),
            on_invoice_created: EventHandler::new(bus.subscribe(), on_invoice_created),
        }
    }

    pub fn start_handlers(self, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.on_new_block.start_handler(shutdown.clone())),
            tokio::spawn(self.on_tx_out_received.start_handler(shutdown.clone())),
            tokio::spawn(self.on_invoice_created.start_handler(shutdown)),
        ]
    }
}
