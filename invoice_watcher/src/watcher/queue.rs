use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::*;
use tokio::sync::mpsc;

use crate::db_types::InvoiceId;

/// Creates a connected queue/request pair. The [`WatchQueue`] half can be cloned freely; the [`WatchRequests`] half
/// is consumed by the dispatcher.
pub fn watch_queue() -> (WatchQueue, WatchRequests) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (WatchQueue { sender }, WatchRequests { receiver })
}

/// Hints that an invoice may need reconciling.
#[derive(Clone, Debug)]
pub struct WatchQueue {
    sender: mpsc::UnboundedSender<InvoiceId>,
}

impl WatchQueue {
    /// Never blocks. Returns false if the dispatcher has already shut down.
    pub fn enqueue(&self, id: InvoiceId) -> bool {
        trace!("👀️ Enqueuing invoice {id}");
        match self.sender.send(id) {
            Ok(()) => true,
            Err(e) => {
                debug!("👀️ Dispatcher has shut down. Invoice {} will not be watched.", e.0);
                false
            },
        }
    }
}

pub struct WatchRequests {
    receiver: mpsc::UnboundedReceiver<InvoiceId>,
}

impl WatchRequests {
    pub async fn next(&mut self) -> Option<InvoiceId> {
        self.receiver.recv().await
    }
}

/// The set of invoices that currently have a reconciliation loop.
///
/// An entry is owned by an [`InFlightGuard`]; the id is released when the guard is dropped, including when the loop
/// that holds it panics.
#[derive(Clone, Debug, Default)]
pub struct InFlightInvoices {
    ids: Arc<Mutex<HashSet<InvoiceId>>>,
}

impl InFlightInvoices {
    /// Claims `id`. Returns `None` if another loop already owns it.
    pub fn try_claim(&self, id: &InvoiceId) -> Option<InFlightGuard> {
        if self.lock().insert(id.clone()) {
            Some(InFlightGuard { registry: self.clone(), id: id.clone() })
        } else {
            None
        }
    }

    pub fn contains(&self, id: &InvoiceId) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<InvoiceId> {
        let mut ids = self.lock().iter().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<InvoiceId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlightInvoices,
    id: InvoiceId,
}

impl InFlightGuard {
    pub fn id(&self) -> &InvoiceId {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
        trace!("👀️ Invoice {} is no longer in flight", self.id);
    }
}
