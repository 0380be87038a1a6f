use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{
        Address,
        Coin,
        ExceptionStatus,
        Invoice,
        InvoiceId,
        InvoiceStatus,
        NetworkCode,
        Payment,
        ScriptPubKey,
    },
    traits::{InvoiceStore, StoreError},
};

#[derive(Default)]
struct State {
    invoices: BTreeMap<InvoiceId, Invoice>,
    pending: BTreeSet<InvoiceId>,
    status_writes: Vec<(InvoiceId, InvoiceStatus, Option<ExceptionStatus>)>,
    released: Vec<InvoiceId>,
    new_addresses: Vec<(InvoiceId, Address, NetworkCode)>,
    payment_writes: usize,
    fail_next: Option<StoreError>,
    fail_on: HashMap<&'static str, StoreError>,
}

/// An [`InvoiceStore`] that keeps everything in memory and records every write.
#[derive(Default)]
pub struct MemoryInvoiceStore {
    state: Mutex<State>,
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the invoice and marks it as pending.
    pub fn insert(&self, invoice: Invoice) {
        let mut state = self.lock();
        state.pending.insert(invoice.id.clone());
        state.invoices.insert(invoice.id.clone(), invoice);
    }

    /// Deletes the invoice outright, as if it had vanished from the backend.
    pub fn delete(&self, id: &InvoiceId) {
        let mut state = self.lock();
        state.invoices.remove(id);
        state.pending.remove(id);
    }

    /// The next call to the store, whatever it is, fails with `error`.
    pub fn fail_next(&self, error: StoreError) {
        self.lock().fail_next = Some(error);
    }

    /// The next call to `method`, e.g. `"update_invoice_status"`, fails with `error`. Other calls go through.
    pub fn fail_next_call_to(&self, method: &'static str, error: StoreError) {
        self.lock().fail_on.insert(method, error);
    }

    pub fn invoice(&self, id: &InvoiceId) -> Option<Invoice> {
        self.lock().invoices.get(id).cloned()
    }

    pub fn is_pending(&self, id: &InvoiceId) -> bool {
        self.lock().pending.contains(id)
    }

    /// Every status write for the invoice, in order.
    pub fn status_history(&self, id: &InvoiceId) -> Vec<(InvoiceStatus, Option<ExceptionStatus>)> {
        self.lock().status_writes.iter().filter(|(i, _, _)| i == id).map(|(_, s, e)| (*s, *e)).collect()
    }

    pub fn status_writes(&self, id: &InvoiceId) -> usize {
        self.status_history(id).len()
    }

    pub fn released_addresses(&self) -> Vec<InvoiceId> {
        self.lock().released.clone()
    }

    pub fn new_addresses(&self) -> Vec<(InvoiceId, Address, NetworkCode)> {
        self.lock().new_addresses.clone()
    }

    /// The number of `add_payment` calls made so far.
    pub fn payment_writes(&self) -> usize {
        self.lock().payment_writes
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, method: &'static str) -> Result<MutexGuard<'_, State>, StoreError> {
        let mut state = self.lock();
        match state.fail_next.take().or_else(|| state.fail_on.remove(method)) {
            Some(e) => {
                debug!("Injected store failure: {e}");
                Err(e)
            },
            None => Ok(state),
        }
    }
}

fn invoice_mut<'a>(state: &'a mut State, id: &InvoiceId) -> Result<&'a mut Invoice, StoreError> {
    state.invoices.get_mut(id).ok_or_else(|| StoreError::InvoiceNotFound(id.clone()))
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn get_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.check("get_invoice")?.invoices.get(id).cloned())
    }

    async fn fetch_pending_invoices(&self) -> Result<Vec<InvoiceId>, StoreError> {
        Ok(self.check("fetch_pending_invoices")?.pending.iter().cloned().collect())
    }

    async fn update_invoice_status(
        &self,
        id: &InvoiceId,
        status: InvoiceStatus,
        exception_status: Option<ExceptionStatus>,
    ) -> Result<(), StoreError> {
        let mut state = self.check("update_invoice_status")?;
        let invoice = invoice_mut(&mut state, id)?;
        invoice.status = status;
        invoice.exception_status = exception_status;
        state.status_writes.push((id.clone(), status, exception_status));
        Ok(())
    }

    async fn add_payment(
        &self,
        id: &InvoiceId,
        timestamp: DateTime<Utc>,
        coin: &Coin,
        network: &NetworkCode,
    ) -> Result<Payment, StoreError> {
        let mut state = self.check("add_payment")?;
        let payment = Payment {
            outpoint: coin.outpoint.clone(),
            network: network.clone(),
            amount: coin.value,
            timestamp,
            accounted: true,
        };
        invoice_mut(&mut state, id)?.payments.push(payment.clone());
        state.payment_writes += 1;
        Ok(payment)
    }

    async fn update_payments(&self, payments: &[Payment]) -> Result<(), StoreError> {
        let mut state = self.check("update_payments")?;
        for update in payments {
            for invoice in state.invoices.values_mut() {
                for payment in invoice.payments.iter_mut().filter(|p| p.outpoint == update.outpoint) {
                    payment.accounted = update.accounted;
                }
            }
        }
        Ok(())
    }

    async fn unaffect_address(&self, id: &InvoiceId) -> Result<(), StoreError> {
        self.check("unaffect_address")?.released.push(id.clone());
        Ok(())
    }

    async fn new_address(&self, id: &InvoiceId, address: &Address, network: &NetworkCode) -> Result<(), StoreError> {
        let mut state = self.check("new_address")?;
        invoice_mut(&mut state, id)?
            .tracked_scripts
            .entry(network.clone())
            .or_insert_with(HashSet::new)
            .insert(address.script_pub_key.clone());
        state.new_addresses.push((id.clone(), address.clone(), network.clone()));
        Ok(())
    }

    async fn remove_pending_invoice(&self, id: &InvoiceId) -> Result<bool, StoreError> {
        Ok(self.check("remove_pending_invoice")?.pending.remove(id))
    }

    async fn resolve_invoice_by_script(
        &self,
        script: &ScriptPubKey,
        network: &NetworkCode,
    ) -> Result<Option<InvoiceId>, StoreError> {
        let state = self.check("resolve_invoice_by_script")?;
        Ok(state.invoices.values().find(|i| i.tracks(network, script)).map(|i| i.id.clone()))
    }
}
