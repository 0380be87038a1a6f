use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db_types::{
    Address,
    Coin,
    ExceptionStatus,
    Invoice,
    InvoiceId,
    InvoiceStatus,
    NetworkCode,
    Payment,
    ScriptPubKey,
};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("The invoice store is unavailable: {0}")]
    Unavailable(String),
    #[error("The invoice store returned invalid data: {0}")]
    InvalidData(String),
    #[error("Invoice {0} does not exist")]
    InvoiceNotFound(InvoiceId),
}

/// The persistence contract for invoices.
///
/// Writes for a given invoice only ever come from the single reconciliation loop that owns that invoice, so
/// implementations need no locking beyond what they require for durability.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Fetches a full snapshot of the invoice, including its payments. Returns `None` if the invoice does not exist.
    async fn get_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, StoreError>;

    /// Fetches the ids of all invoices that are still being watched.
    async fn fetch_pending_invoices(&self) -> Result<Vec<InvoiceId>, StoreError>;

    /// Persists the status and exception status of an invoice in a single write.
    async fn update_invoice_status(
        &self,
        id: &InvoiceId,
        status: InvoiceStatus,
        exception_status: Option<ExceptionStatus>,
    ) -> Result<(), StoreError>;

    /// Records a new payment for the invoice and returns the stored record.
    async fn add_payment(
        &self,
        id: &InvoiceId,
        timestamp: DateTime<Utc>,
        coin: &Coin,
        network: &NetworkCode,
    ) -> Result<Payment, StoreError>;

    /// Persists the `accounted` flag of each of the given payments in one batch.
    async fn update_payments(&self, payments: &[Payment]) -> Result<(), StoreError>;

    /// Releases the receiving address currently reserved for the invoice.
    async fn unaffect_address(&self, id: &InvoiceId) -> Result<(), StoreError>;

    /// Registers a freshly reserved receiving address for the invoice on the given network.
    async fn new_address(&self, id: &InvoiceId, address: &Address, network: &NetworkCode) -> Result<(), StoreError>;

    /// Stops tracking the invoice as pending. Returns true if the invoice had been pending.
    async fn remove_pending_invoice(&self, id: &InvoiceId) -> Result<bool, StoreError>;

    /// Finds the invoice that owns the given output script on the given network, if any.
    async fn resolve_invoice_by_script(
        &self,
        script: &ScriptPubKey,
        network: &NetworkCode,
    ) -> Result<Option<InvoiceId>, StoreError>;
}
