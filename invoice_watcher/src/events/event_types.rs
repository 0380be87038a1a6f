use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Invoice, InvoiceId, InvoiceStatus, NetworkCode, Payment, ScriptPubKey},
    events::EventBus,
};

//----------------------------------------------   Triggers   ---------------------------------------------------------
/// A new block was connected on `network`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlockEvent {
    pub network: NetworkCode,
}

/// An output paying to `script_pub_key` was seen on `network`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutReceivedEvent {
    pub script_pub_key: ScriptPubKey,
    pub network: NetworkCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreatedEvent {
    pub invoice_id: InvoiceId,
}

impl InvoiceCreatedEvent {
    pub fn new(invoice_id: InvoiceId) -> Self {
        Self { invoice_id }
    }
}

//----------------------------------------------   Produced   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceStatusChangedEvent {
    /// The invoice, with the new status already applied
    pub invoice: Invoice,
    pub new_status: InvoiceStatus,
}

impl InvoiceStatusChangedEvent {
    pub fn new(invoice: Invoice, new_status: InvoiceStatus) -> Self {
        Self { invoice, new_status }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePaymentEvent {
    pub invoice_id: InvoiceId,
    pub payment: Payment,
}

impl InvoicePaymentEvent {
    pub fn new(invoice_id: InvoiceId, payment: Payment) -> Self {
        Self { invoice_id, payment }
    }
}

/// Published whenever a reconciliation pass persisted a change to the invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDataChangedEvent {
    pub invoice_id: InvoiceId,
}

/// The events a reconciliation pass can produce, in the order they were produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceEvent {
    StatusChanged(InvoiceStatusChangedEvent),
    Payment(InvoicePaymentEvent),
}

impl InvoiceEvent {
    pub fn publish(self, bus: &EventBus) -> usize {
        match self {
            InvoiceEvent::StatusChanged(ev) => bus.publish(ev),
            InvoiceEvent::Payment(ev) => bus.publish(ev),
        }
    }
}
