use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use iw_common::Satoshis;
use log::*;

use crate::{
    db_types::{
        ExceptionStatus,
        Invoice,
        InvoiceStatus,
        NetworkCode,
        OutPoint,
        Payment,
        TimestampedCoin,
        TransactionResult,
        TxId,
        FINAL_CONFIRMATIONS,
    },
    events::{InvoiceEvent, InvoicePaymentEvent, InvoiceStatusChangedEvent},
    reconciliation::TransactionConflicts,
};

/// Everything a reconciliation pass learned from the outside world.
#[derive(Debug, Clone)]
pub struct Observation {
    pub now: DateTime<Utc>,
    /// Coins returned by the coin source, per network. Coins that do not belong to the invoice are ignored.
    pub coins: HashMap<NetworkCode, Vec<TimestampedCoin>>,
    /// The transactions backing the invoice's payments and the new coins, per network.
    pub transactions: HashMap<NetworkCode, HashMap<TxId, TransactionResult>>,
    /// Payments already stored by an earlier pass that failed before it finished. They are announced, and count as
    /// new funds, as if they had just been recorded.
    pub unannounced: HashSet<OutPoint>,
}

impl Observation {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now, coins: HashMap::new(), transactions: HashMap::new(), unannounced: HashSet::new() }
    }

    /// The observed coin behind `outpoint`, if any.
    pub fn coin(&self, network: &NetworkCode, outpoint: &OutPoint) -> Option<&TimestampedCoin> {
        self.coins.get(network).and_then(|coins| coins.iter().find(|c| &c.coin.outpoint == outpoint))
    }

    fn transaction(&self, payment: &Payment) -> Option<&TransactionResult> {
        self.transactions.get(&payment.network).and_then(|txs| txs.get(&payment.outpoint.txid))
    }
}

/// The result of a reconciliation pass: the next state of the invoice and the side effects needed to get there.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub invoice: Invoice,
    /// The events to publish once the outcome has been persisted, in order
    pub events: Vec<InvoiceEvent>,
    /// True if the status or exception status changed and must be persisted
    pub dirty: bool,
    /// Payments seen for the first time. They must be recorded before anything else is persisted.
    pub new_payments: Vec<Payment>,
    /// Payments whose `accounted` flag differs from what the store holds
    pub updated_payments: Vec<Payment>,
    /// The invoice's reserved receiving address must be released
    pub release_address: bool,
    /// Networks on which a fresh receiving address must be reserved
    pub reserve_address_on: Vec<NetworkCode>,
}

impl StepOutcome {
    pub fn status(&self) -> InvoiceStatus {
        self.invoice.status
    }
}

#[derive(Default)]
struct Pass {
    events: Vec<InvoiceEvent>,
    dirty: bool,
    transitioned: bool,
    release_address: bool,
    reserve_address_on: Vec<NetworkCode>,
}

impl Pass {
    fn transition(&mut self, invoice: &mut Invoice, to: InvoiceStatus) {
        debug!("🔁️ Invoice {} transitions from {} to {to}", invoice.id, invoice.status);
        invoice.status = to;
        self.events.push(InvoiceEvent::StatusChanged(InvoiceStatusChangedEvent::new(invoice.clone(), to)));
        self.dirty = true;
        self.transitioned = true;
    }

    fn set_exception(&mut self, invoice: &mut Invoice, exception: Option<ExceptionStatus>) -> bool {
        if invoice.exception_status == exception {
            return false;
        }
        invoice.exception_status = exception;
        self.dirty = true;
        true
    }
}

/// Amounts owed and paid on one network, all denominated in that network's coin.
struct Totals {
    due: Satoshis,
    paid: Satoshis,
    /// The part of `paid` that satisfies the invoice's speed policy
    confirmed: Satoshis,
    /// The part of `paid` that is buried deep enough to be final
    settled: Satoshis,
}

/// Computes the next state of `invoice` given what was observed on chain.
///
/// This is a pure function: it performs no I/O, and running it again on its own output with the same observation
/// produces no further changes.
///
/// At most one status transition happens per pass. The exception status may change alongside it.
pub fn reconcile(invoice: Invoice, observation: &Observation) -> StepOutcome {
    let mut invoice = invoice;
    let mut pass = Pass::default();
    let now = observation.now;

    if invoice.status == InvoiceStatus::New && invoice.is_expired_at(now) {
        pass.release_address = true;
        pass.transition(&mut invoice, InvoiceStatus::Expired);
    }

    let snapshot_flags: HashMap<OutPoint, bool> =
        invoice.payments.iter().map(|p| (p.outpoint.clone(), p.accounted)).collect();
    let (recorded, mut dirty_networks) = record_new_payments(&mut invoice, observation);
    resolve_conflicts(&mut invoice, observation);

    let new_payments: Vec<Payment> =
        invoice.payments.iter().filter(|p| recorded.contains(&p.outpoint)).cloned().collect();
    let announced: Vec<Payment> = invoice
        .payments
        .iter()
        .filter(|p| recorded.contains(&p.outpoint) || observation.unannounced.contains(&p.outpoint))
        .cloned()
        .collect();
    // New payments are stored as accounted, so only the ones that lost a conflict straight away need an update
    let updated_payments: Vec<Payment> = invoice
        .payments
        .iter()
        .filter(|p| snapshot_flags.get(&p.outpoint).copied().unwrap_or(true) != p.accounted)
        .cloned()
        .collect();
    dirty_networks.extend(announced.iter().map(|p| p.network.clone()));
    for payment in announced {
        pass.events.push(InvoiceEvent::Payment(InvoicePaymentEvent::new(invoice.id.clone(), payment)));
    }

    let networks: Vec<NetworkCode> = invoice.derivation_strategies.iter().map(|s| s.network.clone()).collect();
    for network in &networks {
        let totals = match totals_on(&invoice, network, observation) {
            Some(t) => t,
            None => {
                trace!("🔁️ Invoice {} has no pricing for {network}. Skipping.", invoice.id);
                continue;
            },
        };
        trace!(
            "🔁️ Invoice {} on {network}: due {}, paid {}, confirmed {}, settled {}",
            invoice.id,
            totals.due,
            totals.paid,
            totals.confirmed,
            totals.settled
        );
        apply_transitions(&mut invoice, &mut pass, network, &totals, dirty_networks.contains(network), now);
    }
    // The exception status may have changed after the transition
    for event in &mut pass.events {
        if let InvoiceEvent::StatusChanged(ev) = event {
            ev.invoice = invoice.clone();
        }
    }

    StepOutcome {
        invoice,
        events: pass.events,
        dirty: pass.dirty,
        new_payments,
        updated_payments,
        release_address: pass.release_address,
        reserve_address_on: pass.reserve_address_on,
    }
}

/// Adds a payment for every coin that belongs to the invoice and is not already recorded. Returns the outpoints of
/// the new payments and the networks they arrived on.
fn record_new_payments(invoice: &mut Invoice, observation: &Observation) -> (HashSet<OutPoint>, HashSet<NetworkCode>) {
    let mut recorded = HashSet::new();
    let mut networks = HashSet::new();
    let strategies = invoice.derivation_strategies.clone();
    for strategy in &strategies {
        let network = &strategy.network;
        let coins = match observation.coins.get(network) {
            Some(coins) => coins,
            None => continue,
        };
        for coin in coins {
            if !invoice.tracks(network, &coin.coin.script_pub_key) {
                trace!("🔁️ Coin {} does not belong to invoice {}", coin.coin.outpoint, invoice.id);
                continue;
            }
            if invoice.has_payment(&coin.coin.outpoint) {
                continue;
            }
            debug!("🔁️ New payment of {} on {network} for invoice {}", coin.coin.value, invoice.id);
            invoice.payments.push(Payment::from_coin(coin, network));
            recorded.insert(coin.coin.outpoint.clone());
            networks.insert(network.clone());
        }
    }
    (recorded, networks)
}

/// Flips the `accounted` flag of every payment whose backing transaction lost (or won back) a conflict. Payments
/// whose transaction was not returned by the coin source keep their flag.
fn resolve_conflicts(invoice: &mut Invoice, observation: &Observation) {
    for (network, transactions) in &observation.transactions {
        let conflicts = TransactionConflicts::find(transactions.values());
        if !conflicts.is_empty() {
            debug!("🔁️ {} conflict(s) among the {network} transactions of invoice {}", conflicts.len(), invoice.id);
        }
        for payment in invoice.payments.iter_mut().filter(|p| &p.network == network) {
            let txid = &payment.outpoint.txid;
            if !transactions.contains_key(txid) {
                continue;
            }
            let accounted = conflicts.is_accounted(txid);
            if accounted != payment.accounted {
                info!(
                    "🔁️ Payment {} of invoice {} is {} accounted for",
                    payment.outpoint,
                    invoice.id,
                    if accounted { "now" } else { "no longer" }
                );
                payment.accounted = accounted;
            }
        }
    }
}

fn totals_on(invoice: &Invoice, network: &NetworkCode, observation: &Observation) -> Option<Totals> {
    let due = invoice.crypto_data_for(network)?.total_due;
    let zero = Satoshis::default();
    let mut totals = Totals { due, paid: zero, confirmed: zero, settled: zero };
    for payment in invoice.payments.iter().filter(|p| p.accounted) {
        let (tx, value) = match (observation.transaction(payment), invoice.payment_value(payment, network)) {
            (Some(tx), Some(value)) => (tx, value),
            _ => continue,
        };
        totals.paid += value;
        if invoice.speed_policy.counts(tx.confirmations, tx.transaction.replaceable) {
            totals.confirmed += value;
        }
        if tx.confirmations >= FINAL_CONFIRMATIONS {
            totals.settled += value;
        }
    }
    Some(totals)
}

fn apply_transitions(
    invoice: &mut Invoice,
    pass: &mut Pass,
    network: &NetworkCode,
    totals: &Totals,
    address_dirty: bool,
    now: DateTime<Utc>,
) {
    match invoice.status {
        InvoiceStatus::New | InvoiceStatus::Expired if totals.paid >= totals.due => {
            if invoice.status == InvoiceStatus::New {
                if pass.transitioned {
                    return;
                }
                pass.release_address = true;
                pass.set_exception(invoice, None);
                pass.transition(invoice, InvoiceStatus::Paid);
            } else if totals.paid == totals.due {
                pass.set_exception(invoice, Some(ExceptionStatus::PaidLate));
            }
            if totals.paid > totals.due && pass.set_exception(invoice, Some(ExceptionStatus::PaidOver)) {
                pass.release_address = true;
            }
        },
        InvoiceStatus::New if totals.paid.is_positive() => {
            pass.set_exception(invoice, Some(ExceptionStatus::PaidPartial));
            if address_dirty && !pass.reserve_address_on.contains(network) {
                pass.reserve_address_on.push(network.clone());
            }
        },
        InvoiceStatus::Paid if !pass.transitioned => {
            if invoice.is_monitoring_expired_at(now) && totals.confirmed < totals.due {
                pass.release_address = true;
                pass.transition(invoice, InvoiceStatus::Invalid);
            } else if totals.confirmed >= totals.due {
                pass.release_address = true;
                pass.transition(invoice, InvoiceStatus::Confirmed);
            }
        },
        InvoiceStatus::Confirmed if !pass.transitioned => {
            if totals.settled >= totals.due {
                pass.transition(invoice, InvoiceStatus::Complete);
            }
        },
        _ => {},
    }
}
