use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use iw_common::Satoshis;

use crate::db_types::{
    Coin,
    CryptoData,
    DerivationStrategy,
    ExceptionStatus,
    Invoice,
    InvoiceId,
    InvoiceStatus,
    NetworkCode,
    OutPoint,
    Payment,
    ScriptPubKey,
    SpeedPolicy,
    TimestampedCoin,
    Transaction,
    TransactionResult,
};

/// The price of one BTC used by [`InvoiceBuilder`] unless told otherwise.
pub const DEFAULT_BTC_RATE: i64 = 1_000;

/// The script the builder tracks for invoice `id` on `network`.
pub fn script_for(id: &str, network: &str) -> ScriptPubKey {
    ScriptPubKey::from(format!("{network}-{id}-script"))
}

pub fn coin(txid: &str, vout: u32, script: ScriptPubKey, value: i64, timestamp: DateTime<Utc>) -> TimestampedCoin {
    TimestampedCoin {
        coin: Coin { outpoint: OutPoint::new(txid, vout), script_pub_key: script, value: Satoshis::from(value) },
        timestamp,
    }
}

pub fn tx_result(
    txid: &str,
    inputs: &[(&str, u32)],
    confirmations: u32,
    replaceable: bool,
    timestamp: DateTime<Utc>,
) -> TransactionResult {
    TransactionResult {
        confirmations,
        timestamp,
        transaction: Transaction {
            txid: txid.into(),
            inputs: inputs.iter().map(|(t, v)| OutPoint::new(*t, *v)).collect(),
            replaceable,
        },
    }
}

/// Builds invoices payable in BTC (and optionally other networks) for tests.
///
/// By default the invoice is `new`, owes 10 000 sat, expires in 15 minutes and is monitored for an hour.
pub struct InvoiceBuilder {
    invoice: Invoice,
}

impl InvoiceBuilder {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        let invoice = Invoice {
            id: InvoiceId::from(id),
            status: InvoiceStatus::New,
            exception_status: None,
            speed_policy: SpeedPolicy::default(),
            created_at: now,
            expires_at: now + Duration::minutes(15),
            monitoring_expires_at: now + Duration::hours(1),
            payments: vec![],
            tracked_scripts: HashMap::new(),
            derivation_strategies: vec![],
            crypto_data: vec![],
        };
        Self { invoice }.with_network("BTC", DEFAULT_BTC_RATE, 10_000)
    }

    /// Makes the invoice payable on `network` as well, tracking [`script_for`] the invoice on that network.
    pub fn with_network(mut self, network: &str, rate: i64, total_due: i64) -> Self {
        let code = NetworkCode::from(network);
        self.invoice.derivation_strategies.push(DerivationStrategy::new(network, format!("xpub-{network}")));
        self.invoice.crypto_data.push(CryptoData { network: code.clone(), rate, total_due: Satoshis::from(total_due) });
        self.invoice
            .tracked_scripts
            .entry(code)
            .or_insert_with(HashSet::new)
            .insert(script_for(self.invoice.id.as_str(), network));
        self
    }

    /// Sets the amount due on the first network.
    pub fn total_due(mut self, total_due: i64) -> Self {
        if let Some(data) = self.invoice.crypto_data.first_mut() {
            data.total_due = Satoshis::from(total_due);
        }
        self
    }

    pub fn status(mut self, status: InvoiceStatus) -> Self {
        self.invoice.status = status;
        self
    }

    pub fn exception_status(mut self, exception_status: ExceptionStatus) -> Self {
        self.invoice.exception_status = Some(exception_status);
        self
    }

    pub fn speed_policy(mut self, speed_policy: SpeedPolicy) -> Self {
        self.invoice.speed_policy = speed_policy;
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.invoice.expires_at = expires_at;
        self
    }

    /// The invoice expired a minute ago.
    pub fn expired(self) -> Self {
        self.expires_at(Utc::now() - Duration::minutes(1))
    }

    pub fn monitoring_expires_at(mut self, monitoring_expires_at: DateTime<Utc>) -> Self {
        self.invoice.monitoring_expires_at = monitoring_expires_at;
        self
    }

    /// Adds an accounted payment of `amount` on the first network, backed by output 0 of `txid`.
    pub fn payment(mut self, txid: &str, amount: i64) -> Self {
        let network = self.invoice.derivation_strategies[0].network.clone();
        self.invoice.payments.push(Payment {
            outpoint: OutPoint::new(txid, 0),
            network,
            amount: Satoshis::from(amount),
            timestamp: Utc::now(),
            accounted: true,
        });
        self
    }

    pub fn build(self) -> Invoice {
        self.invoice
    }
}
