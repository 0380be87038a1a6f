use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use iw_common::Satoshis;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(String);

//--------------------------------------       InvoiceId       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub String);

impl FromStr for InvoiceId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for InvoiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InvoiceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for InvoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl InvoiceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      NetworkCode      ---------------------------------------------------------
/// The crypto code of a network, e.g. `BTC` or `LTC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkCode(pub String);

impl<S: Into<String>> From<S> for NetworkCode {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl Display for NetworkCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------   Chain primitives    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub String);

impl<S: Into<String>> From<S> for TxId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to a single transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

impl OutPoint {
    pub fn new<T: Into<TxId>>(txid: T, vout: u32) -> Self {
        Self { txid: txid.into(), vout }
    }
}

impl Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// A hex-encoded output script.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptPubKey(pub String);

impl<S: Into<String>> From<S> for ScriptPubKey {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl Display for ScriptPubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A receiving address, together with the script that pays to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub script_pub_key: ScriptPubKey,
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// A scan cursor returned by the coin source. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnownState(pub u64);

/// Describes which addresses belong to an invoice's store on one network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationStrategy {
    pub network: NetworkCode,
    pub descriptor: String,
}

impl DerivationStrategy {
    pub fn new<N: Into<NetworkCode>, S: Into<String>>(network: N, descriptor: S) -> Self {
        Self { network: network.into(), descriptor: descriptor.into() }
    }
}

impl Display for DerivationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.network, self.descriptor)
    }
}

//--------------------------------------         Coins         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub script_pub_key: ScriptPubKey,
    pub value: Satoshis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedCoin {
    pub coin: Coin,
    /// The time the coin was first seen
    pub timestamp: DateTime<Utc>,
}

/// The result of a coin scan. `known_state` is the new cursor to pass to the next scan, if the source advanced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinsResponse {
    pub known_state: Option<KnownState>,
    pub coins: Vec<TimestampedCoin>,
}

//--------------------------------------     Transactions      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: TxId,
    /// The outputs spent by this transaction
    pub inputs: Vec<OutPoint>,
    /// True if the transaction signals that it may be replaced (e.g. via a fee bump)
    pub replaceable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub confirmations: u32,
    /// The time the transaction was first broadcast or seen
    pub timestamp: DateTime<Utc>,
    pub transaction: Transaction,
}

//--------------------------------------     InvoiceStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    /// The invoice is awaiting payment
    New,
    /// The invoice was not paid in full before it expired
    Expired,
    /// The invoice has been paid in full, but the payments have not been confirmed yet
    Paid,
    /// Enough payments have been confirmed to satisfy the invoice's speed policy
    Confirmed,
    /// The payments are buried deep enough that the invoice is settled for good
    Complete,
    /// The payments were not confirmed before the monitoring deadline
    Invalid,
}

impl Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoiceStatus::New => write!(f, "new"),
            InvoiceStatus::Expired => write!(f, "expired"),
            InvoiceStatus::Paid => write!(f, "paid"),
            InvoiceStatus::Confirmed => write!(f, "confirmed"),
            InvoiceStatus::Complete => write!(f, "complete"),
            InvoiceStatus::Invalid => write!(f, "invalid"),
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "expired" => Ok(Self::Expired),
            "paid" => Ok(Self::Paid),
            "confirmed" => Ok(Self::Confirmed),
            "complete" => Ok(Self::Complete),
            "invalid" => Ok(Self::Invalid),
            s => Err(ConversionError(format!("Invalid invoice status: {s}"))),
        }
    }
}

//--------------------------------------    ExceptionStatus    ---------------------------------------------------------
/// Extra information about how an invoice was paid. This is never a status in its own right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExceptionStatus {
    PaidPartial,
    PaidOver,
    PaidLate,
}

impl Display for ExceptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExceptionStatus::PaidPartial => write!(f, "paidPartial"),
            ExceptionStatus::PaidOver => write!(f, "paidOver"),
            ExceptionStatus::PaidLate => write!(f, "paidLate"),
        }
    }
}

impl FromStr for ExceptionStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paidPartial" => Ok(Self::PaidPartial),
            "paidOver" => Ok(Self::PaidOver),
            "paidLate" => Ok(Self::PaidLate),
            s => Err(ConversionError(format!("Invalid exception status: {s}"))),
        }
    }
}

//--------------------------------------      SpeedPolicy      ---------------------------------------------------------
/// How deep a payment must be buried before an invoice moves from `paid` to `confirmed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedPolicy {
    /// One confirmation, or none at all if the transaction cannot be replaced
    HighSpeed,
    /// One confirmation
    #[default]
    MediumSpeed,
    /// Six confirmations
    LowSpeed,
}

/// The depth after which a transaction is considered final, regardless of the speed policy.
pub const FINAL_CONFIRMATIONS: u32 = 6;

impl SpeedPolicy {
    /// Whether a transaction with the given depth counts towards the confirmed total under this policy.
    pub fn counts(&self, confirmations: u32, replaceable: bool) -> bool {
        match self {
            SpeedPolicy::HighSpeed => confirmations >= 1 || !replaceable,
            SpeedPolicy::MediumSpeed => confirmations >= 1,
            SpeedPolicy::LowSpeed => confirmations >= FINAL_CONFIRMATIONS,
        }
    }
}

//--------------------------------------        Payment        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub outpoint: OutPoint,
    pub network: NetworkCode,
    pub amount: Satoshis,
    /// The time the coin backing this payment was first seen
    pub timestamp: DateTime<Utc>,
    /// False if the backing transaction lost a conflict against another transaction
    pub accounted: bool,
}

impl Payment {
    pub fn from_coin(coin: &TimestampedCoin, network: &NetworkCode) -> Self {
        Self {
            outpoint: coin.coin.outpoint.clone(),
            network: network.clone(),
            amount: coin.coin.value,
            timestamp: coin.timestamp,
            accounted: true,
        }
    }
}

//--------------------------------------      CryptoData       ---------------------------------------------------------
/// Pricing information for an invoice on a single network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoData {
    pub network: NetworkCode,
    /// The price of one whole coin, in minor units of the invoice's pricing currency
    pub rate: i64,
    /// The amount owed, denominated in this network's coin
    pub total_due: Satoshis,
}

//--------------------------------------        Invoice        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub status: InvoiceStatus,
    pub exception_status: Option<ExceptionStatus>,
    pub speed_policy: SpeedPolicy,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// After this time, an invoice that has not settled is no longer watched
    pub monitoring_expires_at: DateTime<Utc>,
    pub payments: Vec<Payment>,
    /// The output scripts that belong to this invoice, per network
    pub tracked_scripts: HashMap<NetworkCode, HashSet<ScriptPubKey>>,
    pub derivation_strategies: Vec<DerivationStrategy>,
    pub crypto_data: Vec<CryptoData>,
}

impl Invoice {
    pub fn payments_on<'a>(&'a self, network: &'a NetworkCode) -> impl Iterator<Item = &'a Payment> + 'a {
        self.payments.iter().filter(move |p| &p.network == network)
    }

    pub fn has_payment(&self, outpoint: &OutPoint) -> bool {
        self.payments.iter().any(|p| &p.outpoint == outpoint)
    }

    pub fn tracks(&self, network: &NetworkCode, script: &ScriptPubKey) -> bool {
        self.tracked_scripts.get(network).map(|scripts| scripts.contains(script)).unwrap_or(false)
    }

    pub fn crypto_data_for(&self, network: &NetworkCode) -> Option<&CryptoData> {
        self.crypto_data.iter().find(|c| &c.network == network)
    }

    pub fn strategy_for(&self, network: &NetworkCode) -> Option<&DerivationStrategy> {
        self.derivation_strategies.iter().find(|s| &s.network == network)
    }

    /// The value of a payment, expressed in the coin of the `target` network.
    ///
    /// Returns `None` if either network has no pricing information on this invoice.
    pub fn payment_value(&self, payment: &Payment, target: &NetworkCode) -> Option<Satoshis> {
        if &payment.network == target {
            return Some(payment.amount);
        }
        let from = self.crypto_data_for(&payment.network)?;
        let to = self.crypto_data_for(target)?;
        payment.amount.convert(from.rate, to.rate)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_monitoring_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.monitoring_expires_at
    }

    /// True once the invoice no longer needs to be watched: it is complete, or it is invalid or expired and past its
    /// monitoring deadline.
    pub fn is_settled_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            InvoiceStatus::Complete => true,
            InvoiceStatus::Invalid | InvoiceStatus::Expired => self.is_monitoring_expired_at(now),
            _ => false,
        }
    }
}
