use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::db_types::{Address, CoinsResponse, DerivationStrategy, KnownState, NetworkCode, TransactionResult, TxId};

#[derive(Debug, Clone, Error)]
pub enum CoinSourceError {
    #[error("The coin source is unavailable: {0}")]
    Unavailable(String),
    #[error("The coin source does not support network {0}")]
    UnknownNetwork(NetworkCode),
    #[error("The coin source returned invalid data: {0}")]
    InvalidData(String),
}

/// Access to blockchain data for the networks an invoice can be paid on.
#[async_trait]
pub trait CoinSource: Send + Sync {
    /// Returns the coins received by addresses of the derivation strategy since `known_state`, along with the new
    /// scan cursor. A `None` cursor requests every coin the source knows about.
    async fn get_coins(
        &self,
        strategy: &DerivationStrategy,
        known_state: Option<KnownState>,
    ) -> Result<CoinsResponse, CoinSourceError>;

    /// Looks up the given transactions. Transactions the source does not know about are absent from the result.
    async fn get_transactions(
        &self,
        network: &NetworkCode,
        txids: &[TxId],
    ) -> Result<HashMap<TxId, TransactionResult>, CoinSourceError>;

    /// Reserves a fresh receiving address from the derivation strategy.
    async fn reserve_address(&self, strategy: &DerivationStrategy) -> Result<Address, CoinSourceError>;
}
