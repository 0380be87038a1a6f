use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use crate::{
    db_types::{
        Address,
        CoinsResponse,
        DerivationStrategy,
        KnownState,
        NetworkCode,
        TimestampedCoin,
        TransactionResult,
        TxId,
    },
    traits::{CoinSource, CoinSourceError},
};

#[derive(Default)]
struct State {
    /// Every coin seen on a network, in arrival order. The known state is an index into this list.
    coins: HashMap<NetworkCode, Vec<TimestampedCoin>>,
    transactions: HashMap<NetworkCode, HashMap<TxId, TransactionResult>>,
    reserved: usize,
    scans: Vec<(NetworkCode, Option<KnownState>)>,
    fail_next: Option<CoinSourceError>,
    fail_on: HashMap<&'static str, CoinSourceError>,
}

/// A [`CoinSource`] whose chain is scripted by the test.
///
/// All strategies on a network share one wallet, so every invoice on a network sees every coin on that network.
/// Scans respect the known state: only coins added since the state was handed out are returned.
#[derive(Default)]
pub struct ScriptedCoinSource {
    state: Mutex<State>,
}

impl ScriptedCoinSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_coin(&self, network: &str, coin: TimestampedCoin) {
        self.lock().coins.entry(network.into()).or_default().push(coin);
    }

    /// Adds or replaces a transaction.
    pub fn set_transaction(&self, network: &str, tx: TransactionResult) {
        self.lock().transactions.entry(network.into()).or_default().insert(tx.transaction.txid.clone(), tx);
    }

    /// Sets the confirmation count of every known transaction on `network`.
    pub fn confirm_all(&self, network: &str, confirmations: u32) {
        if let Some(txs) = self.lock().transactions.get_mut(&NetworkCode::from(network)) {
            txs.values_mut().for_each(|tx| tx.confirmations = confirmations);
        }
    }

    /// The next call to the coin source fails with `error`.
    pub fn fail_next(&self, error: CoinSourceError) {
        self.lock().fail_next = Some(error);
    }

    /// The next call to `method`, e.g. `"reserve_address"`, fails with `error`. Other calls go through.
    pub fn fail_next_call_to(&self, method: &'static str, error: CoinSourceError) {
        self.lock().fail_on.insert(method, error);
    }

    /// The known states passed to `get_coins`, in order.
    pub fn scans(&self) -> Vec<(NetworkCode, Option<KnownState>)> {
        self.lock().scans.clone()
    }

    pub fn reserved_addresses(&self) -> usize {
        self.lock().reserved
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, method: &'static str) -> Result<MutexGuard<'_, State>, CoinSourceError> {
        let mut state = self.lock();
        match state.fail_next.take().or_else(|| state.fail_on.remove(method)) {
            Some(e) => Err(e),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl CoinSource for ScriptedCoinSource {
    async fn get_coins(
        &self,
        strategy: &DerivationStrategy,
        known_state: Option<KnownState>,
    ) -> Result<CoinsResponse, CoinSourceError> {
        let mut state = self.check("get_coins")?;
        state.scans.push((strategy.network.clone(), known_state));
        let all = state.coins.get(&strategy.network).map(Vec::as_slice).unwrap_or_default();
        let from = known_state.map(|s| s.0 as usize).unwrap_or(0).min(all.len());
        Ok(CoinsResponse { known_state: Some(KnownState(all.len() as u64)), coins: all[from..].to_vec() })
    }

    async fn get_transactions(
        &self,
        network: &NetworkCode,
        txids: &[TxId],
    ) -> Result<HashMap<TxId, TransactionResult>, CoinSourceError> {
        let state = self.check("get_transactions")?;
        let known = match state.transactions.get(network) {
            Some(known) => known,
            None => return Ok(HashMap::new()),
        };
        Ok(txids.iter().filter_map(|id| known.get(id).map(|tx| (id.clone(), tx.clone()))).collect())
    }

    async fn reserve_address(&self, strategy: &DerivationStrategy) -> Result<Address, CoinSourceError> {
        let mut state = self.check("reserve_address")?;
        state.reserved += 1;
        let n = state.reserved;
        Ok(Address {
            address: format!("{}-address-{n}", strategy.network),
            script_pub_key: format!("{}-fresh-script-{n}", strategy.network).into(),
        })
    }
}
