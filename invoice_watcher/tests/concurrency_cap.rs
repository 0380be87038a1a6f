use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use invoice_watcher::{
    db_types::{
        Address,
        CoinsResponse,
        DerivationStrategy,
        InvoiceId,
        InvoiceStatus,
        KnownState,
        NetworkCode,
        TransactionResult,
        TxId,
    },
    test_utils::{
        coin,
        prepare_test_env,
        script_for,
        tx_result,
        InvoiceBuilder,
        MemoryInvoiceStore,
        ScriptedCoinSource,
    },
    CoinSource,
    CoinSourceError,
    EventBus,
    InvoiceWatcher,
    WatcherConfig,
    WatcherHandle,
};
use log::*;

mod support;

use support::{fast_config, wait_until};

/// Wraps a [`ScriptedCoinSource`] and holds every scan for a while, keeping count of how many run at once.
struct SlowCoins {
    inner: ScriptedCoinSource,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowCoins {
    fn new(delay: Duration) -> Self {
        Self { inner: ScriptedCoinSource::new(), delay, active: AtomicUsize::new(0), peak: AtomicUsize::new(0) }
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoinSource for SlowCoins {
    async fn get_coins(
        &self,
        strategy: &DerivationStrategy,
        known_state: Option<KnownState>,
    ) -> Result<CoinsResponse, CoinSourceError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let response = self.inner.get_coins(strategy, known_state).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        response
    }

    async fn get_transactions(
        &self,
        network: &NetworkCode,
        txids: &[TxId],
    ) -> Result<HashMap<TxId, TransactionResult>, CoinSourceError> {
        self.inner.get_transactions(network, txids).await
    }

    async fn reserve_address(&self, strategy: &DerivationStrategy) -> Result<Address, CoinSourceError> {
        self.inner.reserve_address(strategy).await
    }
}

fn start(config: WatcherConfig, ids: &[&str], coins: Arc<SlowCoins>) -> (Arc<MemoryInvoiceStore>, WatcherHandle) {
    prepare_test_env();
    let store = Arc::new(MemoryInvoiceStore::new());
    for id in ids {
        store.insert(InvoiceBuilder::new(id).total_due(100).build());
    }
    let handle = InvoiceWatcher::new(config, store.clone(), coins, EventBus::new()).start();
    (store, handle)
}

#[tokio::test]
async fn capped_watcher_runs_one_loop_at_a_time() {
    let ids = ["cap-1", "cap-2", "cap-3", "cap-4"];
    let coins = Arc::new(SlowCoins::new(Duration::from_millis(20)));
    for (i, id) in ids.iter().enumerate() {
        let txid = format!("tx-{i}");
        #[allow(clippy::cast_possible_truncation)]
        let n = i as u32;
        coins.inner.add_coin("BTC", coin(&txid, 0, script_for(id, "BTC"), 100, Utc::now()));
        coins.inner.set_transaction("BTC", tx_result(&txid, &[("f", n)], 0, true, Utc::now()));
    }
    let config = fast_config().with_max_concurrent_invoices(Some(1));
    let (store, handle) = start(config, &ids, coins.clone());

    wait_until("every invoice is paid", || {
        ids.iter().all(|id| store.invoice(&InvoiceId::from(*id)).map(|i| i.status) == Some(InvoiceStatus::Paid))
    })
    .await;
    info!("🚀️ All invoices paid. Peak concurrency: {}", coins.peak());
    assert_eq!(coins.peak(), 1);
    assert_eq!(store.payment_writes(), ids.len());
    handle.stop().await;
}

#[tokio::test]
async fn stop_returns_while_loops_wait_for_a_slot() {
    let ids = ["slot-1", "slot-2", "slot-3"];
    let coins = Arc::new(SlowCoins::new(Duration::from_millis(300)));
    let config = fast_config().with_poll_interval(Duration::from_secs(3600)).with_max_concurrent_invoices(Some(1));
    let (_store, handle) = start(config, &ids, coins.clone());

    // One loop is mid-pass, the other two hold their claim while they wait for the slot
    wait_until("one loop runs and two wait", || handle.in_flight().len() == 3 && coins.active() == 1).await;
    let in_flight = handle.in_flight().clone();
    let stopped = tokio::time::timeout(Duration::from_secs(2), handle.stop()).await;
    assert!(stopped.is_ok(), "stop should not wait for queued loops");
    assert!(in_flight.is_empty());
    // The waiting loops never got to scan
    assert_eq!(coins.inner.scans().len(), 1);
    assert_eq!(coins.peak(), 1);
}
