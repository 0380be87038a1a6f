use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use chrono::Utc;
use futures_util::future::join_all;
use log::*;

use crate::{
    db_types::{InvoiceId, KnownState, NetworkCode, OutPoint},
    errors::ReconcileError,
    events::{EventBus, InvoiceDataChangedEvent},
    reconciliation::{reconcile, Observation, StepOutcome},
    retry::{RetryDecision, RetryPolicy},
    shutdown::Shutdown,
    traits::{CoinSource, InvoiceStore},
};

/// Scan cursors for one reconciliation loop, per network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownStates {
    states: HashMap<NetworkCode, KnownState>,
}

impl KnownStates {
    pub fn get(&self, network: &NetworkCode) -> Option<KnownState> {
        self.states.get(network).copied()
    }

    /// Moves the cursor for `network` forward. Older states are ignored.
    pub fn advance(&mut self, network: NetworkCode, state: KnownState) {
        let current = self.states.entry(network).or_insert(state);
        if state > *current {
            *current = state;
        }
    }
}

/// Writes that a failed pass managed to commit before it stopped.
///
/// The store has no transactions, so a pass that fails half-way leaves its earlier writes in place. The retry reads
/// them back as settled facts. This record lets it finish the job instead: payments recorded here are still
/// announced and still earn a fresh address, and a release or reservation that already happened is not repeated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnfinishedWrites {
    recorded: HashSet<OutPoint>,
    released: bool,
    reserved_on: HashSet<NetworkCode>,
}

impl UnfinishedWrites {
    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty() && !self.released && self.reserved_on.is_empty()
    }
}

/// What a reconciliation loop carries from one pass to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopState {
    pub known_states: KnownStates,
    pub unfinished: UnfinishedWrites,
}

/// How a single reconciliation pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassResult {
    /// The invoice no longer exists in the store
    Vanished,
    /// Shutdown was signalled before anything was written
    Cancelled,
    /// The invoice has settled and is no longer pending
    Settled,
    /// The status changed; another pass should follow straight away
    Changed,
    Unchanged,
}

/// Runs the reconciliation loop for individual invoices against the shared collaborators.
#[derive(Clone)]
pub struct InvoiceReconciler {
    store: Arc<dyn InvoiceStore>,
    coin_source: Arc<dyn CoinSource>,
    bus: EventBus,
    retry: RetryPolicy,
    shutdown: Shutdown,
}

impl InvoiceReconciler {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        coin_source: Arc<dyn CoinSource>,
        bus: EventBus,
        retry: RetryPolicy,
        shutdown: Shutdown,
    ) -> Self {
        Self { store, coin_source, bus, retry, shutdown }
    }

    /// Reconciles the invoice until a pass makes no status change, the invoice settles, or shutdown is signalled.
    /// Failed passes are retried according to the retry policy. This never returns an error; failures only delay
    /// the invoice's progress until it is triggered again.
    pub async fn watch(&self, id: InvoiceId) {
        debug!("🔁️ Watching invoice {id}");
        let mut state = LoopState::default();
        let mut failures = 0u32;
        loop {
            if self.shutdown.is_triggered() {
                debug!("🔁️ Shutdown signalled. Leaving invoice {id} for now.");
                break;
            }
            match self.run_pass(&id, &mut state).await {
                Ok(PassResult::Changed) => {
                    failures = 0;
                    trace!("🔁️ Invoice {id} changed status. Running another pass.");
                },
                Ok(result) => {
                    trace!("🔁️ Finished watching invoice {id}: {result:?}");
                    break;
                },
                Err(e) => {
                    failures += 1;
                    match self.retry.decide(failures, &e) {
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                "🔁️ Pass {failures} for invoice {id} failed. {e}. Retrying in {}ms.",
                                delay.as_millis()
                            );
                            tokio::select! {
                                biased;
                                _ = self.shutdown.wait() => break,
                                _ = tokio::time::sleep(delay) => {},
                            }
                        },
                        RetryDecision::GiveUp => {
                            error!("🔁️ Giving up on invoice {id} after {failures} failed pass(es). {e}");
                            break;
                        },
                    }
                },
            }
        }
    }

    /// Runs a single reconciliation pass: read, decide, write, publish.
    ///
    /// The known states are only advanced once every write of the pass has succeeded, so a failed pass is retried
    /// against the same coins. Whatever the failed pass did write is remembered in [`LoopState::unfinished`].
    pub async fn run_pass(&self, id: &InvoiceId, state: &mut LoopState) -> Result<PassResult, ReconcileError> {
        let known_states = &state.known_states;
        let invoice = match self.store.get_invoice(id).await? {
            Some(invoice) => invoice,
            None => {
                debug!("🔁️ Invoice {id} no longer exists");
                return Ok(PassResult::Vanished);
            },
        };
        let previous_status = invoice.status;
        let mut observation = Observation::at(Utc::now());
        observation.unannounced = state.unfinished.recorded.clone();

        let scans = invoice
            .derivation_strategies
            .iter()
            .map(|s| self.coin_source.get_coins(s, known_states.get(&s.network)));
        let responses = join_all(scans).await;
        let mut next_states = Vec::new();
        for (strategy, response) in invoice.derivation_strategies.iter().zip(responses) {
            let response = response?;
            trace!("🔁️ {} coin(s) on {} for invoice {id}", response.coins.len(), strategy.network);
            if let Some(known) = response.known_state {
                next_states.push((strategy.network.clone(), known));
            }
            observation.coins.insert(strategy.network.clone(), response.coins);
        }

        for strategy in &invoice.derivation_strategies {
            let network = &strategy.network;
            let mut txids = invoice.payments_on(network).map(|p| p.outpoint.txid.clone()).collect::<BTreeSet<_>>();
            if let Some(coins) = observation.coins.get(network) {
                txids.extend(
                    coins
                        .iter()
                        .filter(|c| invoice.tracks(network, &c.coin.script_pub_key))
                        .map(|c| c.coin.outpoint.txid.clone()),
                );
            }
            if txids.is_empty() {
                continue;
            }
            let txids = txids.into_iter().collect::<Vec<_>>();
            let transactions = self.coin_source.get_transactions(network, &txids).await?;
            observation.transactions.insert(network.clone(), transactions);
        }

        if self.shutdown.is_triggered() {
            debug!("🔁️ Shutdown signalled before invoice {id} was updated. Discarding the pass.");
            if !state.unfinished.is_empty() {
                warn!("🔁️ Invoice {id} is left with a partly written pass: {:?}", state.unfinished);
            }
            return Ok(PassResult::Cancelled);
        }

        let outcome = reconcile(invoice, &observation);
        self.persist(&outcome, &observation, &mut state.unfinished).await?;
        for (network, known) in next_states {
            state.known_states.advance(network, known);
        }
        self.publish(&outcome);
        state.unfinished = UnfinishedWrites::default();

        let invoice = &outcome.invoice;
        if invoice.status != previous_status {
            info!("🔁️ Invoice {id} is now {}", invoice.status);
        }
        if invoice.is_settled_at(observation.now) {
            let was_pending = self.store.remove_pending_invoice(id).await?;
            info!(
                "🔁️ Invoice {id} has settled as {}. No longer watching it (was pending: {was_pending})",
                invoice.status
            );
            return Ok(PassResult::Settled);
        }
        if invoice.status != previous_status {
            Ok(PassResult::Changed)
        } else {
            Ok(PassResult::Unchanged)
        }
    }

    /// Writes the outcome to the store. Every write that succeeds is noted in `unfinished`, so that if a later one
    /// fails, the retry neither repeats it nor forgets what it implied.
    async fn persist(
        &self,
        outcome: &StepOutcome,
        observation: &Observation,
        unfinished: &mut UnfinishedWrites,
    ) -> Result<(), ReconcileError> {
        let invoice = &outcome.invoice;
        let id = &invoice.id;
        for payment in &outcome.new_payments {
            match observation.coin(&payment.network, &payment.outpoint) {
                Some(coin) => {
                    self.store.add_payment(id, payment.timestamp, &coin.coin, &payment.network).await?;
                    unfinished.recorded.insert(payment.outpoint.clone());
                },
                None => warn!("🔁️ No coin was observed for payment {} of invoice {id}", payment.outpoint),
            }
        }
        if !outcome.updated_payments.is_empty() {
            self.store.update_payments(&outcome.updated_payments).await?;
        }
        if outcome.release_address && !unfinished.released {
            trace!("🔁️ Releasing the receiving address of invoice {id}");
            self.store.unaffect_address(id).await?;
            unfinished.released = true;
        }
        for network in &outcome.reserve_address_on {
            if unfinished.reserved_on.contains(network) {
                trace!("🔁️ A fresh {network} address was already issued for invoice {id}");
                continue;
            }
            let strategy = match invoice.strategy_for(network) {
                Some(s) => s,
                None => continue,
            };
            let address = self.coin_source.reserve_address(strategy).await?;
            debug!("🔁️ Invoice {id} was paid partially. New {network} address: {address}");
            self.store.new_address(id, &address, network).await?;
            unfinished.reserved_on.insert(network.clone());
        }
        if outcome.dirty {
            self.store.update_invoice_status(id, invoice.status, invoice.exception_status).await?;
        }
        Ok(())
    }

    fn publish(&self, outcome: &StepOutcome) {
        for event in outcome.events.iter().cloned() {
            event.publish(&self.bus);
        }
        if outcome.dirty {
            self.bus.publish(InvoiceDataChangedEvent { invoice_id: outcome.invoice.id.clone() });
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::DateTime;
    use mockall::mock;

    use super::*;
    use crate::{
        db_types::{
            Address,
            Coin,
            CoinsResponse,
            DerivationStrategy,
            ExceptionStatus,
            Invoice,
            InvoiceStatus,
            Payment,
            ScriptPubKey,
            TransactionResult,
            TxId,
        },
        events::InvoicePaymentEvent,
        shutdown::{shutdown_channel, ShutdownTrigger},
        test_utils::{coin, script_for, tx_result, InvoiceBuilder, MemoryInvoiceStore, ScriptedCoinSource},
        traits::{CoinSourceError, StoreError},
    };

    mock! {
        pub Store {}
        #[async_trait]
        impl InvoiceStore for Store {
            async fn get_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, StoreError>;
            async fn fetch_pending_invoices(&self) -> Result<Vec<InvoiceId>, StoreError>;
            async fn update_invoice_status(
                &self,
                id: &InvoiceId,
                status: InvoiceStatus,
                exception_status: Option<ExceptionStatus>,
            ) -> Result<(), StoreError>;
            async fn add_payment(
                &self,
                id: &InvoiceId,
                timestamp: DateTime<Utc>,
                coin: &Coin,
                network: &NetworkCode,
            ) -> Result<Payment, StoreError>;
            async fn update_payments(&self, payments: &[Payment]) -> Result<(), StoreError>;
            async fn unaffect_address(&self, id: &InvoiceId) -> Result<(), StoreError>;
            async fn new_address(
                &self,
                id: &InvoiceId,
                address: &Address,
                network: &NetworkCode,
            ) -> Result<(), StoreError>;
            async fn remove_pending_invoice(&self, id: &InvoiceId) -> Result<bool, StoreError>;
            async fn resolve_invoice_by_script(
                &self,
                script: &ScriptPubKey,
                network: &NetworkCode,
            ) -> Result<Option<InvoiceId>, StoreError>;
        }
    }

    mock! {
        pub Coins {}
        #[async_trait]
        impl CoinSource for Coins {
            async fn get_coins(
                &self,
                strategy: &DerivationStrategy,
                known_state: Option<KnownState>,
            ) -> Result<CoinsResponse, CoinSourceError>;
            async fn get_transactions(
                &self,
                network: &NetworkCode,
                txids: &[TxId],
            ) -> Result<HashMap<TxId, TransactionResult>, CoinSourceError>;
            async fn reserve_address(&self, strategy: &DerivationStrategy) -> Result<Address, CoinSourceError>;
        }
    }

    fn reconciler(
        store: Arc<dyn InvoiceStore>,
        coins: Arc<dyn CoinSource>,
        retry: RetryPolicy,
    ) -> (ShutdownTrigger, InvoiceReconciler) {
        // The trigger must outlive the test, otherwise the reconciler sees a shutdown straight away
        let (trigger, shutdown) = shutdown_channel();
        (trigger, InvoiceReconciler::new(store, coins, EventBus::new(), retry, shutdown))
    }

    #[test]
    fn known_states_never_regress() {
        let mut states = KnownStates::default();
        let btc = NetworkCode::from("BTC");
        assert_eq!(states.get(&btc), None);
        states.advance(btc.clone(), KnownState(5));
        states.advance(btc.clone(), KnownState(3));
        assert_eq!(states.get(&btc), Some(KnownState(5)));
        states.advance(btc.clone(), KnownState(8));
        assert_eq!(states.get(&btc), Some(KnownState(8)));
    }

    #[tokio::test]
    async fn vanished_invoice_causes_no_writes() {
        let mut store = MockStore::new();
        store.expect_get_invoice().times(2).returning(|_| Ok(None));
        store.expect_update_invoice_status().never();
        store.expect_add_payment().never();
        store.expect_remove_pending_invoice().never();
        let mut coins = MockCoins::new();
        coins.expect_get_coins().never();
        let (_trigger, reconciler) = reconciler(Arc::new(store), Arc::new(coins), RetryPolicy::default());
        let mut states = LoopState::default();
        let result = reconciler.run_pass(&"gone".into(), &mut states).await.unwrap();
        assert_eq!(result, PassResult::Vanished);
        reconciler.watch("gone".into()).await;
    }

    #[tokio::test]
    async fn coin_source_failure_writes_nothing_and_keeps_known_state() {
        let invoice = InvoiceBuilder::new("flaky").total_due(100).build();
        let mut store = MockStore::new();
        store.expect_get_invoice().returning(move |_| Ok(Some(invoice.clone())));
        store.expect_update_invoice_status().never();
        store.expect_add_payment().never();
        let mut coins = MockCoins::new();
        coins.expect_get_coins().returning(|_, _| Err(CoinSourceError::Unavailable("node is syncing".into())));
        let retry = RetryPolicy::new(Duration::from_millis(1), Some(3));
        let (_trigger, reconciler) = reconciler(Arc::new(store), Arc::new(coins), retry);
        let mut states = LoopState::default();
        let err = reconciler.run_pass(&"flaky".into(), &mut states).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(states, LoopState::default());
        // Three attempts, then the loop gives up
        tokio::time::timeout(Duration::from_secs(1), reconciler.watch("flaky".into())).await.unwrap();
    }

    #[tokio::test]
    async fn payment_and_status_are_persisted() {
        let invoice = InvoiceBuilder::new("pay").total_due(100).build();
        let store = Arc::new(MemoryInvoiceStore::new());
        store.insert(invoice.clone());
        let coins = Arc::new(ScriptedCoinSource::new());
        coins.add_coin("BTC", coin("tx1", 0, script_for("pay", "BTC"), 100, Utc::now()));
        coins.set_transaction("BTC", tx_result("tx1", &[("funding", 0)], 0, true, Utc::now()));
        let (_trigger, reconciler) = reconciler(store.clone(), coins.clone(), RetryPolicy::default());
        let mut states = LoopState::default();
        let result = reconciler.run_pass(&"pay".into(), &mut states).await.unwrap();
        assert_eq!(result, PassResult::Changed);
        assert!(states.known_states.get(&"BTC".into()).is_some());
        assert!(states.unfinished.is_empty());
        let stored = store.invoice(&"pay".into()).unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
        assert_eq!(stored.payments.len(), 1);
        assert_eq!(store.released_addresses(), vec![InvoiceId::from("pay")]);

        // Nothing new: the second pass only re-reads
        let result = reconciler.run_pass(&"pay".into(), &mut states).await.unwrap();
        assert_eq!(result, PassResult::Unchanged);
        assert_eq!(store.status_writes(&"pay".into()), 1);
    }

    #[tokio::test]
    async fn pass_interrupted_after_recording_a_payment_still_issues_a_fresh_address() {
        let store = Arc::new(MemoryInvoiceStore::new());
        store.insert(InvoiceBuilder::new("partial").total_due(100).build());
        let coins = Arc::new(ScriptedCoinSource::new());
        coins.add_coin("BTC", coin("tx1", 0, script_for("partial", "BTC"), 40, Utc::now()));
        coins.set_transaction("BTC", tx_result("tx1", &[("funding", 0)], 0, true, Utc::now()));
        coins.fail_next_call_to("reserve_address", CoinSourceError::Unavailable("wallet is locked".into()));
        let (_trigger, reconciler) = reconciler(store.clone(), coins.clone(), RetryPolicy::default());
        let mut payments = reconciler.bus.subscribe::<InvoicePaymentEvent>();
        let mut states = LoopState::default();

        let err = reconciler.run_pass(&"partial".into(), &mut states).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.payment_writes(), 1);
        assert!(payments.try_recv().is_none());
        assert!(!states.unfinished.is_empty());

        let result = reconciler.run_pass(&"partial".into(), &mut states).await.unwrap();
        assert_eq!(result, PassResult::Unchanged);
        assert_eq!(store.payment_writes(), 1);
        assert_eq!(store.new_addresses().len(), 1);
        let stored = store.invoice(&"partial".into()).unwrap();
        assert_eq!(stored.status, InvoiceStatus::New);
        assert_eq!(stored.exception_status, Some(ExceptionStatus::PaidPartial));
        let announced = payments.try_recv().unwrap();
        assert_eq!(announced.payment.outpoint.txid, TxId::from("tx1"));
        assert!(payments.try_recv().is_none());
        assert!(states.unfinished.is_empty());

        // Once the pass has gone through, the payment is not announced again
        reconciler.run_pass(&"partial".into(), &mut states).await.unwrap();
        assert!(payments.try_recv().is_none());
        assert_eq!(store.new_addresses().len(), 1);
    }

    #[tokio::test]
    async fn pass_interrupted_after_releasing_an_address_does_not_release_it_again() {
        let store = Arc::new(MemoryInvoiceStore::new());
        store.insert(InvoiceBuilder::new("lapsed").expired().build());
        store.fail_next_call_to("update_invoice_status", StoreError::Unavailable("lock timeout".into()));
        let coins = Arc::new(ScriptedCoinSource::new());
        let (_trigger, reconciler) = reconciler(store.clone(), coins, RetryPolicy::default());
        let mut states = LoopState::default();

        assert!(reconciler.run_pass(&"lapsed".into(), &mut states).await.is_err());
        assert_eq!(store.released_addresses(), vec![InvoiceId::from("lapsed")]);
        assert_eq!(store.invoice(&"lapsed".into()).unwrap().status, InvoiceStatus::New);

        let result = reconciler.run_pass(&"lapsed".into(), &mut states).await.unwrap();
        assert_eq!(result, PassResult::Changed);
        assert_eq!(store.invoice(&"lapsed".into()).unwrap().status, InvoiceStatus::Expired);
        assert_eq!(store.released_addresses(), vec![InvoiceId::from("lapsed")]);
    }

    #[tokio::test]
    async fn pass_interrupted_after_issuing_an_address_does_not_issue_another() {
        let store = Arc::new(MemoryInvoiceStore::new());
        store.insert(InvoiceBuilder::new("thrifty").total_due(100).build());
        store.fail_next_call_to("update_invoice_status", StoreError::Unavailable("lock timeout".into()));
        let coins = Arc::new(ScriptedCoinSource::new());
        coins.add_coin("BTC", coin("tx1", 0, script_for("thrifty", "BTC"), 40, Utc::now()));
        coins.set_transaction("BTC", tx_result("tx1", &[("funding", 0)], 0, true, Utc::now()));
        let (_trigger, reconciler) = reconciler(store.clone(), coins.clone(), RetryPolicy::default());
        let mut states = LoopState::default();

        assert!(reconciler.run_pass(&"thrifty".into(), &mut states).await.is_err());
        assert_eq!(store.new_addresses().len(), 1);
        reconciler.run_pass(&"thrifty".into(), &mut states).await.unwrap();
        assert_eq!(store.new_addresses().len(), 1);
        assert_eq!(coins.reserved_addresses(), 1);
        assert_eq!(store.status_history(&"thrifty".into()), vec![(
            InvoiceStatus::New,
            Some(ExceptionStatus::PaidPartial)
        )]);
    }
}
