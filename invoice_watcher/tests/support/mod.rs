#![allow(dead_code)]
use std::{sync::Arc, time::Duration};

use invoice_watcher::{
    db_types::{Invoice, InvoiceId},
    test_utils::{prepare_test_env, MemoryInvoiceStore, ScriptedCoinSource},
    EventBus,
    InvoiceWatcher,
    RetryPolicy,
    WatcherConfig,
    WatcherHandle,
};

pub struct Harness {
    pub store: Arc<MemoryInvoiceStore>,
    pub coins: Arc<ScriptedCoinSource>,
    pub bus: EventBus,
    pub handle: WatcherHandle,
}

impl Harness {
    pub fn invoice(&self, id: &str) -> Invoice {
        self.store.invoice(&InvoiceId::from(id)).expect("invoice should exist")
    }
}

/// A configuration with short intervals, so that the poller picks up anything the triggers miss.
pub fn fast_config() -> WatcherConfig {
    WatcherConfig::default()
        .with_poll_interval(Duration::from_millis(50))
        .with_retry(RetryPolicy::new(Duration::from_millis(10), None))
}

pub fn start_watcher(config: WatcherConfig, invoices: Vec<Invoice>) -> Harness {
    prepare_test_env();
    let store = Arc::new(MemoryInvoiceStore::new());
    for invoice in invoices {
        store.insert(invoice);
    }
    let coins = Arc::new(ScriptedCoinSource::new());
    let bus = EventBus::new();
    let handle = InvoiceWatcher::new(config, store.clone(), coins.clone(), bus.clone()).start();
    Harness { store, coins, bus, handle }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "Timed out waiting until {what}");
}
