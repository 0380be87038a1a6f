//! Invoice Watcher
//!
//! The Invoice Watcher keeps the status of cryptocurrency invoices in step with what happens on chain. It listens for
//! new blocks, received outputs and newly created invoices, and for each affected invoice runs a reconciliation loop
//! that records new payments, resolves double-spends and replacements, and moves the invoice through its lifecycle
//! (`new` → `paid` → `confirmed` → `complete`, or `expired` / `invalid`).
//!
//! The library is divided into the following sections:
//! 1. The collaborator contracts ([`mod@traits`]). The watcher owns no data: invoices live in an [`InvoiceStore`],
//!    and chain data comes from a [`CoinSource`]. Backends implement these traits.
//! 2. The reconciliation logic ([`mod@reconciliation`]). This is a pure function of the invoice and what was
//!    observed on chain, and can be tested without any I/O.
//! 3. The runtime ([`mod@watcher`]): the watch queue, the dispatcher that runs one loop per invoice, the poller and
//!    the trigger handlers. [`InvoiceWatcher::start`] spawns them and returns a [`WatcherHandle`] for shutting them
//!    down.
//!
//! Everything the watcher learns is published on the [`EventBus`]. Use [`EventHooks`] to hook into these events and
//! perform custom actions.
pub mod config;
pub mod db_types;
pub mod errors;
pub mod events;
pub mod reconciliation;
pub mod retry;
pub mod shutdown;
pub mod traits;
pub mod watcher;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use config::WatcherConfig;
pub use errors::{ConfigError, ErrorKind, ReconcileError};
pub use events::{EventBus, EventHandlers, EventHooks};
pub use retry::{RetryDecision, RetryPolicy};
pub use traits::{CoinSource, CoinSourceError, InvoiceStore, StoreError};
pub use watcher::{InvoiceWatcher, WatchQueue, WatcherHandle};
