//! In-memory collaborators and builders for testing code that drives the watcher.
mod builders;
mod memory_store;
mod prepare_env;
mod scripted_coin_source;

pub use builders::{coin, script_for, tx_result, InvoiceBuilder, DEFAULT_BTC_RATE};
pub use memory_store::MemoryInvoiceStore;
pub use prepare_env::prepare_test_env;
pub use scripted_coin_source::ScriptedCoinSource;
