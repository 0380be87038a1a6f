//! # Collaborator contracts
//!
//! The watcher does not own any data. It reads invoices from, and writes reconciliation results back to, an
//! [`InvoiceStore`], and it learns about on-chain activity from a [`CoinSource`]. Backends implement these traits in
//! order to be driven by the watcher.
//!
//! * [`InvoiceStore`] provides invoice snapshots, the set of pending invoices, and persists status changes, payments
//!   and receiving-address bookkeeping.
//! * [`CoinSource`] scans derivation strategies for coins, looks up transactions and reserves fresh receiving
//!   addresses.
//!
//! Both traits must be safe to call from many invoice loops at the same time.
mod coin_source;
mod invoice_store;

pub use coin_source::{CoinSource, CoinSourceError};
pub use invoice_store::{InvoiceStore, StoreError};
