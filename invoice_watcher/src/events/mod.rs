//! Typed publish/subscribe between the watcher and the rest of the system.
//!
//! The [`EventBus`] carries the events that trigger reconciliation (new blocks, received outputs, new invoices) and
//! the events the watcher produces as invoices change. Every subscriber gets its own queue, so a subscriber sees
//! the events of its type in the order they were published.
//!
//! [`EventHooks`] are a convenience for attaching async closures to the produced events.
mod bus;
mod channel;
mod event_types;
mod hooks;

pub use bus::{EventBus, Subscription};
pub use channel::{EventHandler, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks};
