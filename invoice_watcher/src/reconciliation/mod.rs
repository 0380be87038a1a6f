//! # Reconciliation
//!
//! A reconciliation pass compares what is known about an invoice with what the coin source reports, and decides
//! what has changed. This module contains the decision logic only; [`reconcile`] performs no I/O. The
//! [`crate::watcher`] module is responsible for gathering an [`Observation`] and for carrying out the side effects
//! listed in the resulting [`StepOutcome`].
//!
//! The invoice lifecycle is:
//!
//! ```text
//!   new ──────────────► paid ──────► confirmed ──────► complete
//!    │                   │
//!    ▼                   ▼
//!  expired            invalid
//! ```
//!
//! `paid` means the accounted payments cover the amount due; `confirmed` means enough of them are confirmed under
//! the invoice's speed policy; `complete` means they are buried deep enough to be final. Exception statuses
//! (`paidPartial`, `paidOver`, `paidLate`) annotate these states but are never states in their own right.
mod conflicts;
mod step;

pub use conflicts::{ConflictMember, TransactionConflict, TransactionConflicts};
pub use step::{reconcile, Observation, StepOutcome};
