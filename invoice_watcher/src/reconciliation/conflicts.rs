//! Double-spend and replacement detection.
//!
//! Two transactions that spend the same output cannot both end up in the chain. When the transactions backing an
//! invoice's payments conflict like this, exactly one of them is chosen as the winner and the payments backed by
//! the others stop counting towards the invoice.
//!
//! The winner of a conflict is chosen as follows:
//! 1. If any member has at least one confirmation, the member with the most confirmations (i.e. the one confirmed
//!    earliest) wins. Ties go to the earliest timestamp, then to the smallest txid.
//! 2. Otherwise the member with the latest timestamp wins, since a replacement is always seen after the transaction
//!    it replaces. Ties go to the largest txid.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::db_types::{OutPoint, TransactionResult, TxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictMember {
    pub confirmations: u32,
    pub timestamp: DateTime<Utc>,
}

impl From<&TransactionResult> for ConflictMember {
    fn from(tx: &TransactionResult) -> Self {
        Self { confirmations: tx.confirmations, timestamp: tx.timestamp }
    }
}

/// A set of at least two transactions that spend the same output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionConflict {
    pub spent: OutPoint,
    pub members: BTreeMap<TxId, ConflictMember>,
}

impl TransactionConflict {
    pub fn contains(&self, txid: &TxId) -> bool {
        self.members.contains_key(txid)
    }

    pub fn winner(&self) -> Option<&TxId> {
        let confirmed = self.members.iter().filter(|(_, m)| m.confirmations >= 1).max_by(|(ta, a), (tb, b)| {
            a.confirmations.cmp(&b.confirmations).then(b.timestamp.cmp(&a.timestamp)).then(tb.cmp(ta))
        });
        confirmed
            .or_else(|| {
                self.members.iter().max_by(|(ta, a), (tb, b)| a.timestamp.cmp(&b.timestamp).then(ta.cmp(tb)))
            })
            .map(|(txid, _)| txid)
    }

    pub fn is_winner(&self, txid: &TxId) -> bool {
        self.winner() == Some(txid)
    }
}

/// All the conflicts found among a set of transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionConflicts {
    conflicts: Vec<TransactionConflict>,
}

impl TransactionConflicts {
    /// Groups the transactions by the outputs they spend and keeps the groups with more than one member.
    pub fn find<'a, I>(transactions: I) -> Self
    where I: IntoIterator<Item = &'a TransactionResult> {
        let mut by_spent = BTreeMap::<OutPoint, BTreeMap<TxId, ConflictMember>>::new();
        for tx in transactions {
            for input in &tx.transaction.inputs {
                by_spent
                    .entry(input.clone())
                    .or_default()
                    .entry(tx.transaction.txid.clone())
                    .or_insert_with(|| ConflictMember::from(tx));
            }
        }
        let conflicts = by_spent
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(spent, members)| TransactionConflict { spent, members })
            .collect();
        Self { conflicts }
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionConflict> {
        self.conflicts.iter()
    }

    /// A transaction counts towards an invoice only if it wins every conflict it takes part in. Transactions that are
    /// not part of any conflict always count.
    pub fn is_accounted(&self, txid: &TxId) -> bool {
        self.conflicts.iter().filter(|c| c.contains(txid)).all(|c| c.is_winner(txid))
    }
}
