use std::{
    fmt::Display,
    iter::Sum,
    ops::Add,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::op;

/// The number of base units in one whole coin.
pub const SATOSHIS_PER_COIN: i64 = 100_000_000;

//--------------------------------------      Satoshis       ---------------------------------------------------------
/// An amount of coin in the smallest unit of its network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Satoshis(i64);

op!(binary Satoshis, Add, add);
op!(binary Satoshis, Sub, sub);
op!(inplace Satoshis, AddAssign, add_assign);
op!(inplace Satoshis, SubAssign, sub_assign);
op!(unary Satoshis, Neg, neg);

impl Sum for Satoshis {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in satoshis: {0}")]
pub struct SatoshisConversionError(String);

impl From<i64> for Satoshis {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<u64> for Satoshis {
    type Error = SatoshisConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value)
            .map(Self)
            .map_err(|_| SatoshisConversionError(format!("Value {value} is too large to convert to Satoshis")))
    }
}

impl Display for Satoshis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.abs() < 100_000 {
            write!(f, "{} sat", self.0)
        } else {
            let sign = if self.0 < 0 { "-" } else { "" };
            let abs = self.0.unsigned_abs();
            let per_coin = SATOSHIS_PER_COIN.unsigned_abs();
            write!(f, "{sign}{}.{:08}₿", abs / per_coin, abs % per_coin)
        }
    }
}

impl Satoshis {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Converts this amount between two networks, given the price of one whole coin on each network in a common
    /// pricing currency. The result is rounded down. Returns `None` if `to_rate` is not positive.
    pub fn convert(&self, from_rate: i64, to_rate: i64) -> Option<Self> {
        if to_rate <= 0 {
            return None;
        }
        let converted = i128::from(self.0) * i128::from(from_rate) / i128::from(to_rate);
        i64::try_from(converted).ok().map(Self)
    }
}
