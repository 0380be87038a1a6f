mod satoshis;

pub mod helpers;
pub mod op;

pub use satoshis::{Satoshis, SatoshisConversionError, SATOSHIS_PER_COIN};
