use crate::model::instrument::Instrument;
use serde::{Deserialize, Serialize};

/// Theoretical buy/sell reference prices from the external pricing feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FairPrice {
    pub buy: f64,
    pub sell: f64,
}

/// Read-only view onto the pricing feed. Used for unrealized PnL and for
/// the price-crossing checks that drive order modification.
pub trait FairPriceSource: Send + Sync {
    fn fair_price(&self, instrument: &Instrument) -> Option<FairPrice>;
}
