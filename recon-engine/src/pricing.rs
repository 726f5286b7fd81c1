//! Fair-price feed stubs.

use recon_api::{FairPrice, FairPriceSource, Instrument};
use std::collections::HashMap;
use std::sync::RwLock;

/// A table of fair prices updated out of band. Stands in for the external
/// pricing feed, which is read-only to the engine either way.
#[derive(Default)]
pub struct StaticFairPrices {
    prices: RwLock<HashMap<Instrument, FairPrice>>,
}

impl StaticFairPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, instrument: Instrument, price: FairPrice) {
        self.prices.write().unwrap().insert(instrument, price);
    }
}

impl FairPriceSource for StaticFairPrices {
    fn fair_price(&self, instrument: &Instrument) -> Option<FairPrice> {
        self.prices.read().unwrap().get(instrument).copied()
    }
}
