use super::instrument::Instrument;
use super::order::OrderSide;
use serde::{Deserialize, Serialize};

/// A broker-reported execution. Immutable once observed.
///
/// `sequence` is the broker-assigned order id used as the stable tie-break
/// when two fills carry the same timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: i64,
    pub sequence: String,
}

impl Fill {
    pub fn new(
        instrument: Instrument,
        side: OrderSide,
        quantity: f64,
        price: f64,
        timestamp: i64,
        sequence: impl Into<String>,
    ) -> Self {
        Self {
            instrument,
            side,
            quantity,
            price,
            timestamp,
            sequence: sequence.into(),
        }
    }
}

/// A broker-reported net position. Quantity is signed: positive long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    pub quantity: f64,
    pub average_price: f64,
}
