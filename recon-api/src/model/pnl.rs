use super::instrument::Instrument;
use serde::{Deserialize, Serialize};

/// Reference to the fill a match leg came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRef {
    pub sequence: String,
    pub price: f64,
    pub timestamp: i64,
}

/// One row of matcher output.
///
/// A closed slice carries `exit` and `realized_pnl`; an open residual lot
/// carries neither and reports its remaining quantity in `open_quantity`
/// (valued against fair price in `unrealized_pnl` when one is known).
/// The full set for an account is replaced wholesale every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlMatch {
    pub instrument: Instrument,
    pub entry: FillRef,
    pub exit: Option<FillRef>,
    pub matched_quantity: f64,
    pub realized_pnl: Option<f64>,
    pub open_quantity: f64,
    pub unrealized_pnl: Option<f64>,
}

impl PnlMatch {
    pub fn closed(
        instrument: Instrument,
        entry: FillRef,
        exit: FillRef,
        matched_quantity: f64,
        realized_pnl: f64,
    ) -> Self {
        Self {
            instrument,
            entry,
            exit: Some(exit),
            matched_quantity,
            realized_pnl: Some(realized_pnl),
            open_quantity: 0.0,
            unrealized_pnl: None,
        }
    }

    pub fn open(
        instrument: Instrument,
        entry: FillRef,
        open_quantity: f64,
        unrealized_pnl: Option<f64>,
    ) -> Self {
        Self {
            instrument,
            entry,
            exit: None,
            matched_quantity: 0.0,
            realized_pnl: None,
            open_quantity,
            unrealized_pnl,
        }
    }
}
