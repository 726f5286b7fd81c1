use super::ids::AccountId;
use super::instrument::Instrument;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for a long round-trip, -1 for a short round-trip.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

/// The three legs a tracked order can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegKind {
    Entry,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegStatus {
    Pending,
    Placed,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
    Modified,
}

impl LegStatus {
    /// Live at the broker, so price-driven modification may target it.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            LegStatus::Placed | LegStatus::PartiallyFilled | LegStatus::Modified
        )
    }
}

/// One leg of an order: a price/quantity intent with its broker-side identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLeg {
    pub kind: LegKind,
    pub price: f64,
    pub quantity: f64,
    pub stop_trigger: Option<f64>,
    pub broker_id: Option<String>,
    pub status: LegStatus,
    pub filled_quantity: f64,
}

impl OrderLeg {
    pub fn new(kind: LegKind, price: f64, quantity: f64) -> Self {
        Self {
            kind,
            price,
            quantity,
            stop_trigger: None,
            broker_id: None,
            status: LegStatus::Pending,
            filled_quantity: 0.0,
        }
    }

    pub fn with_stop_trigger(mut self, trigger: f64) -> Self {
        self.stop_trigger = Some(trigger);
        self
    }

    pub fn with_broker_id(mut self, id: impl Into<String>) -> Self {
        self.broker_id = Some(id.into());
        self.status = LegStatus::Placed;
        self
    }
}

/// The system's tracked intent: an entry leg plus optional protective legs.
///
/// Leg statuses are tracked independently, but the SL/TP legs only carry
/// meaning once the entry leg has filled quantity > 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    account_id: AccountId,
    instrument: Instrument,
    side: OrderSide,
    strategy: String,
    pub entry: OrderLeg,
    pub stop_loss: Option<OrderLeg>,
    pub take_profit: Option<OrderLeg>,
    created_at: i64,
}

impl Order {
    pub fn new(
        account_id: AccountId,
        instrument: Instrument,
        side: OrderSide,
        strategy: impl Into<String>,
        entry: OrderLeg,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            instrument,
            side,
            strategy: strategy.into(),
            entry,
            stop_loss: None,
            take_profit: None,
            created_at,
        }
    }

    pub fn with_stop_loss(mut self, leg: OrderLeg) -> Self {
        self.stop_loss = Some(leg);
        self
    }

    pub fn with_take_profit(mut self, leg: OrderLeg) -> Self {
        self.take_profit = Some(leg);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// SL/TP legs become actionable only after the entry has traded.
    pub fn protective_legs_meaningful(&self) -> bool {
        self.entry.filled_quantity > 0.0
    }

    pub fn legs(&self) -> impl Iterator<Item = &OrderLeg> {
        std::iter::once(&self.entry)
            .chain(self.stop_loss.as_ref())
            .chain(self.take_profit.as_ref())
    }
}
