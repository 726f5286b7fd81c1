use crate::error::BrokerError;
use crate::model::fill::{Fill, Position};
use crate::model::ids::AccountId;
use crate::model::instrument::Instrument;
use crate::model::order::{LegKind, OrderSide};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request to place or re-price one order leg at the broker.
///
/// `external_id` is caller-supplied so a batch response can be matched back
/// to its items even when the broker never assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSpec {
    pub external_id: Uuid,
    pub instrument: Instrument,
    pub side: OrderSide,
    pub kind: LegKind,
    pub price: f64,
    pub quantity: f64,
    pub stop_trigger: Option<f64>,
    pub strategy: String,
}

/// Broker acknowledgement of an accepted placement/modification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub broker_id: String,
}

/// The external trading venue, interface only.
///
/// Implementations own wire-protocol, auth and retry concerns; the engine
/// sees three failure classes (see [`BrokerError`]) and per-call latency.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// All fills the broker reports for the account, oldest first.
    async fn fetch_order_book(&self, account: &AccountId) -> Result<Vec<Fill>, BrokerError>;

    /// Net positions the broker currently holds for the account.
    async fn fetch_positions(&self, account: &AccountId) -> Result<Vec<Position>, BrokerError>;

    async fn place_order(
        &self,
        account: &AccountId,
        spec: &OrderSpec,
    ) -> Result<OrderAck, BrokerError>;

    async fn modify_order(
        &self,
        account: &AccountId,
        broker_id: &str,
        spec: &OrderSpec,
    ) -> Result<OrderAck, BrokerError>;
}
