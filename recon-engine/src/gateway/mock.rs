use async_trait::async_trait;
use recon_api::{
    AccountId, BrokerError, BrokerGateway, Fill, OrderAck, OrderSpec, Position,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Which gateway operation a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOp {
    FetchOrderBook,
    FetchPositions,
    PlaceOrder,
    ModifyOrder,
}

#[derive(Default)]
struct MockState {
    fills: HashMap<AccountId, Vec<Fill>>,
    positions: HashMap<AccountId, Vec<Position>>,
    failures: HashMap<BrokerOp, BrokerError>,
    delays: HashMap<BrokerOp, Duration>,
    placed: Vec<(AccountId, OrderSpec)>,
    modified: Vec<(AccountId, String, OrderSpec)>,
}

/// Scripted gateway: seed per-account snapshots, optionally script a
/// failure per operation, then inspect what the pipeline placed/modified.
#[derive(Default)]
pub struct MockBrokerGateway {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

impl MockBrokerGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_fills(&self, account: AccountId, fills: Vec<Fill>) {
        self.state.lock().unwrap().fills.insert(account, fills);
    }

    pub fn seed_positions(&self, account: AccountId, positions: Vec<Position>) {
        self.state.lock().unwrap().positions.insert(account, positions);
    }

    /// Every call to `op` fails with `error` until the script is cleared.
    pub fn fail_with(&self, op: BrokerOp, error: BrokerError) {
        self.state.lock().unwrap().failures.insert(op, error);
    }

    pub fn clear_failure(&self, op: BrokerOp) {
        self.state.lock().unwrap().failures.remove(&op);
    }

    /// Every call to `op` waits `delay` before responding, for timeout tests.
    pub fn delay(&self, op: BrokerOp, delay: Duration) {
        self.state.lock().unwrap().delays.insert(op, delay);
    }

    pub fn placed_orders(&self) -> Vec<(AccountId, OrderSpec)> {
        self.state.lock().unwrap().placed.clone()
    }

    pub fn modified_orders(&self) -> Vec<(AccountId, String, OrderSpec)> {
        self.state.lock().unwrap().modified.clone()
    }

    fn scripted_failure(&self, op: BrokerOp) -> Option<BrokerError> {
        self.state.lock().unwrap().failures.get(&op).cloned()
    }

    async fn scripted_delay(&self, op: BrokerOp) {
        let delay = self.state.lock().unwrap().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_broker_id(&self) -> String {
        format!("MOCK-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl BrokerGateway for MockBrokerGateway {
    async fn fetch_order_book(&self, account: &AccountId) -> Result<Vec<Fill>, BrokerError> {
        self.scripted_delay(BrokerOp::FetchOrderBook).await;
        if let Some(err) = self.scripted_failure(BrokerOp::FetchOrderBook) {
            return Err(err);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .fills
            .get(account)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_positions(&self, account: &AccountId) -> Result<Vec<Position>, BrokerError> {
        self.scripted_delay(BrokerOp::FetchPositions).await;
        if let Some(err) = self.scripted_failure(BrokerOp::FetchPositions) {
            return Err(err);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .positions
            .get(account)
            .cloned()
            .unwrap_or_default())
    }

    async fn place_order(
        &self,
        account: &AccountId,
        spec: &OrderSpec,
    ) -> Result<OrderAck, BrokerError> {
        self.scripted_delay(BrokerOp::PlaceOrder).await;
        if let Some(err) = self.scripted_failure(BrokerOp::PlaceOrder) {
            return Err(err);
        }
        self.state
            .lock()
            .unwrap()
            .placed
            .push((account.clone(), spec.clone()));
        Ok(OrderAck {
            broker_id: self.next_broker_id(),
        })
    }

    async fn modify_order(
        &self,
        account: &AccountId,
        broker_id: &str,
        spec: &OrderSpec,
    ) -> Result<OrderAck, BrokerError> {
        self.scripted_delay(BrokerOp::ModifyOrder).await;
        if let Some(err) = self.scripted_failure(BrokerOp::ModifyOrder) {
            return Err(err);
        }
        self.state.lock().unwrap().modified.push((
            account.clone(),
            broker_id.to_string(),
            spec.clone(),
        ));
        Ok(OrderAck {
            broker_id: broker_id.to_string(),
        })
    }
}
