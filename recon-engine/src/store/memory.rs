use async_trait::async_trait;
use recon_api::{
    Account, AccountId, AccountSnapshot, LegKind, LegRef, Order, PnlMatch, RegenerationPolicy,
    StateStore, StoreError, TenantId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Which store operation a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Accounts,
    Orders,
    UpdateOrders,
    UpdateSnapshot,
    ReplaceMatches,
    RemoveLegs,
    RegenerationPolicy,
}

#[derive(Default)]
struct StoreData {
    accounts: HashMap<TenantId, Vec<Account>>,
    orders: HashMap<AccountId, Vec<Order>>,
    matches: HashMap<AccountId, Vec<PnlMatch>>,
    snapshots: HashMap<AccountId, AccountSnapshot>,
    policies: HashMap<TenantId, RegenerationPolicy>,
    failures: HashSet<StoreOp>,
    writes: u64,
}

/// In-process store. Every mutation happens under one lock, which gives the
/// same all-or-nothing visibility the trait demands of a real database.
#[derive(Default)]
pub struct InMemoryStore {
    data: Mutex<StoreData>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_account(&self, account: Account) {
        let mut data = self.data.lock().unwrap();
        data.accounts
            .entry(account.tenant_id().clone())
            .or_default()
            .push(account);
    }

    pub fn seed_orders(&self, account: AccountId, orders: Vec<Order>) {
        self.data.lock().unwrap().orders.insert(account, orders);
    }

    pub fn seed_policy(&self, tenant: TenantId, policy: RegenerationPolicy) {
        self.data.lock().unwrap().policies.insert(tenant, policy);
    }

    /// Every call to `op` fails until cleared.
    pub fn fail_op(&self, op: StoreOp) {
        self.data.lock().unwrap().failures.insert(op);
    }

    pub fn clear_failure(&self, op: StoreOp) {
        self.data.lock().unwrap().failures.remove(&op);
    }

    pub fn stored_matches(&self, account: &AccountId) -> Vec<PnlMatch> {
        self.data
            .lock()
            .unwrap()
            .matches
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stored_orders(&self, account: &AccountId) -> Vec<Order> {
        self.data
            .lock()
            .unwrap()
            .orders
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stored_snapshot(&self, account: &AccountId) -> Option<AccountSnapshot> {
        self.data.lock().unwrap().snapshots.get(account).cloned()
    }

    /// Count of successful mutating calls, for no-write assertions.
    pub fn write_count(&self) -> u64 {
        self.data.lock().unwrap().writes
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        if self.data.lock().unwrap().failures.contains(&op) {
            Err(StoreError::Query(format!("scripted failure for {:?}", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn accounts(&self, tenant: &TenantId) -> Result<Vec<Account>, StoreError> {
        self.check(StoreOp::Accounts)?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .accounts
            .get(tenant)
            .cloned()
            .unwrap_or_default())
    }

    async fn orders(&self, account: &AccountId) -> Result<Vec<Order>, StoreError> {
        self.check(StoreOp::Orders)?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .orders
            .get(account)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_orders(
        &self,
        account: &AccountId,
        orders: &[Order],
    ) -> Result<(), StoreError> {
        self.check(StoreOp::UpdateOrders)?;
        let mut data = self.data.lock().unwrap();
        data.orders.insert(account.clone(), orders.to_vec());
        data.writes += 1;
        Ok(())
    }

    async fn update_snapshot(
        &self,
        account: &AccountId,
        snapshot: &AccountSnapshot,
    ) -> Result<(), StoreError> {
        self.check(StoreOp::UpdateSnapshot)?;
        let mut data = self.data.lock().unwrap();
        data.snapshots.insert(account.clone(), snapshot.clone());
        data.writes += 1;
        Ok(())
    }

    async fn replace_pnl_matches(
        &self,
        account: &AccountId,
        matches: &[PnlMatch],
    ) -> Result<(), StoreError> {
        self.check(StoreOp::ReplaceMatches)?;
        let mut data = self.data.lock().unwrap();
        data.matches.insert(account.clone(), matches.to_vec());
        data.writes += 1;
        Ok(())
    }

    async fn remove_legs(&self, account: &AccountId, legs: &[LegRef]) -> Result<(), StoreError> {
        self.check(StoreOp::RemoveLegs)?;
        let mut data = self.data.lock().unwrap();
        if let Some(orders) = data.orders.get_mut(account) {
            for leg in legs {
                match leg.kind {
                    // Removing the entry removes the whole order.
                    LegKind::Entry => orders.retain(|o| o.id() != leg.order_id),
                    LegKind::StopLoss => {
                        if let Some(o) = orders.iter_mut().find(|o| o.id() == leg.order_id) {
                            o.stop_loss = None;
                        }
                    }
                    LegKind::TakeProfit => {
                        if let Some(o) = orders.iter_mut().find(|o| o.id() == leg.order_id) {
                            o.take_profit = None;
                        }
                    }
                }
            }
        }
        data.writes += 1;
        Ok(())
    }

    async fn regeneration_policy(
        &self,
        tenant: &TenantId,
    ) -> Result<RegenerationPolicy, StoreError> {
        self.check(StoreOp::RegenerationPolicy)?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .policies
            .get(tenant)
            .cloned()
            .unwrap_or_default())
    }
}
