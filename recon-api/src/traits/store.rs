use crate::error::StoreError;
use crate::model::account::{Account, AccountSnapshot};
use crate::model::ids::{AccountId, TenantId};
use crate::model::order::{LegKind, Order};
use crate::model::pnl::PnlMatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-tenant permission record for entry-order regeneration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegenerationPolicy {
    pub enabled: bool,
    pub allowed_strategies: Vec<String>,
}

impl RegenerationPolicy {
    /// An empty allowlist means no strategy is eligible.
    pub fn allows(&self, strategy: &str) -> bool {
        self.enabled && self.allowed_strategies.iter().any(|s| s == strategy)
    }
}

/// Points at one leg of one order for targeted removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegRef {
    pub order_id: Uuid,
    pub kind: LegKind,
}

/// Durable storage, interface only. The store is the exclusive owner of
/// persisted order/account state; the pipeline holds transient in-cycle
/// copies and writes back through the bulk operations below.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn accounts(&self, tenant: &TenantId) -> Result<Vec<Account>, StoreError>;

    async fn orders(&self, account: &AccountId) -> Result<Vec<Order>, StoreError>;

    /// All-or-nothing update of every field of every order passed in.
    /// Readers must never observe a half-updated leg set.
    async fn update_orders(&self, account: &AccountId, orders: &[Order])
        -> Result<(), StoreError>;

    async fn update_snapshot(
        &self,
        account: &AccountId,
        snapshot: &AccountSnapshot,
    ) -> Result<(), StoreError>;

    /// Replaces the account's full PnL match set. Never patches in place,
    /// so an aborted prior cycle cannot leave stale rows behind.
    async fn replace_pnl_matches(
        &self,
        account: &AccountId,
        matches: &[PnlMatch],
    ) -> Result<(), StoreError>;

    /// Removes the referenced legs. Removing an entry leg removes the
    /// whole order.
    async fn remove_legs(&self, account: &AccountId, legs: &[LegRef]) -> Result<(), StoreError>;

    async fn regeneration_policy(&self, tenant: &TenantId)
        -> Result<RegenerationPolicy, StoreError>;
}
