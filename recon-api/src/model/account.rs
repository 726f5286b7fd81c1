use super::ids::{AccountId, TenantId};
use serde::{Deserialize, Serialize};

/// Mutable financial snapshot of an account. Rewritten by the pipeline
/// every cycle from matcher output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cash: f64,
    pub margin_used: f64,
    pub mark_to_market: f64,
    pub updated_at: i64,
}

/// A brokerage identity under a tenant. Credentials live with the external
/// auth collaborator; only the financial snapshot is tracked here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    tenant_id: TenantId,
    active: bool,
    pub snapshot: AccountSnapshot,
}

impl Account {
    pub fn new(id: AccountId, tenant_id: TenantId, active: bool) -> Self {
        Self {
            id,
            tenant_id,
            active,
            snapshot: AccountSnapshot::default(),
        }
    }

    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}
