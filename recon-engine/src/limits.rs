//! Caps on shared downstream capacity.
//!
//! Tenant count can reach the thousands while the broker call budget and
//! the store connection pool stay fixed, so the bound lives here, shared
//! across every tenant task, instead of per tenant.

use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

pub struct SharedLimits {
    broker: Semaphore,
    store: Semaphore,
}

impl SharedLimits {
    pub fn new(max_broker_calls: usize, max_store_calls: usize) -> Arc<Self> {
        Arc::new(Self {
            broker: Semaphore::new(max_broker_calls),
            store: Semaphore::new(max_store_calls),
        })
    }

    pub async fn acquire_broker(&self) -> SemaphorePermit<'_> {
        // The semaphore is never closed while the registry is alive.
        self.broker
            .acquire()
            .await
            .unwrap_or_else(|_| unreachable!("broker limit semaphore closed"))
    }

    pub async fn acquire_store(&self) -> SemaphorePermit<'_> {
        self.store
            .acquire()
            .await
            .unwrap_or_else(|_| unreachable!("store limit semaphore closed"))
    }
}
