//! The per-tenant recurring cycle.
//!
//! One task per active tenant; tasks never block each other. The loop
//! re-checks its preconditions every tick, runs the pipeline at most once
//! at a time for its tenant (a slow cycle delays the next tick, it never
//! overlaps it), and exits when the last connection goes away or the
//! trading window closes.

use crate::registry::ConnectionRegistry;
use crate::window::TradingWindow;
use chrono::Utc;
use log::{debug, info, warn};
use recon_api::{Account, MonitorMessage, StateStore, StoreError, TenantId};
use recon_engine::{Pipeline, SharedLimits};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Everything a tenant loop needs besides the tenant itself. Shared by
/// all loops; `limits` is the same cap the pipeline holds, so the
/// per-tick account load counts against the store budget too.
pub struct SchedulerContext {
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<dyn StateStore>,
    pub limits: Arc<SharedLimits>,
    pub store_timeout: Duration,
    pub window: TradingWindow,
    pub tick: Duration,
}

impl SchedulerContext {
    /// Bounded account load: one shared-store permit, one timeout. A
    /// wedged store costs at most `store_timeout` per tick, never parks
    /// the loop.
    async fn load_accounts(&self, tenant: &TenantId) -> Result<Vec<Account>, StoreError> {
        let _permit = self.limits.acquire_store().await;
        match timeout(self.store_timeout, self.store.accounts(tenant)).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Unavailable("account load timed out".into())),
        }
    }
}

/// Handle the registry keeps for a running tenant loop.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Asks the loop to stop. Observed within one tick boundary: the loop
    /// selects on this signal while waiting out the interval.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Hard cancellation for process shutdown.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

pub fn spawn(
    tenant: TenantId,
    ctx: Arc<SchedulerContext>,
    registry: ConnectionRegistry,
) -> SchedulerHandle {
    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(run_loop(tenant, ctx, registry, rx));
    SchedulerHandle { shutdown, handle }
}

async fn run_loop(
    tenant: TenantId,
    ctx: Arc<SchedulerContext>,
    registry: ConnectionRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("scheduler started for tenant {}", tenant);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(ctx.tick) => {}
        }

        if !ctx.window.is_open(Utc::now()) {
            warn!(
                "trading window closed; dropping connections for tenant {}",
                tenant
            );
            registry.force_close_tenant(&tenant);
            break;
        }

        if registry.connection_count(&tenant) == 0 {
            break;
        }

        let accounts = match ctx.load_accounts(&tenant).await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!("account load failed for tenant {}: {}", tenant, err);
                registry.broadcast(
                    &tenant,
                    MonitorMessage::monitoring_errors(vec![format!(
                        "account load failed: {}",
                        err
                    )]),
                );
                continue;
            }
        };

        let active: Vec<Account> = accounts.into_iter().filter(|a| a.is_active()).collect();
        if active.is_empty() {
            // Keep the loop alive; the tenant may activate an account later.
            debug!("tenant {} has no active accounts this tick", tenant);
            continue;
        }

        let result = ctx.pipeline.run_cycle(&tenant, &active).await;
        if result.has_errors() {
            registry.broadcast(
                &tenant,
                MonitorMessage::monitoring_errors(result.error_strings()),
            );
        }
    }

    info!("scheduler stopped for tenant {}", tenant);
}
