//! The per-tenant reconciliation pipeline.
//!
//! One `run_cycle` call executes the ten-stage table in `stage.rs` for one
//! tenant: broker synchronization, FIFO PnL, persistence, then the
//! order-lifecycle actions, finishing with one aggregated report. Stages
//! never stream partial results; everything a cycle learned travels in the
//! returned [`CycleResult`].

pub mod actions;
pub mod report;
pub mod stage;

pub use report::{CycleIssue, CycleResult, Severity};
pub use stage::{StageId, StageOutcome};

use crate::limits::SharedLimits;
use crate::matcher;
use actions::{PlannedModification, PlannedPlacement};
use chrono::Utc;
use futures::future;
use log::{debug, info, warn};
use recon_api::{
    Account, AccountId, BrokerError, BrokerGateway, FairPriceSource, Fill, Instrument, LegKind,
    LegStatus, Order, OrderSide, OrderSpec, PnlMatch, Position, StateStore, StoreError, TenantId,
};
use stage::{stage_table, OnFailure, RunWhen};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub broker_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broker_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// What stage 1 pulled from the broker for one account.
#[derive(Debug, Clone, Default)]
struct BrokerView {
    fills: Vec<Fill>,
    positions: Vec<Position>,
}

/// Transient in-cycle state. Built fresh per cycle and discarded with the
/// result; durable state stays with the store.
struct CycleState {
    accounts: Vec<Account>,
    views: HashMap<AccountId, BrokerView>,
    orders: HashMap<AccountId, Vec<Order>>,
    /// Total entry-side fill volume per instrument, from stage 2.
    entry_volume: HashMap<AccountId, HashMap<Instrument, f64>>,
    /// (realized, unrealized) totals per account, from stage 2.
    pnl_totals: HashMap<AccountId, (f64, f64)>,
    /// Rejected entry orders captured in stage 7 before removal.
    rejected_entries: HashMap<AccountId, Vec<Order>>,
    /// Stage 8 output consumed by stage 9.
    regenerated: Vec<(AccountId, OrderSpec)>,
    result: CycleResult,
}

impl CycleState {
    fn new(tenant: TenantId, accounts: Vec<Account>) -> Self {
        Self {
            accounts,
            views: HashMap::new(),
            orders: HashMap::new(),
            entry_volume: HashMap::new(),
            pnl_totals: HashMap::new(),
            rejected_entries: HashMap::new(),
            regenerated: Vec::new(),
            result: CycleResult::new(tenant),
        }
    }

    fn record(&mut self, severity: Severity, stage: StageId, message: impl Into<String>) {
        self.result.issues.push(CycleIssue::new(severity, stage, message));
    }
}

pub struct Pipeline {
    gateway: Arc<dyn BrokerGateway>,
    store: Arc<dyn StateStore>,
    prices: Arc<dyn FairPriceSource>,
    limits: Arc<SharedLimits>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        store: Arc<dyn StateStore>,
        prices: Arc<dyn FairPriceSource>,
        limits: Arc<SharedLimits>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            prices,
            limits,
            config,
        }
    }

    /// Runs one cycle for the tenant over its active accounts.
    ///
    /// Interprets the stage table row by row: a stage runs when its
    /// predicate over prior outcomes holds, an aborting failure skips
    /// straight to the report row, and every recorded issue travels out in
    /// the returned result.
    pub async fn run_cycle(&self, tenant: &TenantId, accounts: &[Account]) -> CycleResult {
        debug!("cycle start for tenant {}", tenant);
        let mut state = CycleState::new(tenant.clone(), accounts.to_vec());
        let mut aborted = false;

        for spec in stage_table() {
            if aborted && spec.id != StageId::Report {
                state.result.outcomes.push((spec.id, StageOutcome::Skipped));
                continue;
            }
            if !self.predicate_holds(spec.runs_when, &state) {
                state.result.outcomes.push((spec.id, StageOutcome::Skipped));
                continue;
            }

            let outcome = self.run_stage(spec.id, &mut state).await;
            state.result.outcomes.push((spec.id, outcome));

            if outcome == StageOutcome::Failed && spec.on_failure == OnFailure::AbortCycle {
                aborted = true;
            }
        }

        debug!(
            "cycle end for tenant {}: {} issue(s)",
            tenant,
            state.result.issues.len()
        );
        state.result
    }

    fn predicate_holds(&self, when: RunWhen, state: &CycleState) -> bool {
        match when {
            RunWhen::Always => true,
            RunWhen::Succeeded(stage) => state.result.outcome(stage) == StageOutcome::Success,
            RunWhen::RegenerationOutput => !state.regenerated.is_empty(),
            RunWhen::AnyError => state.result.has_errors(),
        }
    }

    async fn run_stage(&self, id: StageId, state: &mut CycleState) -> StageOutcome {
        match id {
            StageId::FetchSnapshots => self.stage_fetch_snapshots(state).await,
            StageId::ComputePnl => self.stage_compute_pnl(state).await,
            StageId::PersistReconciled => self.stage_persist_reconciled(state).await,
            StageId::PlaceProtective => self.stage_place_protective(state).await,
            StageId::ModifyEntries => self.stage_modify(state, LegKind::Entry).await,
            StageId::ModifyStops => self.stage_modify(state, LegKind::StopLoss).await,
            StageId::RemoveRejected => self.stage_remove_rejected(state).await,
            StageId::PrepareRegeneration => self.stage_prepare_regeneration(state).await,
            StageId::PlaceRegenerated => self.stage_place_regenerated(state).await,
            StageId::Report => self.stage_report(state),
        }
    }

    /// Wraps a broker call with the shared concurrency cap and a timeout.
    /// A timeout is this stage's failure, not a crash.
    async fn with_broker<T>(
        &self,
        fut: impl Future<Output = Result<T, BrokerError>>,
    ) -> Result<T, BrokerError> {
        let _permit = self.limits.acquire_broker().await;
        match timeout(self.config.broker_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(BrokerError::Transient("broker call timed out".into())),
        }
    }

    async fn with_store<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let _permit = self.limits.acquire_store().await;
        match timeout(self.config.store_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Unavailable("store call timed out".into())),
        }
    }

    // ---- stage 1 -----------------------------------------------------

    async fn stage_fetch_snapshots(&self, state: &mut CycleState) -> StageOutcome {
        let fetches = state.accounts.iter().map(|account| {
            let id = account.id().clone();
            async move {
                let view = async {
                    let fills = self.with_broker(self.gateway.fetch_order_book(&id)).await?;
                    let positions = self.with_broker(self.gateway.fetch_positions(&id)).await?;
                    Ok::<BrokerView, BrokerError>(BrokerView { fills, positions })
                }
                .await;
                (id, view)
            }
        });

        let mut failed = false;
        for (account_id, view) in future::join_all(fetches).await {
            match view {
                Ok(view) => {
                    state.views.insert(account_id, view);
                }
                Err(err) => {
                    failed = true;
                    let severity = if err.is_session_expired() {
                        Severity::SessionExpired
                    } else {
                        Severity::Fatal
                    };
                    state.record(
                        severity,
                        StageId::FetchSnapshots,
                        format!("snapshot fetch failed for account {}: {}", account_id, err),
                    );
                }
            }
        }

        if failed {
            StageOutcome::Failed
        } else {
            StageOutcome::Success
        }
    }

    // ---- stage 2 -----------------------------------------------------

    async fn stage_compute_pnl(&self, state: &mut CycleState) -> StageOutcome {
        for account in state.accounts.clone() {
            let account_id = account.id().clone();

            let orders = match self.with_store(self.store.orders(&account_id)).await {
                Ok(orders) => orders,
                Err(err) => {
                    state.record(
                        Severity::Fatal,
                        StageId::ComputePnl,
                        format!("order load failed for account {}: {}", account_id, err),
                    );
                    return StageOutcome::Failed;
                }
            };

            let view = state.views.get(&account_id).cloned().unwrap_or_default();
            let computed = compute_account_pnl(&orders, &view, self.prices.as_ref());

            for warning in &computed.warnings {
                state.record(Severity::Warning, StageId::ComputePnl, warning.clone());
            }

            if let Err(err) = self
                .with_store(self.store.replace_pnl_matches(&account_id, &computed.matches))
                .await
            {
                state.record(
                    Severity::Fatal,
                    StageId::ComputePnl,
                    format!("match persist failed for account {}: {}", account_id, err),
                );
                return StageOutcome::Failed;
            }

            state.entry_volume.insert(account_id.clone(), computed.entry_volume);
            state
                .pnl_totals
                .insert(account_id.clone(), (computed.realized, computed.unrealized));
            state.orders.insert(account_id, orders);
        }

        StageOutcome::Success
    }

    // ---- stage 3 -----------------------------------------------------

    async fn stage_persist_reconciled(&self, state: &mut CycleState) -> StageOutcome {
        let mut failed = false;

        for account in state.accounts.clone() {
            let account_id = account.id().clone();
            let volumes = state.entry_volume.get(&account_id).cloned().unwrap_or_default();

            if let Some(orders) = state.orders.get_mut(&account_id) {
                allocate_entry_fills(orders, &volumes);
                if let Err(err) = self
                    .with_store(self.store.update_orders(&account_id, orders))
                    .await
                {
                    failed = true;
                    state.record(
                        Severity::Error,
                        StageId::PersistReconciled,
                        format!("order update failed for account {}: {}", account_id, err),
                    );
                    continue;
                }
            }

            let (realized, unrealized) = state
                .pnl_totals
                .get(&account_id)
                .copied()
                .unwrap_or((0.0, 0.0));
            let mut snapshot = account.snapshot.clone();
            snapshot.mark_to_market = realized + unrealized;
            snapshot.updated_at = Utc::now().timestamp_millis();

            if let Err(err) = self
                .with_store(self.store.update_snapshot(&account_id, &snapshot))
                .await
            {
                failed = true;
                state.record(
                    Severity::Error,
                    StageId::PersistReconciled,
                    format!("snapshot update failed for account {}: {}", account_id, err),
                );
            }
        }

        if failed {
            StageOutcome::Failed
        } else {
            StageOutcome::Success
        }
    }

    // ---- stage 4 -----------------------------------------------------

    async fn stage_place_protective(&self, state: &mut CycleState) -> StageOutcome {
        let mut failed = false;

        for account in state.accounts.clone() {
            let account_id = account.id().clone();
            let Some(orders) = state.orders.get(&account_id) else {
                continue;
            };
            let positions = state
                .views
                .get(&account_id)
                .map(|v| v.positions.clone())
                .unwrap_or_default();

            let planned = actions::protective_placements(orders, &positions);
            if planned.is_empty() {
                continue;
            }

            let mut placed: Vec<(PlannedPlacement, String)> = Vec::new();
            for plan in planned {
                match self
                    .with_broker(self.gateway.place_order(&account_id, &plan.spec))
                    .await
                {
                    Ok(ack) => {
                        info!(
                            "placed protective {:?} for order {} as {}",
                            plan.kind, plan.order_id, ack.broker_id
                        );
                        placed.push((plan, ack.broker_id));
                    }
                    Err(err) => {
                        failed = true;
                        state.record(
                            Severity::Error,
                            StageId::PlaceProtective,
                            format!(
                                "protective {:?} placement failed for order {}: {}",
                                plan.kind, plan.order_id, err
                            ),
                        );
                    }
                }
            }

            if !placed.is_empty() {
                if let Some(orders) = state.orders.get_mut(&account_id) {
                    for (plan, broker_id) in &placed {
                        apply_leg_placement(orders, plan.order_id, plan.kind, broker_id);
                    }
                }
                self.persist_orders_best_effort(state, &account_id, StageId::PlaceProtective)
                    .await;
            }
        }

        if failed {
            StageOutcome::Failed
        } else {
            StageOutcome::Success
        }
    }

    // ---- stages 5 and 6 ----------------------------------------------

    async fn stage_modify(&self, state: &mut CycleState, kind: LegKind) -> StageOutcome {
        let stage = match kind {
            LegKind::Entry => StageId::ModifyEntries,
            _ => StageId::ModifyStops,
        };
        let mut failed = false;

        for account in state.accounts.clone() {
            let account_id = account.id().clone();
            let Some(orders) = state.orders.get(&account_id) else {
                continue;
            };

            let planned: Vec<PlannedModification> = match kind {
                LegKind::Entry => actions::entry_modifications(orders, self.prices.as_ref()),
                _ => actions::stop_modifications(orders, self.prices.as_ref()),
            };
            if planned.is_empty() {
                continue;
            }

            let mut applied = Vec::new();
            for plan in planned {
                match self
                    .with_broker(
                        self.gateway
                            .modify_order(&account_id, &plan.broker_id, &plan.spec),
                    )
                    .await
                {
                    Ok(_) => {
                        info!(
                            "modified {:?} leg of order {} to price {}",
                            plan.kind, plan.order_id, plan.spec.price
                        );
                        applied.push(plan);
                    }
                    Err(err) => {
                        failed = true;
                        state.record(
                            Severity::Error,
                            stage,
                            format!(
                                "{:?} modification failed for order {}: {}",
                                plan.kind, plan.order_id, err
                            ),
                        );
                    }
                }
            }

            if !applied.is_empty() {
                if let Some(orders) = state.orders.get_mut(&account_id) {
                    for plan in &applied {
                        apply_leg_modification(orders, plan.order_id, plan.kind, plan.spec.price);
                    }
                }
                self.persist_orders_best_effort(state, &account_id, stage).await;
            }
        }

        if failed {
            StageOutcome::Failed
        } else {
            StageOutcome::Success
        }
    }

    // ---- stage 7 -----------------------------------------------------

    async fn stage_remove_rejected(&self, state: &mut CycleState) -> StageOutcome {
        let mut failed = false;

        for account in state.accounts.clone() {
            let account_id = account.id().clone();
            let Some(orders) = state.orders.get(&account_id) else {
                continue;
            };

            // Capture before removal; stage 8 regenerates from these.
            let rejected = actions::rejected_entry_orders(orders);
            if !rejected.is_empty() {
                state
                    .rejected_entries
                    .insert(account_id.clone(), rejected);
            }

            let refs = actions::rejected_leg_refs(orders);
            if refs.is_empty() {
                continue;
            }

            match self
                .with_store(self.store.remove_legs(&account_id, &refs))
                .await
            {
                Ok(()) => {
                    info!(
                        "removed {} rejected leg(s) for account {}",
                        refs.len(),
                        account_id
                    );
                    if let Some(orders) = state.orders.get_mut(&account_id) {
                        strip_rejected_legs(orders);
                    }
                }
                Err(err) => {
                    failed = true;
                    state.record(
                        Severity::Error,
                        StageId::RemoveRejected,
                        format!("rejected-leg cleanup failed for account {}: {}", account_id, err),
                    );
                }
            }
        }

        if failed {
            StageOutcome::Failed
        } else {
            StageOutcome::Success
        }
    }

    // ---- stage 8 -----------------------------------------------------

    async fn stage_prepare_regeneration(&self, state: &mut CycleState) -> StageOutcome {
        let tenant = state.result.tenant_id.clone();
        let policy = match self.with_store(self.store.regeneration_policy(&tenant)).await {
            Ok(policy) => policy,
            Err(err) => {
                state.record(
                    Severity::Error,
                    StageId::PrepareRegeneration,
                    format!("regeneration policy load failed: {}", err),
                );
                return StageOutcome::Failed;
            }
        };

        if !policy.enabled {
            state.record(
                Severity::Info,
                StageId::PrepareRegeneration,
                "entry regeneration disabled for tenant",
            );
            return StageOutcome::Skipped;
        }

        for (account_id, rejected) in state.rejected_entries.clone() {
            for spec in actions::regeneration_specs(&rejected, &policy) {
                state.regenerated.push((account_id.clone(), spec));
            }
        }

        StageOutcome::Success
    }

    // ---- stage 9 -----------------------------------------------------

    async fn stage_place_regenerated(&self, state: &mut CycleState) -> StageOutcome {
        // Batch semantics: per-item failure never blocks the rest.
        for (account_id, spec) in state.regenerated.clone() {
            match self
                .with_broker(self.gateway.place_order(&account_id, &spec))
                .await
            {
                Ok(ack) => {
                    info!(
                        "regenerated entry {} for account {} as {}",
                        spec.external_id, account_id, ack.broker_id
                    );
                }
                Err(err) => {
                    state.record(
                        Severity::Error,
                        StageId::PlaceRegenerated,
                        format!(
                            "regenerated order {} failed for account {}: {}",
                            spec.external_id, account_id, err
                        ),
                    );
                }
            }
        }

        StageOutcome::Success
    }

    // ---- stage 10 ----------------------------------------------------

    fn stage_report(&self, state: &mut CycleState) -> StageOutcome {
        let errors = state.result.error_strings();
        if errors.is_empty() {
            debug!("cycle for {} finished clean", state.result.tenant_id);
        } else {
            warn!(
                "cycle for {} finished with {} issue(s)",
                state.result.tenant_id,
                errors.len()
            );
        }
        StageOutcome::Success
    }

    /// Write-back after a lifecycle action. Failure is recorded, never
    /// escalated: the durable state converges on a later cycle.
    async fn persist_orders_best_effort(
        &self,
        state: &mut CycleState,
        account_id: &AccountId,
        stage: StageId,
    ) {
        let Some(orders) = state.orders.get(account_id).cloned() else {
            return;
        };
        if let Err(err) = self
            .with_store(self.store.update_orders(account_id, &orders))
            .await
        {
            state.record(
                Severity::Error,
                stage,
                format!("order write-back failed for account {}: {}", account_id, err),
            );
        }
    }
}

/// Everything stage 2 derives for one account.
struct ComputedPnl {
    matches: Vec<PnlMatch>,
    entry_volume: HashMap<Instrument, f64>,
    realized: f64,
    unrealized: f64,
    warnings: Vec<String>,
}

/// Partitions the account's fills per instrument into entry/exit sides and
/// runs the FIFO matcher on each.
///
/// The opening direction comes from the tracked order for the instrument;
/// failing that, from the broker position's sign; failing that, from the
/// first fill observed.
fn compute_account_pnl(
    orders: &[Order],
    view: &BrokerView,
    prices: &dyn FairPriceSource,
) -> ComputedPnl {
    let mut by_instrument: HashMap<Instrument, Vec<Fill>> = HashMap::new();
    for fill in &view.fills {
        by_instrument
            .entry(fill.instrument.clone())
            .or_default()
            .push(fill.clone());
    }

    // Stable processing order so recomputation is reproducible.
    let mut instruments: Vec<Instrument> = by_instrument.keys().cloned().collect();
    instruments.sort_by(|a, b| {
        (a.exchange(), a.symbol()).cmp(&(b.exchange(), b.symbol()))
    });

    let mut computed = ComputedPnl {
        matches: Vec::new(),
        entry_volume: HashMap::new(),
        realized: 0.0,
        unrealized: 0.0,
        warnings: Vec::new(),
    };

    for instrument in instruments {
        let fills = &by_instrument[&instrument];

        let direction = orders
            .iter()
            .find(|o| o.instrument() == &instrument)
            .map(|o| o.side())
            .or_else(|| {
                view.positions
                    .iter()
                    .find(|p| p.instrument == instrument && p.quantity != 0.0)
                    .map(|p| {
                        if p.quantity > 0.0 {
                            OrderSide::Buy
                        } else {
                            OrderSide::Sell
                        }
                    })
            })
            .unwrap_or_else(|| fills[0].side);

        let entries: Vec<Fill> = fills
            .iter()
            .filter(|f| f.side == direction)
            .cloned()
            .collect();
        let exits: Vec<Fill> = fills
            .iter()
            .filter(|f| f.side != direction)
            .cloned()
            .collect();

        // Open inventory is valued at the price the position would close at.
        let fair = prices.fair_price(&instrument).map(|fp| match direction {
            OrderSide::Buy => fp.sell,
            OrderSide::Sell => fp.buy,
        });

        let outcome = matcher::match_fills(&instrument, direction, &entries, &exits, fair);

        computed.realized += outcome.realized_total;
        computed.unrealized += outcome.unrealized_total;
        computed.warnings.extend(outcome.warnings);
        computed.matches.extend(outcome.matches);
        computed
            .entry_volume
            .insert(instrument, entries.iter().map(|f| f.quantity).sum());
    }

    computed
}

/// Distributes each instrument's entry fill volume across that
/// instrument's orders in creation order, updating fill quantity and
/// status on each entry leg.
fn allocate_entry_fills(orders: &mut [Order], volumes: &HashMap<Instrument, f64>) {
    let mut remaining = volumes.clone();

    let mut indices: Vec<usize> = (0..orders.len()).collect();
    indices.sort_by_key(|&i| orders[i].created_at());

    for i in indices {
        let order = &mut orders[i];
        if matches!(order.entry.status, LegStatus::Rejected | LegStatus::Cancelled) {
            continue;
        }
        let Some(rem) = remaining.get_mut(order.instrument()) else {
            continue;
        };
        let take = rem.min(order.entry.quantity);
        *rem -= take;

        order.entry.filled_quantity = take;
        if take >= order.entry.quantity && order.entry.quantity > 0.0 {
            order.entry.status = LegStatus::Filled;
        } else if take > 0.0 {
            order.entry.status = LegStatus::PartiallyFilled;
        }
    }
}

fn apply_leg_placement(orders: &mut [Order], order_id: uuid::Uuid, kind: LegKind, broker_id: &str) {
    let Some(order) = orders.iter_mut().find(|o| o.id() == order_id) else {
        return;
    };
    let leg = match kind {
        LegKind::Entry => Some(&mut order.entry),
        LegKind::StopLoss => order.stop_loss.as_mut(),
        LegKind::TakeProfit => order.take_profit.as_mut(),
    };
    if let Some(leg) = leg {
        leg.broker_id = Some(broker_id.to_string());
        leg.status = LegStatus::Placed;
    }
}

fn apply_leg_modification(orders: &mut [Order], order_id: uuid::Uuid, kind: LegKind, price: f64) {
    let Some(order) = orders.iter_mut().find(|o| o.id() == order_id) else {
        return;
    };
    let leg = match kind {
        LegKind::Entry => Some(&mut order.entry),
        LegKind::StopLoss => order.stop_loss.as_mut(),
        LegKind::TakeProfit => order.take_profit.as_mut(),
    };
    if let Some(leg) = leg {
        leg.price = price;
        leg.status = LegStatus::Modified;
    }
}

/// Drops rejected legs from the in-cycle copy, mirroring what the store
/// just did durably. A rejected entry removes the whole order.
fn strip_rejected_legs(orders: &mut Vec<Order>) {
    orders.retain(|o| o.entry.status != LegStatus::Rejected);
    for order in orders.iter_mut() {
        if order
            .stop_loss
            .as_ref()
            .is_some_and(|l| l.status == LegStatus::Rejected)
        {
            order.stop_loss = None;
        }
        if order
            .take_profit
            .as_ref()
            .is_some_and(|l| l.status == LegStatus::Rejected)
        {
            order.take_profit = None;
        }
    }
}

#[cfg(test)]
mod tests;
