use super::*;
use crate::gateway::mock::{BrokerOp, MockBrokerGateway};
use crate::limits::SharedLimits;
use crate::pricing::StaticFairPrices;
use crate::store::memory::{InMemoryStore, StoreOp};
use recon_api::{FairPrice, OrderLeg, RegenerationPolicy};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    gateway: Arc<MockBrokerGateway>,
    store: Arc<InMemoryStore>,
    prices: Arc<StaticFairPrices>,
    pipeline: Pipeline,
}

fn harness() -> Harness {
    harness_with(PipelineConfig::default())
}

fn harness_with(config: PipelineConfig) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let gateway = Arc::new(MockBrokerGateway::new());
    let store = Arc::new(InMemoryStore::new());
    let prices = Arc::new(StaticFairPrices::new());
    let pipeline = Pipeline::new(
        gateway.clone(),
        store.clone(),
        prices.clone(),
        SharedLimits::new(4, 4),
        config,
    );
    Harness {
        gateway,
        store,
        prices,
        pipeline,
    }
}

fn tenant() -> TenantId {
    TenantId::new("tenant-1")
}

fn account_id() -> AccountId {
    AccountId::new("acct-1")
}

fn account() -> Account {
    Account::new(account_id(), tenant(), true)
}

fn inst() -> Instrument {
    Instrument::new("ACME", "TEST")
}

fn buy_fill(qty: f64, price: f64, ts: i64, seq: &str) -> Fill {
    Fill::new(inst(), OrderSide::Buy, qty, price, ts, seq)
}

fn sell_fill(qty: f64, price: f64, ts: i64, seq: &str) -> Fill {
    Fill::new(inst(), OrderSide::Sell, qty, price, ts, seq)
}

fn tracked_order(qty: f64) -> Order {
    Order::new(
        account_id(),
        inst(),
        OrderSide::Buy,
        "momentum",
        OrderLeg::new(LegKind::Entry, 100.0, qty).with_broker_id("b-entry"),
        1,
    )
}

#[tokio::test]
async fn clean_cycle_persists_matches_and_reconciled_orders() {
    let h = harness();
    h.store.seed_account(account());
    h.store.seed_orders(account_id(), vec![tracked_order(15.0)]);
    h.gateway.seed_fills(
        account_id(),
        vec![
            buy_fill(10.0, 100.0, 1, "e1"),
            buy_fill(5.0, 102.0, 2, "e2"),
            sell_fill(12.0, 105.0, 3, "x1"),
        ],
    );
    h.prices.set(inst(), FairPrice { buy: 104.5, sell: 104.0 });

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    assert!(!result.has_errors(), "issues: {:?}", result.issues);
    assert_eq!(result.outcome(StageId::FetchSnapshots), StageOutcome::Success);
    assert_eq!(result.outcome(StageId::ComputePnl), StageOutcome::Success);
    assert_eq!(result.outcome(StageId::PersistReconciled), StageOutcome::Success);

    // Two closed slices plus one open residual lot.
    let matches = h.store.stored_matches(&account_id());
    assert_eq!(matches.len(), 3);
    let realized: f64 = matches.iter().filter_map(|m| m.realized_pnl).sum();
    assert_eq!(realized, 56.0);

    // 3 @ 102 open, valued at the sell-side fair of 104.
    let snapshot = h.store.stored_snapshot(&account_id()).unwrap();
    assert_eq!(snapshot.mark_to_market, 62.0);

    // Entry volume 15 reconciled onto the tracked order.
    let orders = h.store.stored_orders(&account_id());
    assert_eq!(orders[0].entry.filled_quantity, 15.0);
    assert_eq!(orders[0].entry.status, LegStatus::Filled);
}

#[tokio::test]
async fn stage_one_failure_short_circuits_to_report() {
    let h = harness();
    h.store.seed_account(account());
    h.gateway.fail_with(
        BrokerOp::FetchOrderBook,
        BrokerError::Transient("connection reset".into()),
    );

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    assert_eq!(result.outcome(StageId::FetchSnapshots), StageOutcome::Failed);
    for stage in [
        StageId::ComputePnl,
        StageId::PersistReconciled,
        StageId::PlaceProtective,
        StageId::ModifyEntries,
        StageId::ModifyStops,
        StageId::RemoveRejected,
        StageId::PrepareRegeneration,
        StageId::PlaceRegenerated,
    ] {
        assert_eq!(result.outcome(stage), StageOutcome::Skipped, "{:?}", stage);
    }
    assert_eq!(result.outcome(StageId::Report), StageOutcome::Success);

    // Exactly the stage-1 error, and nothing was written.
    assert_eq!(result.error_strings().len(), 1);
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn slow_broker_call_times_out_into_a_stage_failure() {
    let h = harness_with(PipelineConfig {
        broker_timeout: Duration::from_millis(50),
        ..PipelineConfig::default()
    });
    h.store.seed_account(account());
    h.gateway.delay(BrokerOp::FetchOrderBook, Duration::from_secs(60));

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    // The timeout is a transient stage failure, not a hang or a panic.
    assert_eq!(result.outcome(StageId::FetchSnapshots), StageOutcome::Failed);
    assert_eq!(result.outcome(StageId::ComputePnl), StageOutcome::Skipped);
    assert_eq!(result.error_strings().len(), 1);
    assert!(result.error_strings()[0].contains("timed out"));
    assert!(!result.session_expired());
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn session_expired_is_flagged_distinctly_without_writes() {
    let h = harness();
    h.store.seed_account(account());
    h.gateway.fail_with(
        BrokerOp::FetchOrderBook,
        BrokerError::SessionExpired("token rejected".into()),
    );

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    assert!(result.session_expired());
    assert_eq!(result.error_strings().len(), 1);
    assert!(result.error_strings()[0].contains("SessionExpired"));
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn persist_failure_skips_protective_but_not_cleanup() {
    let h = harness();
    h.store.seed_account(account());

    // Tracked order with a rejected take-profit leg for stage 7 to remove.
    let mut order = tracked_order(10.0).with_take_profit({
        let mut tp = OrderLeg::new(LegKind::TakeProfit, 110.0, 10.0).with_broker_id("b-tp");
        tp.status = LegStatus::Rejected;
        tp
    });
    order.entry.filled_quantity = 10.0;
    order.entry.status = LegStatus::Filled;
    h.store.seed_orders(account_id(), vec![order]);
    h.store.fail_op(StoreOp::UpdateOrders);

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    assert_eq!(result.outcome(StageId::PersistReconciled), StageOutcome::Failed);
    assert_eq!(result.outcome(StageId::PlaceProtective), StageOutcome::Skipped);
    assert_eq!(result.outcome(StageId::ModifyEntries), StageOutcome::Success);
    assert_eq!(result.outcome(StageId::ModifyStops), StageOutcome::Success);
    assert_eq!(result.outcome(StageId::RemoveRejected), StageOutcome::Success);

    // Stage 7's cleanup went through despite stage 3's induced failure.
    let orders = h.store.stored_orders(&account_id());
    assert_eq!(orders.len(), 1);
    assert!(orders[0].take_profit.is_none());
}

#[tokio::test]
async fn regeneration_disabled_is_informational_and_skips_placement() {
    let h = harness();
    h.store.seed_account(account());
    let mut order = tracked_order(10.0);
    order.entry.status = LegStatus::Rejected;
    h.store.seed_orders(account_id(), vec![order]);
    // Default policy: disabled.

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    assert_eq!(
        result.outcome(StageId::PrepareRegeneration),
        StageOutcome::Skipped
    );
    assert_eq!(result.outcome(StageId::PlaceRegenerated), StageOutcome::Skipped);
    // The note is informational, not an error, so nothing is reported.
    assert!(result.issues.iter().any(|i| i.severity == Severity::Info));
    assert!(!result.has_errors());
    assert_eq!(result.outcome(StageId::Report), StageOutcome::Skipped);
    assert!(h.gateway.placed_orders().is_empty());
}

#[tokio::test]
async fn allowed_rejected_entries_are_regenerated() {
    let h = harness();
    h.store.seed_account(account());
    let mut order = tracked_order(10.0);
    order.entry.status = LegStatus::Rejected;
    h.store.seed_orders(account_id(), vec![order]);
    h.store.seed_policy(
        tenant(),
        RegenerationPolicy {
            enabled: true,
            allowed_strategies: vec!["momentum".into()],
        },
    );

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    assert_eq!(
        result.outcome(StageId::PrepareRegeneration),
        StageOutcome::Success
    );
    assert_eq!(
        result.outcome(StageId::PlaceRegenerated),
        StageOutcome::Success
    );

    let placed = h.gateway.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].1.kind, LegKind::Entry);
    assert_eq!(placed[0].1.quantity, 10.0);

    // The rejected order itself is gone from the store.
    assert!(h.store.stored_orders(&account_id()).is_empty());
}

#[tokio::test]
async fn regeneration_placement_errors_never_abort_the_batch() {
    let h = harness();
    h.store.seed_account(account());
    let mut order = tracked_order(10.0);
    order.entry.status = LegStatus::Rejected;
    h.store.seed_orders(account_id(), vec![order]);
    h.store.seed_policy(
        tenant(),
        RegenerationPolicy {
            enabled: true,
            allowed_strategies: vec!["momentum".into()],
        },
    );
    h.gateway
        .fail_with(BrokerOp::PlaceOrder, BrokerError::Rejected("margin".into()));

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    // Per-order error recorded; the stage itself does not abort anything.
    assert_eq!(
        result.outcome(StageId::PlaceRegenerated),
        StageOutcome::Success
    );
    assert!(result
        .issues
        .iter()
        .any(|i| i.stage == StageId::PlaceRegenerated && i.severity == Severity::Error));
}

#[tokio::test]
async fn protective_legs_are_placed_and_written_back() {
    let h = harness();
    h.store.seed_account(account());
    let mut order = tracked_order(10.0)
        .with_stop_loss(OrderLeg::new(LegKind::StopLoss, 95.0, 10.0).with_stop_trigger(95.5));
    order.entry.filled_quantity = 10.0;
    order.entry.status = LegStatus::Filled;
    h.store.seed_orders(account_id(), vec![order]);
    h.gateway.seed_positions(
        account_id(),
        vec![Position {
            instrument: inst(),
            quantity: 10.0,
            average_price: 100.0,
        }],
    );

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    assert!(!result.has_errors(), "issues: {:?}", result.issues);
    let placed = h.gateway.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].1.kind, LegKind::StopLoss);
    assert_eq!(placed[0].1.side, OrderSide::Sell);

    let orders = h.store.stored_orders(&account_id());
    let sl = orders[0].stop_loss.as_ref().unwrap();
    assert_eq!(sl.status, LegStatus::Placed);
    assert!(sl.broker_id.is_some());
}

#[tokio::test]
async fn crossed_entry_trigger_drives_modification() {
    let h = harness();
    h.store.seed_account(account());
    let mut order = tracked_order(10.0);
    order.entry.stop_trigger = Some(105.0);
    h.store.seed_orders(account_id(), vec![order]);
    h.prices.set(inst(), FairPrice { buy: 105.5, sell: 105.2 });

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    assert!(!result.has_errors(), "issues: {:?}", result.issues);
    let modified = h.gateway.modified_orders();
    assert_eq!(modified.len(), 1);
    assert_eq!(modified[0].1, "b-entry");
    assert_eq!(modified[0].2.price, 105.0);

    let orders = h.store.stored_orders(&account_id());
    assert_eq!(orders[0].entry.status, LegStatus::Modified);
}

#[tokio::test]
async fn overfilled_exits_surface_as_warnings() {
    let h = harness();
    h.store.seed_account(account());
    h.store.seed_orders(account_id(), vec![tracked_order(5.0)]);
    h.gateway.seed_fills(
        account_id(),
        vec![buy_fill(5.0, 100.0, 1, "e1"), sell_fill(8.0, 101.0, 2, "x1")],
    );

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    assert!(result
        .issues
        .iter()
        .any(|i| i.severity == Severity::Warning && i.stage == StageId::ComputePnl));
    // Warnings do not fail the stage.
    assert_eq!(result.outcome(StageId::ComputePnl), StageOutcome::Success);
}

#[tokio::test]
async fn report_stage_skipped_on_a_silent_cycle() {
    let h = harness();
    h.store.seed_account(account());

    let result = h.pipeline.run_cycle(&tenant(), &[account()]).await;

    assert!(result.issues.is_empty());
    assert_eq!(result.outcome(StageId::Report), StageOutcome::Skipped);
}
