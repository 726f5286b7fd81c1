//! End-to-end scheduler behavior: registration starts the loop, the loop
//! keeps ticking against the store, and the tear-down paths (last client
//! gone, window closed) stop it.

use async_trait::async_trait;
use recon_api::{
    Account, AccountId, AccountSnapshot, BrokerError, LegRef, MonitorMessage, Order, PnlMatch,
    RegenerationPolicy, StateStore, StoreError, TenantId,
};
use recon_engine::gateway::{BrokerOp, MockBrokerGateway};
use recon_engine::pricing::StaticFairPrices;
use recon_engine::store::InMemoryStore;
use recon_engine::{Pipeline, PipelineConfig, SharedLimits};
use recon_server::scheduler::SchedulerContext;
use recon_server::{ConnectionRegistry, TradingWindow};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const TICK: Duration = Duration::from_millis(50);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Store wrapper that counts `accounts` lookups. Every scheduler tick that
/// gets past its preconditions performs exactly one, so the counter is a
/// tick counter.
struct CountingStore {
    inner: InMemoryStore,
    account_loads: AtomicU64,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            account_loads: AtomicU64::new(0),
        }
    }

    fn loads(&self) -> u64 {
        self.account_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for CountingStore {
    async fn accounts(&self, tenant: &TenantId) -> Result<Vec<Account>, StoreError> {
        self.account_loads.fetch_add(1, Ordering::SeqCst);
        self.inner.accounts(tenant).await
    }

    async fn orders(&self, account: &AccountId) -> Result<Vec<Order>, StoreError> {
        self.inner.orders(account).await
    }

    async fn update_orders(
        &self,
        account: &AccountId,
        orders: &[Order],
    ) -> Result<(), StoreError> {
        self.inner.update_orders(account, orders).await
    }

    async fn update_snapshot(
        &self,
        account: &AccountId,
        snapshot: &AccountSnapshot,
    ) -> Result<(), StoreError> {
        self.inner.update_snapshot(account, snapshot).await
    }

    async fn replace_pnl_matches(
        &self,
        account: &AccountId,
        matches: &[PnlMatch],
    ) -> Result<(), StoreError> {
        self.inner.replace_pnl_matches(account, matches).await
    }

    async fn remove_legs(&self, account: &AccountId, legs: &[LegRef]) -> Result<(), StoreError> {
        self.inner.remove_legs(account, legs).await
    }

    async fn regeneration_policy(
        &self,
        tenant: &TenantId,
    ) -> Result<RegenerationPolicy, StoreError> {
        self.inner.regeneration_policy(tenant).await
    }
}

struct Fixture {
    registry: ConnectionRegistry,
    gateway: Arc<MockBrokerGateway>,
    store: Arc<CountingStore>,
}

fn fixture(window: TradingWindow) -> Fixture {
    init_logging();
    let gateway = Arc::new(MockBrokerGateway::new());
    let store = Arc::new(CountingStore::new());
    let limits = SharedLimits::new(4, 4);
    let config = PipelineConfig::default();
    let pipeline = Arc::new(Pipeline::new(
        gateway.clone(),
        store.clone(),
        Arc::new(StaticFairPrices::new()),
        limits.clone(),
        config.clone(),
    ));
    let registry = ConnectionRegistry::new(Arc::new(SchedulerContext {
        pipeline,
        store: store.clone(),
        limits,
        store_timeout: config.store_timeout,
        window,
        tick: TICK,
    }));
    Fixture {
        registry,
        gateway,
        store,
    }
}

fn tenant() -> TenantId {
    TenantId::new("lifecycle-tenant")
}

#[tokio::test]
async fn idle_tenant_keeps_ticking_without_accounts() {
    let fx = fixture(TradingWindow::always_open());
    let (tx, _rx) = mpsc::unbounded_channel();
    fx.registry.register(tenant(), tx);

    sleep(TICK * 8).await;

    // No accounts seeded: the loop polls the store every tick and stays up.
    assert!(fx.store.loads() >= 3);
    assert_eq!(fx.registry.connection_count(&tenant()), 1);
    assert!(fx.gateway.placed_orders().is_empty());
}

#[tokio::test]
async fn second_connection_does_not_start_a_second_loop() {
    let fx = fixture(TradingWindow::always_open());
    let (tx1, _rx1) = mpsc::unbounded_channel();
    let (tx2, _rx2) = mpsc::unbounded_channel();
    fx.registry.register(tenant(), tx1);
    fx.registry.register(tenant(), tx2);

    sleep(TICK * 10).await;

    // One loop for the tenant: the load count tracks elapsed ticks, not
    // connections. Two loops would land near double the tick count.
    let loads = fx.store.loads();
    assert!(loads >= 5, "expected at least 5 ticks, saw {}", loads);
    assert!(loads <= 14, "expected one loop's worth of ticks, saw {}", loads);
}

#[tokio::test]
async fn last_unregister_stops_the_loop_within_a_tick() {
    let fx = fixture(TradingWindow::always_open());
    let (tx1, _rx1) = mpsc::unbounded_channel();
    let (tx2, _rx2) = mpsc::unbounded_channel();
    let a = fx.registry.register(tenant(), tx1);
    let b = fx.registry.register(tenant(), tx2);

    sleep(TICK * 4).await;
    fx.registry.unregister(a);
    sleep(TICK * 4).await;

    // One client left: still ticking.
    assert!(fx.store.loads() >= 4);

    fx.registry.unregister(b);
    sleep(TICK * 3).await;
    let frozen = fx.store.loads();
    sleep(TICK * 5).await;

    assert_eq!(fx.store.loads(), frozen, "loop kept running after last unregister");
    assert_eq!(fx.registry.connection_count(&tenant()), 0);
}

#[tokio::test]
async fn closed_window_force_closes_connections() {
    let never_open = {
        let t = chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        TradingWindow::between(t, t)
    };
    let fx = fixture(never_open);
    let (tx, mut rx) = mpsc::unbounded_channel();
    fx.registry.register(tenant(), tx);

    sleep(TICK * 4).await;

    assert_eq!(fx.registry.connection_count(&tenant()), 0);
    // The registry dropped the sender, so the transport side sees a closed
    // channel and hangs up.
    assert!(matches!(
        rx.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));

    // No more loads after the close.
    let frozen = fx.store.loads();
    sleep(TICK * 4).await;
    assert_eq!(fx.store.loads(), frozen);
}

/// Store whose `accounts` never returns. Counts call attempts so the test
/// can see ticks happening even though no call completes.
struct WedgedStore {
    attempts: AtomicU64,
}

#[async_trait]
impl StateStore for WedgedStore {
    async fn accounts(&self, _tenant: &TenantId) -> Result<Vec<Account>, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_secs(600)).await;
        Ok(Vec::new())
    }

    async fn orders(&self, _account: &AccountId) -> Result<Vec<Order>, StoreError> {
        Ok(Vec::new())
    }

    async fn update_orders(
        &self,
        _account: &AccountId,
        _orders: &[Order],
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn update_snapshot(
        &self,
        _account: &AccountId,
        _snapshot: &AccountSnapshot,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn replace_pnl_matches(
        &self,
        _account: &AccountId,
        _matches: &[PnlMatch],
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn remove_legs(
        &self,
        _account: &AccountId,
        _legs: &[LegRef],
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn regeneration_policy(
        &self,
        _tenant: &TenantId,
    ) -> Result<RegenerationPolicy, StoreError> {
        Ok(RegenerationPolicy::default())
    }
}

#[tokio::test]
async fn wedged_store_is_bounded_by_the_tick_timeout() {
    init_logging();
    let store = Arc::new(WedgedStore {
        attempts: AtomicU64::new(0),
    });
    let limits = SharedLimits::new(4, 4);
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(MockBrokerGateway::new()),
        store.clone(),
        Arc::new(StaticFairPrices::new()),
        limits.clone(),
        PipelineConfig::default(),
    ));
    let registry = ConnectionRegistry::new(Arc::new(SchedulerContext {
        pipeline,
        store: store.clone(),
        limits,
        store_timeout: Duration::from_millis(50),
        window: TradingWindow::always_open(),
        tick: TICK,
    }));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = registry.register(tenant(), tx);

    // The store never answers, but the timeout converts each tick into an
    // error delivery instead of parking the loop inside the call.
    let message = timeout(TICK * 20, rx.recv())
        .await
        .expect("loop stayed wedged in the store call")
        .expect("channel closed before a message arrived");
    match message {
        MonitorMessage::MonitoringErrors { errors, .. } => {
            assert!(errors.iter().any(|e| e.contains("timed out")), "{:?}", errors);
        }
        other => panic!("expected monitoring errors, got {:?}", other),
    }

    // With the call bounded, ticks keep coming and shutdown lands within
    // one tick instead of waiting out the store.
    sleep(TICK * 4).await;
    assert!(store.attempts.load(Ordering::SeqCst) >= 2);

    registry.unregister(id);
    sleep(TICK * 4).await;
    let frozen = store.attempts.load(Ordering::SeqCst);
    sleep(TICK * 4).await;
    assert_eq!(store.attempts.load(Ordering::SeqCst), frozen);
}

#[tokio::test]
async fn cycle_errors_reach_the_client() {
    let fx = fixture(TradingWindow::always_open());
    let account = AccountId::new("acct-1");
    fx.store
        .inner
        .seed_account(Account::new(account, tenant(), true));
    fx.gateway.fail_with(
        BrokerOp::FetchOrderBook,
        BrokerError::Transient("venue unavailable".into()),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    fx.registry.register(tenant(), tx);

    let message = timeout(TICK * 20, rx.recv())
        .await
        .expect("no monitor message before deadline")
        .expect("channel closed before a message arrived");

    match message {
        MonitorMessage::MonitoringErrors { errors, .. } => {
            assert!(!errors.is_empty());
            assert!(errors.iter().any(|e| e.contains("venue unavailable")));
        }
        other => panic!("expected monitoring errors, got {:?}", other),
    }
}
