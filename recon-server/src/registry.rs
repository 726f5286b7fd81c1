//! Live connection bookkeeping and result fan-out.
//!
//! An explicit, lock-protected registry object: created once at startup,
//! drained at shutdown. Registering the first connection for a tenant
//! starts its scheduler loop; unregistering the last one stops it. Many
//! connections share one loop, so the broker-call budget is paid once per
//! tenant no matter how many sessions are watching.

use crate::scheduler::{self, SchedulerContext, SchedulerHandle};
use log::{debug, info, warn};
use recon_api::{ConnectionId, MonitorMessage, TenantId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type MessageSender = mpsc::UnboundedSender<MonitorMessage>;

struct Connection {
    tenant: TenantId,
    sender: MessageSender,
}

#[derive(Default)]
struct TenantEntry {
    connections: HashSet<ConnectionId>,
    task: Option<SchedulerHandle>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    tenants: HashMap<TenantId, TenantEntry>,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Inner>>,
    ctx: Arc<SchedulerContext>,
}

impl ConnectionRegistry {
    pub fn new(ctx: Arc<SchedulerContext>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ctx,
        }
    }

    /// Adds a live connection for the tenant. The first connection starts
    /// the tenant's scheduler; later ones share it.
    pub fn register(&self, tenant: TenantId, sender: MessageSender) -> ConnectionId {
        let id = ConnectionId::new();
        let mut inner = self.inner.lock().unwrap();

        inner.connections.insert(
            id,
            Connection {
                tenant: tenant.clone(),
                sender,
            },
        );

        let entry = inner.tenants.entry(tenant.clone()).or_default();
        entry.connections.insert(id);
        if entry.task.is_none() {
            entry.task = Some(scheduler::spawn(
                tenant.clone(),
                self.ctx.clone(),
                self.clone(),
            ));
        }

        info!("connection {} registered for tenant {}", id, tenant);
        id
    }

    /// Removes a connection. Stopping the tenant's scheduler when the last
    /// one goes is observed by the loop within one tick.
    pub fn unregister(&self, id: ConnectionId) {
        let stopped = {
            let mut inner = self.inner.lock().unwrap();
            let Some(conn) = inner.connections.remove(&id) else {
                return;
            };
            debug!("connection {} unregistered for tenant {}", id, conn.tenant);

            let Some(entry) = inner.tenants.get_mut(&conn.tenant) else {
                return;
            };
            entry.connections.remove(&id);
            if entry.connections.is_empty() {
                inner.tenants.remove(&conn.tenant).and_then(|e| e.task)
            } else {
                None
            }
        };

        if let Some(task) = stopped {
            task.stop();
        }
    }

    /// Delivers a message to every live connection of the tenant. A
    /// connection that refuses delivery is dead: it is dropped and
    /// unregistered on the spot, never retried.
    pub fn broadcast(&self, tenant: &TenantId, message: MonitorMessage) {
        let targets: Vec<(ConnectionId, MessageSender)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .connections
                .iter()
                .filter(|(_, c)| &c.tenant == tenant)
                .map(|(id, c)| (*id, c.sender.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, sender) in targets {
            if sender.send(message.clone()).is_err() {
                warn!("dropping dead connection {} for tenant {}", id, tenant);
                dead.push(id);
            }
        }
        for id in dead {
            self.unregister(id);
        }
    }

    pub fn connection_count(&self, tenant: &TenantId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .tenants
            .get(tenant)
            .map(|e| e.connections.len())
            .unwrap_or(0)
    }

    /// Window-close path: every connection for the tenant is dropped so
    /// clients must reconnect, and the tenant entry disappears. The
    /// scheduler loop calling this exits on its own right after.
    pub fn force_close_tenant(&self, tenant: &TenantId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.tenants.remove(tenant) {
            for id in entry.connections {
                inner.connections.remove(&id);
            }
        }
    }

    /// Process shutdown: stop and cancel every tenant loop, drop every
    /// connection.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        for (tenant, entry) in inner.tenants.drain() {
            if let Some(task) = entry.task {
                info!("stopping scheduler for tenant {}", tenant);
                task.stop();
                task.abort();
            }
        }
        inner.connections.clear();
    }
}
