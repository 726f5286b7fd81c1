use super::ids::{ConnectionId, TenantId};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Typed messages pushed over a tenant's live connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorMessage {
    ConnectionEstablished {
        connection_id: ConnectionId,
        tenant_id: TenantId,
        timestamp: i64,
    },
    MonitoringErrors {
        errors: Vec<String>,
        timestamp: i64,
    },
}

impl MonitorMessage {
    pub fn connection_established(connection_id: ConnectionId, tenant_id: TenantId) -> Self {
        Self::ConnectionEstablished {
            connection_id,
            tenant_id,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn monitoring_errors(errors: Vec<String>) -> Self {
        Self::MonitoringErrors {
            errors,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}
