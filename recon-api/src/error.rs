use thiserror::Error;

/// Failure classes reported by the broker gateway.
///
/// The pipeline only treats `SessionExpired` as "abort and flag a session
/// refresh"; everything else is retried naturally on the next cycle.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Broker indicated the session is no longer valid (404/auth-expired).
    #[error("broker session expired: {0}")]
    SessionExpired(String),

    /// Network hiccup, timeout, throttling. Safe to retry next cycle.
    #[error("transient broker error: {0}")]
    Transient(String),

    /// Broker understood the request and refused it.
    #[error("rejected by broker: {0}")]
    Rejected(String),
}

impl BrokerError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, BrokerError::SessionExpired(_))
    }
}

/// Failure classes reported by the state store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation failed: {0}")]
    Query(String),
}
