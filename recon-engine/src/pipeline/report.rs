use super::stage::{StageId, StageOutcome};
use chrono::Utc;
use recon_api::TenantId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of one recorded issue. Maps onto the cycle error taxonomy:
/// `Fatal`/`SessionExpired` abort the cycle, `Error` is stage-local,
/// `Warning` flags a data inconsistency, `Info` is not an error at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Fatal,
    SessionExpired,
    Error,
    Warning,
    Info,
}

/// One entry in the per-cycle aggregated list. Nothing is ever dropped:
/// every failure path appends here or is explicitly classified as Info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleIssue {
    pub severity: Severity,
    pub stage: StageId,
    pub message: String,
}

impl CycleIssue {
    pub fn new(severity: Severity, stage: StageId, message: impl Into<String>) -> Self {
        Self {
            severity,
            stage,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self.severity, Severity::Info)
    }
}

impl fmt::Display for CycleIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {:?}: {}", self.severity, self.stage, self.message)
    }
}

/// Outcome of one pipeline execution for one tenant. Transient: built for
/// delivery to the tenant's connections, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub tenant_id: TenantId,
    pub outcomes: Vec<(StageId, StageOutcome)>,
    pub issues: Vec<CycleIssue>,
    pub timestamp: i64,
}

impl CycleResult {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            outcomes: Vec::new(),
            issues: Vec::new(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn outcome(&self, stage: StageId) -> StageOutcome {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == stage)
            .map(|(_, o)| *o)
            .unwrap_or(StageOutcome::Skipped)
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.is_error())
    }

    pub fn session_expired(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == Severity::SessionExpired)
    }

    /// The ordered strings delivered in a `monitoring_errors` message.
    pub fn error_strings(&self) -> Vec<String> {
        self.issues
            .iter()
            .filter(|i| i.is_error())
            .map(|i| i.to_string())
            .collect()
    }
}
