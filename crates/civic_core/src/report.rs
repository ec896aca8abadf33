use crate::reconcile::DegradeReason;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Healthy,
    Degraded,
    PersistenceFailed,
}

impl RunStatus {
    /// HTTP-style status for the trigger's response.
    pub fn http_status(self) -> u16 {
        match self {
            RunStatus::Healthy => 200,
            RunStatus::Degraded => 207,
            RunStatus::PersistenceFailed => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOutcome {
    pub success: bool,
    pub count: usize,
    pub total: usize,
    pub preserved: usize,
    pub reason: Option<DegradeReason>,
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn is_healthy(&self) -> bool {
        self.success && self.reason.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub success: bool,
    pub status: RunStatus,
    pub timestamp: String,
    pub total_meetings: usize,
    pub active_org_count: usize,
    pub persisted: bool,
    pub persist_error: Option<String>,
    /// Set when the previous active-org set could not be read; it is then left as stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_orgs_error: Option<String>,
    pub results: BTreeMap<String, SourceOutcome>,
}

impl RunReport {
    pub fn new(
        timestamp: String,
        results: BTreeMap<String, SourceOutcome>,
        total_meetings: usize,
        active_org_count: usize,
        persist_error: Option<String>,
    ) -> Self {
        let persisted = persist_error.is_none();
        let status = if !persisted {
            RunStatus::PersistenceFailed
        } else if results.values().all(SourceOutcome::is_healthy) {
            RunStatus::Healthy
        } else {
            RunStatus::Degraded
        };
        Self {
            success: status == RunStatus::Healthy,
            status,
            timestamp,
            total_meetings,
            active_org_count,
            persisted,
            persist_error,
            active_orgs_error: None,
            results,
        }
    }

    /// Records that the active-org set was skipped this run. A persisted run becomes degraded.
    pub fn with_active_orgs_error(mut self, error: String) -> Self {
        if self.status == RunStatus::Healthy {
            self.status = RunStatus::Degraded;
            self.success = false;
        }
        self.active_orgs_error = Some(error);
        self
    }

    pub fn http_status(&self) -> u16 {
        self.status.http_status()
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = (&str, &SourceOutcome)> {
        self.results
            .iter()
            .filter(|(_, outcome)| !outcome.success)
            .map(|(name, outcome)| (name.as_str(), outcome))
    }
}
