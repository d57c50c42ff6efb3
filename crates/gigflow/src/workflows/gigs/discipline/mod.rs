//! Incidents, the per-user discipline ledger, and the escalating penalty engine.

mod ledger;
mod rules;

pub use ledger::{DisciplineLedger, DisciplineRecord};
pub use rules::{
    resolve_action, IncidentCategory, PenaltyAction, PenaltyRule, PenaltyRuleTable, RoleRules,
    RuleTableError, MAX_BLOCK_DAYS,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::domain::{IncidentId, JobId, Role, UserId};
use super::error::GigError;
use super::repository::{DisciplineRepository, RepositoryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    WorkerCancelled,
    WorkerNoShow,
    EmployerCancelled,
}

impl IncidentType {
    pub const fn role(self) -> Role {
        match self {
            IncidentType::WorkerCancelled | IncidentType::WorkerNoShow => Role::Worker,
            IncidentType::EmployerCancelled => Role::Employer,
        }
    }

    pub const fn category(self) -> IncidentCategory {
        match self {
            IncidentType::WorkerCancelled | IncidentType::EmployerCancelled => {
                IncidentCategory::Cancel
            }
            IncidentType::WorkerNoShow => IncidentCategory::NoShow,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            IncidentType::WorkerCancelled => "worker_cancelled",
            IncidentType::WorkerNoShow => "worker_no_show",
            IncidentType::EmployerCancelled => "employer_cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Audit record of a broken commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub user_id: UserId,
    pub job_id: JobId,
    #[serde(rename = "type")]
    pub kind: IncidentType,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
    pub penalty_applied: Option<String>,
}

/// What a lifecycle transition hands to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentReport {
    pub user_id: UserId,
    pub job_id: JobId,
    pub kind: IncidentType,
    pub severity: Severity,
}

/// Pure result of running one incident against a ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PenaltyDecision {
    pub counter: u32,
    pub action: Option<PenaltyAction>,
    pub penalty_applied: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PenaltyOutcome {
    pub incident: Incident,
    pub action: Option<PenaltyAction>,
    pub penalty_applied: String,
    pub blocked_until: Option<DateTime<Utc>>,
}

const MAX_LEDGER_ATTEMPTS: usize = 3;

static INCIDENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_incident_id() -> IncidentId {
    let id = INCIDENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    IncidentId(format!("inc-{id:06}"))
}

/// Resolves incidents against an injected, read-only rule table.
#[derive(Debug, Clone)]
pub struct PenaltyEngine {
    rules: Arc<PenaltyRuleTable>,
}

impl PenaltyEngine {
    pub fn new(rules: Arc<PenaltyRuleTable>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &PenaltyRuleTable {
        &self.rules
    }

    /// Counts the incident first, so the Nth incident is judged at counter N.
    pub fn decide(
        &self,
        ledger: &mut DisciplineLedger,
        kind: IncidentType,
        now: DateTime<Utc>,
    ) -> Result<PenaltyDecision, GigError> {
        let counter = ledger.record(kind.category());
        let action = resolve_action(&self.rules, kind.role(), kind.category(), counter);
        let penalty_applied = ledger.apply(action, now)?;
        Ok(PenaltyDecision {
            counter,
            action,
            penalty_applied,
        })
    }

    /// Records the incident and the ledger update in one store write, retrying lost updates.
    pub fn report<R>(
        &self,
        repository: &R,
        report: &IncidentReport,
        now: DateTime<Utc>,
    ) -> Result<PenaltyOutcome, GigError>
    where
        R: DisciplineRepository + ?Sized,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut record = repository
                .fetch_discipline(&report.user_id)?
                .ok_or_else(|| {
                    GigError::NotFound(format!("user {} not found for incident", report.user_id))
                })?;

            let decision = self.decide(&mut record.ledger, report.kind, now)?;
            let incident = Incident {
                id: next_incident_id(),
                user_id: report.user_id.clone(),
                job_id: report.job_id.clone(),
                kind: report.kind,
                severity: report.severity,
                occurred_at: now,
                penalty_applied: Some(decision.penalty_applied.clone()),
            };

            match repository.record_penalty(record, incident) {
                Ok((stored, incident)) => {
                    info!(
                        user_id = %report.user_id,
                        job_id = %report.job_id,
                        incident = report.kind.label(),
                        counter = decision.counter,
                        penalty = %decision.penalty_applied,
                        "discipline incident recorded"
                    );
                    return Ok(PenaltyOutcome {
                        incident,
                        action: decision.action,
                        penalty_applied: decision.penalty_applied,
                        blocked_until: stored.ledger.blocked_until,
                    });
                }
                Err(RepositoryError::VersionConflict) if attempt < MAX_LEDGER_ATTEMPTS => {
                    debug!(user_id = %report.user_id, attempt, "ledger changed underneath, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
