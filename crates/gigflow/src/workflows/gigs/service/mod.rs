//! Lifecycle use cases composed over the store, the notifier and the penalty engine.

mod accept;
mod applications;
mod jobs;

pub use accept::{accept_application, Acceptance};
pub use jobs::MyJob;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use crate::clock::Clock;

use super::discipline::{
    DisciplineLedger, Incident, IncidentReport, PenaltyEngine, PenaltyOutcome, PenaltyRuleTable,
};
use super::domain::{Application, ApplicationId, Caller, Job, JobId, Role, UserId};
use super::error::GigError;
use super::lifecycle::ApplicationStatus;
use super::repository::{MarketplaceStore, Notification, NotificationKind, Notifier};

/// Result of a transition that may also have produced a discipline incident.
#[derive(Debug, Clone, Serialize)]
pub struct PenalizedTransition<T> {
    pub record: T,
    /// `None` when no incident applied or penalty reporting failed after the transition.
    pub penalty: Option<PenaltyOutcome>,
}

/// Job plus the applications the caller is allowed to see.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetails {
    pub job: Job,
    pub applications: Option<Vec<Application>>,
    pub my_application: Option<Application>,
}

/// A caller's own ledger and incident history.
#[derive(Debug, Clone, Serialize)]
pub struct DisciplineView {
    pub user_id: UserId,
    pub ledger: DisciplineLedger,
    pub blocked: bool,
    pub incidents: Vec<Incident>,
}

static JOB_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_job_id() -> JobId {
    let id = JOB_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    JobId(format!("job-{id:06}"))
}

fn next_application_id() -> ApplicationId {
    let id = APPLICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ApplicationId(format!("app-{id:06}"))
}

/// Service composing the marketplace store, notification dispatch and the penalty engine.
pub struct GigService<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    penalties: PenaltyEngine,
    clock: Arc<dyn Clock>,
}

impl<S, N> GigService<S, N>
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        rules: Arc<PenaltyRuleTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            penalties: PenaltyEngine::new(rules),
            clock,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn penalties(&self) -> &PenaltyEngine {
        &self.penalties
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Attaches the stored discipline snapshot to an identity vouched for by the auth layer.
    pub fn resolve_caller(&self, user_id: &UserId, role: Role) -> Result<Caller, GigError> {
        let record = self.store.ensure_user(user_id, role)?;
        Ok(Caller::new(user_id.clone(), role).with_discipline(record.ledger))
    }

    pub fn discipline(&self, caller: &Caller) -> Result<DisciplineView, GigError> {
        let record = self.store.ensure_user(&caller.user_id, caller.role)?;
        let incidents = self.store.incidents_for_user(&caller.user_id)?;
        Ok(DisciplineView {
            user_id: record.user_id,
            blocked: record.ledger.is_blocked(self.now()),
            ledger: record.ledger,
            incidents,
        })
    }

    fn load_job(&self, id: &JobId) -> Result<Job, GigError> {
        self.store
            .fetch_job(id)?
            .ok_or_else(|| GigError::NotFound(format!("job {id} not found")))
    }

    fn load_application(&self, id: &ApplicationId) -> Result<Application, GigError> {
        self.store
            .fetch_application(id)?
            .ok_or_else(|| GigError::NotFound(format!("application {id} not found")))
    }

    /// Loads a job and checks the caller is the employer who posted it.
    fn owned_job(&self, caller: &Caller, id: &JobId) -> Result<Job, GigError> {
        let job = self.load_job(id)?;
        if !job.is_owned_by(&caller.user_id) {
            return Err(GigError::Authorization(format!(
                "job {id} belongs to another employer"
            )));
        }
        Ok(job)
    }

    fn accepted_workers(&self, job: &JobId) -> Result<Vec<UserId>, GigError> {
        Ok(self
            .store
            .applications_for_job(job)?
            .into_iter()
            .filter(|application| application.status == ApplicationStatus::Accepted)
            .map(|application| application.worker_id)
            .collect())
    }

    fn dispatch(&self, notification: Notification) {
        let user_id = notification.user_id.clone();
        let kind = notification.kind;
        if let Err(err) = self.notifier.notify_now(notification) {
            warn!(%user_id, ?kind, error = %err, "notification dispatch failed");
        }
    }

    fn dispatch_at(&self, notification: Notification, scheduled_at: DateTime<Utc>) {
        let user_id = notification.user_id.clone();
        let kind = notification.kind;
        if let Err(err) = self.notifier.schedule(notification, scheduled_at) {
            warn!(%user_id, ?kind, error = %err, "notification scheduling failed");
        }
    }

    fn notify_workers(&self, job: &Job, kind: NotificationKind, title: &str, message: &str) {
        let workers = match self.accepted_workers(&job.id) {
            Ok(workers) => workers,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "could not list workers to notify");
                return;
            }
        };
        for worker in workers {
            self.dispatch(notification(worker, kind, title, message, &job.id));
        }
    }

    /// Runs the penalty engine after a transition has been committed.
    fn report_incident(&self, report: IncidentReport) -> Option<PenaltyOutcome> {
        let now = self.now();
        let outcome = self
            .store
            .ensure_user(&report.user_id, report.kind.role())
            .map_err(GigError::from)
            .and_then(|_| self.penalties.report(self.store.as_ref(), &report, now));
        match outcome {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                error!(
                    user_id = %report.user_id,
                    job_id = %report.job_id,
                    incident = report.kind.label(),
                    error = %err,
                    "penalty not recorded after committed transition; needs reconciliation"
                );
                None
            }
        }
    }
}

fn notification(
    user_id: UserId,
    kind: NotificationKind,
    title: &str,
    message: &str,
    job_id: &JobId,
) -> Notification {
    Notification {
        user_id,
        kind,
        title: title.to_string(),
        message: message.to_string(),
        related_job_id: Some(job_id.clone()),
    }
}

fn require_role(caller: &Caller, role: Role, action: &str) -> Result<(), GigError> {
    if caller.role != role {
        return Err(GigError::Authorization(format!(
            "only {}s can {action}",
            role.label()
        )));
    }
    Ok(())
}

fn require_unblocked(caller: &Caller, now: DateTime<Utc>) -> Result<(), GigError> {
    match caller.discipline.blocked_until {
        Some(until) if until > now => Err(GigError::Authorization(format!(
            "account is temporarily blocked until {}",
            until.to_rfc3339()
        ))),
        _ => Ok(()),
    }
}
