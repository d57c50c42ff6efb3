use chrono::Duration;
use tracing::info;

use super::super::discipline::{IncidentReport, IncidentType, Severity};
use super::super::domain::{Application, ApplicationId, Caller, JobId, Role};
use super::super::error::GigError;
use super::super::lifecycle::{ApplicationEvent, ApplicationStatus, ArrivalEvent, JobStatus};
use super::super::repository::{MarketplaceStore, NotificationKind, Notifier, RepositoryError};
use super::super::schedule::first_conflict;
use super::{
    next_application_id, notification, require_role, require_unblocked, GigService,
    PenalizedTransition,
};

const LATE_WITHDRAW_HOURS: i64 = 2;

impl<S, N> GigService<S, N>
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    /// Creates a pending application after the worker, capacity and schedule checks pass.
    pub fn apply(&self, caller: &Caller, job_id: &JobId) -> Result<Application, GigError> {
        require_role(caller, Role::Worker, "apply")?;
        let now = self.now();
        require_unblocked(caller, now)?;

        let job = self.load_job(job_id)?;
        if job.status != JobStatus::Open {
            return Err(GigError::StateConflict(format!(
                "job {job_id} is not open for applications"
            )));
        }
        if !job.has_capacity() {
            return Err(GigError::StateConflict(format!("job {job_id} already filled")));
        }
        if self
            .store
            .find_application(job_id, &caller.user_id)?
            .is_some()
        {
            return Err(GigError::StateConflict(
                "you already applied for this job".to_string(),
            ));
        }

        let commitments = self.store.accepted_commitments(&caller.user_id)?;
        if let Some(conflict) = first_conflict(&job.id, &job.window(), &commitments) {
            return Err(GigError::StateConflict(format!(
                "you already accepted a job at this time ({})",
                conflict.job_id
            )));
        }

        let application = Application::pending(
            next_application_id(),
            job.id.clone(),
            caller.user_id.clone(),
            now,
        );
        let application = self
            .store
            .insert_application(application)
            .map_err(|err| match err {
                RepositoryError::Conflict => {
                    GigError::StateConflict("you already applied for this job".to_string())
                }
                other => other.into(),
            })?;
        info!(
            job_id = %job.id,
            application_id = %application.id,
            worker_id = %application.worker_id,
            "application submitted"
        );

        self.dispatch(notification(
            job.employer_id.clone(),
            NotificationKind::JobApplied,
            "New application",
            &format!(
                "Worker {} applied to \"{}\"",
                application.worker_id, job.title
            ),
            &job.id,
        ));
        Ok(application)
    }

    pub fn reject(
        &self,
        caller: &Caller,
        job_id: &JobId,
        application_id: &ApplicationId,
    ) -> Result<Application, GigError> {
        self.owned_job(caller, job_id)?;
        let mut application = self.job_application(job_id, application_id)?;

        application.status = application.status.on(ApplicationEvent::Reject)?;
        application.updated_at = self.now();

        let application = self.store.update_application(application)?;
        info!(application_id = %application.id, "application rejected");
        Ok(application)
    }

    /// Worker pulls a pending application; late withdrawals are reported as high severity.
    pub fn withdraw(
        &self,
        caller: &Caller,
        application_id: &ApplicationId,
        reason: Option<String>,
    ) -> Result<PenalizedTransition<Application>, GigError> {
        let mut application = self.load_application(application_id)?;
        if application.worker_id != caller.user_id {
            return Err(GigError::Authorization(format!(
                "application {application_id} belongs to another worker"
            )));
        }
        let job = self.load_job(&application.job_id)?;
        let now = self.now();

        application.status = application.status.on(ApplicationEvent::Withdraw)?;
        application.cancelled_at = Some(now);
        application.cancel_reason = Some(
            reason
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| "Withdrawn by worker".to_string()),
        );
        application.updated_at = now;

        let application = self.store.update_application(application)?;
        info!(application_id = %application.id, "application withdrawn");

        let severity = if job.time_until_start(now) < Duration::hours(LATE_WITHDRAW_HOURS) {
            Severity::High
        } else {
            Severity::Medium
        };
        let penalty = self.report_incident(IncidentReport {
            user_id: application.worker_id.clone(),
            job_id: job.id,
            kind: IncidentType::WorkerCancelled,
            severity,
        });

        Ok(PenalizedTransition {
            record: application,
            penalty,
        })
    }

    /// Worker check-in on a running job.
    pub fn mark_arrival(
        &self,
        caller: &Caller,
        application_id: &ApplicationId,
    ) -> Result<Application, GigError> {
        let mut application = self.load_application(application_id)?;
        if application.worker_id != caller.user_id {
            return Err(GigError::Authorization(format!(
                "application {application_id} belongs to another worker"
            )));
        }
        let job = self.load_job(&application.job_id)?;
        if job.status != JobStatus::InProgress {
            return Err(GigError::StateConflict(format!(
                "job {} has not started yet",
                job.id
            )));
        }
        if application.status != ApplicationStatus::Accepted {
            return Err(GigError::StateConflict(format!(
                "cannot record arrival for application in state {}",
                application.status
            )));
        }

        let now = self.now();
        application.arrival_status = application.arrival_status.on(ArrivalEvent::Arrive)?;
        application.arrived_at = Some(now);
        application.updated_at = now;

        let application = self.store.update_application(application)?;
        info!(application_id = %application.id, "worker arrived");
        Ok(application)
    }

    /// Employer records that a worker did not show up. Always high severity.
    /// Only `accepted` applications qualify; a prior self-reported arrival does not prevent it.
    pub fn mark_no_show(
        &self,
        caller: &Caller,
        application_id: &ApplicationId,
    ) -> Result<PenalizedTransition<Application>, GigError> {
        let mut application = self.load_application(application_id)?;
        let job = self.owned_job(caller, &application.job_id)?;
        if job.status != JobStatus::InProgress {
            return Err(GigError::StateConflict(format!(
                "job {} has not started yet",
                job.id
            )));
        }

        let now = self.now();
        application.arrival_status = application.arrival_status.on(ArrivalEvent::NoShow)?;
        application.status = application.status.on(ApplicationEvent::NoShow)?;
        application.no_show_at = Some(now);
        application.updated_at = now;

        let application = self.store.update_application(application)?;
        info!(
            application_id = %application.id,
            worker_id = %application.worker_id,
            "worker marked as no-show"
        );

        let penalty = self.report_incident(IncidentReport {
            user_id: application.worker_id.clone(),
            job_id: job.id.clone(),
            kind: IncidentType::WorkerNoShow,
            severity: Severity::High,
        });
        self.dispatch(notification(
            application.worker_id.clone(),
            NotificationKind::WorkerNoShow,
            "Marked as no-show",
            &format!("You were marked as a no-show for \"{}\"", job.title),
            &job.id,
        ));

        Ok(PenalizedTransition {
            record: application,
            penalty,
        })
    }

    pub fn applications_for_job(
        &self,
        caller: &Caller,
        job_id: &JobId,
    ) -> Result<Vec<Application>, GigError> {
        self.owned_job(caller, job_id)?;
        Ok(self.store.applications_for_job(job_id)?)
    }

    /// Newest first.
    pub fn my_applications(&self, caller: &Caller) -> Result<Vec<Application>, GigError> {
        Ok(self.store.applications_for_worker(&caller.user_id)?)
    }

    fn job_application(
        &self,
        job_id: &JobId,
        application_id: &ApplicationId,
    ) -> Result<Application, GigError> {
        self.store
            .fetch_application(application_id)?
            .filter(|application| &application.job_id == job_id)
            .ok_or_else(|| {
                GigError::NotFound(format!(
                    "application {application_id} not found for job {job_id}"
                ))
            })
    }
}
