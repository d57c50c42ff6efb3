use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use super::super::domain::{Application, ApplicationId, Caller, Job, JobId, Role};
use super::super::error::GigError;
use super::super::lifecycle::{ApplicationEvent, JobEvent, JobStatus};
use super::super::repository::{MarketplaceStore, NotificationKind, Notifier};
use super::super::schedule::first_conflict;
use super::{notification, require_role, GigService};

/// Job and application as committed by one acceptance.
#[derive(Debug, Clone, Serialize)]
pub struct Acceptance {
    pub job: Job,
    pub application: Application,
}

/// Accepts a pending application and takes one job slot in a single store transaction.
///
/// The capacity increment, the optional `open -> filled` step and the application flip are
/// committed through [`MarketplaceStore::commit_pair`], so two employers racing for the last
/// slot cannot both win: the loser sees either a stale version (retryable) or a full job.
pub fn accept_application<S>(
    store: &S,
    caller: &Caller,
    job_id: &JobId,
    application_id: &ApplicationId,
    now: DateTime<Utc>,
) -> Result<Acceptance, GigError>
where
    S: MarketplaceStore + ?Sized,
{
    require_role(caller, Role::Employer, "accept applications")?;

    let mut job = store
        .fetch_job(job_id)?
        .ok_or_else(|| GigError::NotFound(format!("job {job_id} not found")))?;
    if !job.is_owned_by(&caller.user_id) {
        return Err(GigError::Authorization(format!(
            "job {job_id} belongs to another employer"
        )));
    }

    let mut application = store
        .fetch_application(application_id)?
        .filter(|application| &application.job_id == job_id)
        .ok_or_else(|| {
            GigError::NotFound(format!(
                "application {application_id} not found for job {job_id}"
            ))
        })?;

    if !job.has_capacity() {
        return Err(GigError::StateConflict(format!("job {job_id} already filled")));
    }
    if !matches!(job.status, JobStatus::Open | JobStatus::Confirmed) {
        return Err(GigError::StateConflict(format!(
            "job {job_id} is not accepting workers in state {}",
            job.status
        )));
    }

    application.status = application.status.on(ApplicationEvent::Accept)?;

    let commitments = store.accepted_commitments(&application.worker_id)?;
    if let Some(conflict) = first_conflict(&job.id, &job.window(), &commitments) {
        return Err(GigError::StateConflict(format!(
            "worker already holds an accepted job at this time ({})",
            conflict.job_id
        )));
    }

    application.employer_accepted = true;
    application.accepted_by_employer_at = Some(now);
    application.updated_at = now;

    job.accepted_workers_count += 1;
    if job.accepted_workers_count == job.required_workers {
        job.status = job.status.on(JobEvent::Fill)?;
    }
    job.updated_at = now;

    let (job, application) = store.commit_pair(job, application)?;
    info!(
        job_id = %job.id,
        application_id = %application.id,
        worker_id = %application.worker_id,
        accepted = job.accepted_workers_count,
        required = job.required_workers,
        status = %job.status,
        "application accepted"
    );
    Ok(Acceptance { job, application })
}

impl<S, N> GigService<S, N>
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    /// Accepts the application, then tells the worker and queues the start reminders.
    pub fn accept(
        &self,
        caller: &Caller,
        job_id: &JobId,
        application_id: &ApplicationId,
    ) -> Result<Acceptance, GigError> {
        let now = self.now();
        let acceptance =
            accept_application(self.store.as_ref(), caller, job_id, application_id, now)?;

        let job = &acceptance.job;
        let worker = &acceptance.application.worker_id;
        self.dispatch(notification(
            worker.clone(),
            NotificationKind::JobAccepted,
            "Application accepted",
            &format!("You were accepted for \"{}\"", job.title),
            &job.id,
        ));

        let reminders = [
            (
                NotificationKind::JobReminder24h,
                Duration::hours(24),
                "starts in 24 hours",
            ),
            (
                NotificationKind::JobReminder2h,
                Duration::hours(2),
                "starts in 2 hours",
            ),
        ];
        for (kind, lead, phrase) in reminders {
            let scheduled_at = job.start_date_time - lead;
            if scheduled_at > now {
                self.dispatch_at(
                    notification(
                        worker.clone(),
                        kind,
                        "Upcoming job",
                        &format!("\"{}\" {phrase}", job.title),
                        &job.id,
                    ),
                    scheduled_at,
                );
            }
        }

        Ok(acceptance)
    }
}
