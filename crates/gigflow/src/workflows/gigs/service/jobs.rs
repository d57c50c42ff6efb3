use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::super::discipline::{IncidentReport, IncidentType, Severity};
use super::super::domain::{
    total_amount, Application, CancellationPolicy, Caller, CompletionConfirmation, Job, JobChanges,
    JobDraft, JobId, OpenJobQuery, Payment, PaymentCapture, PaymentStatus, Role,
};
use super::super::error::GigError;
use super::super::lifecycle::{ApplicationStatus, ArrivalStatus, JobEvent, JobStatus};
use super::super::repository::{MarketplaceStore, NotificationKind, Notifier};
use super::{
    next_job_id, require_role, require_unblocked, GigService, JobDetails,
    PenalizedTransition,
};

/// One row of the caller's own job list.
#[derive(Debug, Clone, Serialize)]
pub struct MyJob {
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_status: Option<ApplicationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival_status: Option<ArrivalStatus>,
}

const UPDATE_CUTOFF_HOURS: i64 = 24;
const LATE_CANCEL_HOURS: i64 = 24;

fn validate_job(job: &Job, now: DateTime<Utc>) -> Result<(), GigError> {
    let required = [
        ("title", job.title.as_str()),
        ("place", job.place.as_str()),
        ("location.city", job.location.city.as_str()),
        ("location.address", job.location.address.as_str()),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(GigError::Validation(format!("missing required job field: {field}")));
    }
    if job.start_date_time <= now {
        return Err(GigError::Validation(
            "start time must be in the future".to_string(),
        ));
    }
    if job.end_date_time <= job.start_date_time {
        return Err(GigError::Validation(
            "end time must be after start time".to_string(),
        ));
    }
    let hours = job.daily_work_hours;
    if !hours.is_finite() || hours <= 0.0 || hours > 24.0 {
        return Err(GigError::Validation(format!(
            "daily work hours must be within (0, 24], got {hours}"
        )));
    }
    if job.required_workers == 0 {
        return Err(GigError::Validation(
            "at least one worker is required".to_string(),
        ));
    }
    let rate = job.price_per_hour.amount;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(GigError::Validation(format!(
            "hourly rate must be a positive amount, got {rate}"
        )));
    }
    Ok(())
}

fn apply_changes(job: &mut Job, changes: JobChanges) {
    let reprice = changes.touches_pricing();
    let JobChanges {
        title,
        place,
        location,
        start_date_time,
        end_date_time,
        daily_work_hours,
        required_workers,
        price_per_hour,
        experience_level,
        details,
    } = changes;

    if let Some(title) = title {
        job.title = title;
    }
    if let Some(place) = place {
        job.place = place;
    }
    if let Some(location) = location {
        job.location = location;
    }
    if let Some(start) = start_date_time {
        job.start_date_time = start;
        job.cancellation_policy = CancellationPolicy::for_start(start);
    }
    if let Some(end) = end_date_time {
        job.end_date_time = end;
    }
    if let Some(hours) = daily_work_hours {
        job.daily_work_hours = hours;
    }
    if let Some(workers) = required_workers {
        job.required_workers = workers;
    }
    if let Some(rate) = price_per_hour {
        job.price_per_hour = rate;
    }
    if let Some(level) = experience_level {
        job.experience_level = level;
    }
    if details.is_some() {
        job.details = details;
    }
    if reprice {
        job.recompute_total();
    }
}

/// Completes the job once both sides of the confirmation protocol are satisfied.
fn complete_if_confirmed(job: &mut Job) -> Result<(), GigError> {
    let CompletionConfirmation {
        employer_confirmed,
        workers_confirmed_count,
    } = job.confirmation;
    if employer_confirmed && workers_confirmed_count >= job.required_workers {
        job.status = job.status.on(JobEvent::Complete)?;
        job.payment.status = PaymentStatus::Paid;
    }
    Ok(())
}

impl<S, N> GigService<S, N>
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    /// Creates a draft posting with its total and cancellation policy computed.
    pub fn create_job(&self, caller: &Caller, draft: JobDraft) -> Result<Job, GigError> {
        require_role(caller, Role::Employer, "create jobs")?;
        let now = self.now();
        require_unblocked(caller, now)?;

        let JobDraft {
            title,
            place,
            location,
            start_date_time,
            end_date_time,
            daily_work_hours,
            required_workers,
            price_per_hour,
            experience_level,
            details,
            payment_method,
        } = draft;

        let job = Job {
            id: next_job_id(),
            employer_id: caller.user_id.clone(),
            title,
            place,
            location,
            details,
            start_date_time,
            end_date_time,
            daily_work_hours,
            required_workers,
            accepted_workers_count: 0,
            payment: Payment {
                method: payment_method,
                status: PaymentStatus::Pending,
                total_amount: total_amount(
                    daily_work_hours,
                    required_workers,
                    price_per_hour.amount,
                ),
                platform_fee: 0.0,
                escrow_id: None,
            },
            price_per_hour,
            experience_level,
            status: JobStatus::Draft,
            cancel_reason: None,
            confirmation: CompletionConfirmation::default(),
            cancellation_policy: CancellationPolicy::for_start(start_date_time),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        validate_job(&job, now)?;

        let job = self.store.insert_job(job)?;
        info!(
            job_id = %job.id,
            employer_id = %job.employer_id,
            total = job.payment.total_amount,
            "job drafted"
        );
        Ok(job)
    }

    /// Opens a draft once the payment collaborator reports funds held in escrow.
    pub fn activate_job(
        &self,
        caller: &Caller,
        job_id: &JobId,
        capture: PaymentCapture,
    ) -> Result<Job, GigError> {
        let mut job = self.owned_job(caller, job_id)?;
        if capture.escrow_id.trim().is_empty() {
            return Err(GigError::Validation("escrow reference is required".to_string()));
        }
        if job.payment.status != PaymentStatus::Pending {
            return Err(GigError::StateConflict(format!(
                "payment for job {job_id} is not pending"
            )));
        }

        job.status = job.status.on(JobEvent::Activate)?;
        job.payment.status = PaymentStatus::Held;
        job.payment.escrow_id = Some(capture.escrow_id);
        job.updated_at = self.now();

        let job = self.store.update_job(job)?;
        info!(job_id = %job.id, "job opened for applications");
        Ok(job)
    }

    pub fn update_job(
        &self,
        caller: &Caller,
        job_id: &JobId,
        changes: JobChanges,
    ) -> Result<Job, GigError> {
        let mut job = self.owned_job(caller, job_id)?;
        let now = self.now();

        if !job.status.accepts_edits() {
            return Err(GigError::StateConflict(format!(
                "job cannot be updated in state {}",
                job.status
            )));
        }
        if job.accepted_workers_count > 0 {
            return Err(GigError::StateConflict(
                "job cannot be updated after accepting workers".to_string(),
            ));
        }
        if job.time_until_start(now) < Duration::hours(UPDATE_CUTOFF_HOURS) {
            return Err(GigError::StateConflict(format!(
                "job cannot be updated less than {UPDATE_CUTOFF_HOURS} hours before start"
            )));
        }

        apply_changes(&mut job, changes);
        validate_job(&job, now)?;
        job.updated_at = now;

        Ok(self.store.update_job(job)?)
    }

    /// Employer cancellation: refunds held escrow and reports an `employer_cancelled` incident.
    pub fn cancel_job(
        &self,
        caller: &Caller,
        job_id: &JobId,
        reason: Option<String>,
    ) -> Result<PenalizedTransition<Job>, GigError> {
        let mut job = self.owned_job(caller, job_id)?;
        let now = self.now();

        job.status = job.status.on(JobEvent::Cancel)?;
        job.cancel_reason = Some(
            reason
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| "Cancelled by employer".to_string()),
        );
        if job.payment.status == PaymentStatus::Held {
            job.payment.status = PaymentStatus::Refunded;
        }
        job.updated_at = now;

        let severity = if job.time_until_start(now) < Duration::hours(LATE_CANCEL_HOURS) {
            Severity::High
        } else {
            Severity::Medium
        };

        let job = self.store.update_job(job)?;
        info!(job_id = %job.id, ?severity, "job cancelled by employer");

        let penalty = self.report_incident(IncidentReport {
            user_id: job.employer_id.clone(),
            job_id: job.id.clone(),
            kind: IncidentType::EmployerCancelled,
            severity,
        });
        self.notify_workers(
            &job,
            NotificationKind::JobCancelled,
            "Job cancelled",
            &format!("\"{}\" was cancelled by the employer", job.title),
        );

        Ok(PenalizedTransition {
            record: job,
            penalty,
        })
    }

    /// Moves a staffed job to `in_progress` once its start time has passed.
    pub fn start_job(&self, caller: &Caller, job_id: &JobId) -> Result<Job, GigError> {
        let job = self.owned_job(caller, job_id)?;
        let now = self.now();
        if now < job.start_date_time {
            return Err(GigError::StateConflict(format!(
                "job {job_id} has not reached its start time"
            )));
        }
        self.begin(job, now)
    }

    /// Starts every staffed job whose start time has passed; failures are logged and skipped.
    pub fn start_due_jobs(&self) -> Result<Vec<Job>, GigError> {
        let now = self.now();
        let due = self.store.jobs_due_to_start(now)?;
        let mut started = Vec::with_capacity(due.len());
        for job in due {
            let job_id = job.id.clone();
            match self.begin(job, now) {
                Ok(job) => started.push(job),
                Err(err) => warn!(%job_id, error = %err, "could not start due job"),
            }
        }
        Ok(started)
    }

    fn begin(&self, mut job: Job, now: DateTime<Utc>) -> Result<Job, GigError> {
        if job.accepted_workers_count == 0 {
            return Err(GigError::StateConflict(format!(
                "job {} has no accepted workers",
                job.id
            )));
        }
        job.status = job.status.on(JobEvent::Start)?;
        job.updated_at = now;

        let job = self.store.update_job(job)?;
        info!(job_id = %job.id, "job started");
        self.notify_workers(
            &job,
            NotificationKind::JobStarted,
            "Job started",
            &format!("\"{}\" has started, please check in on arrival", job.title),
        );
        Ok(job)
    }

    /// Employer or an accepted worker flags a staffed job as disputed.
    pub fn dispute_job(&self, caller: &Caller, job_id: &JobId) -> Result<Job, GigError> {
        let mut job = self.load_job(job_id)?;
        if !job.is_owned_by(&caller.user_id) && !self.holds_accepted(caller, job_id)? {
            return Err(GigError::Authorization(format!(
                "only the employer or an accepted worker can dispute job {job_id}"
            )));
        }
        job.status = job.status.on(JobEvent::Dispute)?;
        job.updated_at = self.now();

        let job = self.store.update_job(job)?;
        warn!(job_id = %job.id, raised_by = %caller.user_id, "job disputed");
        Ok(job)
    }

    fn holds_accepted(&self, caller: &Caller, job_id: &JobId) -> Result<bool, GigError> {
        Ok(self
            .store
            .find_application(job_id, &caller.user_id)?
            .map(|application| application.status == ApplicationStatus::Accepted)
            .unwrap_or(false))
    }

    /// One side's completion confirmation. The job completes and pays out when the employer
    /// has confirmed and enough workers have confirmed.
    pub fn confirm_completion(&self, caller: &Caller, job_id: &JobId) -> Result<Job, GigError> {
        let mut job = self.load_job(job_id)?;
        let now = self.now();

        if now < job.end_date_time {
            return Err(GigError::StateConflict(format!("job {job_id} has not ended yet")));
        }
        if !job.status.awaits_completion() {
            return Err(GigError::StateConflict(format!(
                "cannot confirm completion of job in state {}",
                job.status
            )));
        }

        let job = if job.is_owned_by(&caller.user_id) {
            if job.confirmation.employer_confirmed {
                return Err(GigError::StateConflict(
                    "employer already confirmed completion".to_string(),
                ));
            }
            job.confirmation.employer_confirmed = true;
            complete_if_confirmed(&mut job)?;
            job.updated_at = now;
            self.store.update_job(job)?
        } else {
            let mut application = self
                .store
                .find_application(job_id, &caller.user_id)?
                .filter(|application| application.status == ApplicationStatus::Accepted)
                .ok_or_else(|| {
                    GigError::Authorization(format!(
                        "only the employer or an accepted worker can confirm job {job_id}"
                    ))
                })?;
            if application.worker_confirmed_completion {
                return Err(GigError::StateConflict(
                    "worker already confirmed completion".to_string(),
                ));
            }
            application.worker_confirmed_completion = true;
            application.updated_at = now;
            job.confirmation.workers_confirmed_count += 1;
            complete_if_confirmed(&mut job)?;
            job.updated_at = now;
            let (job, _) = self.store.commit_pair(job, application)?;
            job
        };

        info!(
            job_id = %job.id,
            confirmed_by = %caller.user_id,
            employer_confirmed = job.confirmation.employer_confirmed,
            workers_confirmed = job.confirmation.workers_confirmed_count,
            status = %job.status,
            "completion confirmed"
        );
        if job.status == JobStatus::Completed {
            self.notify_workers(
                &job,
                NotificationKind::JobCompleted,
                "Job completed",
                &format!("\"{}\" is complete and payment has been released", job.title),
            );
        }
        Ok(job)
    }

    pub fn open_jobs(&self, query: &OpenJobQuery) -> Result<Vec<Job>, GigError> {
        Ok(self.store.open_jobs(query)?)
    }

    /// The owning employer sees every application; a worker sees only their own.
    pub fn job_details(&self, caller: &Caller, job_id: &JobId) -> Result<JobDetails, GigError> {
        let job = self.load_job(job_id)?;
        let applications = match caller.role {
            Role::Employer if job.is_owned_by(&caller.user_id) => {
                Some(self.store.applications_for_job(job_id)?)
            }
            _ => None,
        };
        let my_application = match caller.role {
            Role::Worker => self.store.find_application(job_id, &caller.user_id)?,
            _ => None,
        };
        Ok(JobDetails {
            job,
            applications,
            my_application,
        })
    }

    /// Employers get their postings newest first; workers get every job they applied to.
    pub fn my_jobs(&self, caller: &Caller) -> Result<Vec<MyJob>, GigError> {
        match caller.role {
            Role::Employer => Ok(self
                .store
                .jobs_for_employer(&caller.user_id)?
                .into_iter()
                .map(|job| MyJob {
                    job,
                    application_status: None,
                    arrival_status: None,
                })
                .collect()),
            Role::Worker => {
                let applications = self.store.applications_for_worker(&caller.user_id)?;
                let mut jobs = Vec::with_capacity(applications.len());
                for Application {
                    job_id,
                    status,
                    arrival_status,
                    ..
                } in applications
                {
                    if let Some(job) = self.store.fetch_job(&job_id)? {
                        jobs.push(MyJob {
                            job,
                            application_status: Some(status),
                            arrival_status: Some(arrival_status),
                        });
                    }
                }
                Ok(jobs)
            }
            Role::Admin => Ok(Vec::new()),
        }
    }
}
