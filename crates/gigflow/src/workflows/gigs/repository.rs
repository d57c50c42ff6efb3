use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::discipline::{DisciplineRecord, Incident};
use super::domain::{Application, ApplicationId, Job, JobId, OpenJobQuery, Role, UserId};
use super::schedule::Commitment;

/// Job persistence. `update_job` is a versioned write: it fails with
/// [`RepositoryError::VersionConflict`] when the stored version differs from `job.version`.
pub trait JobRepository: Send + Sync {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError>;
    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError>;
    fn update_job(&self, job: Job) -> Result<Job, RepositoryError>;
    fn jobs_for_employer(&self, employer: &UserId) -> Result<Vec<Job>, RepositoryError>;
    /// Matching open jobs ordered by start time.
    fn open_jobs(&self, query: &OpenJobQuery) -> Result<Vec<Job>, RepositoryError>;
    /// Open, confirmed or filled jobs with at least one accepted worker whose start has passed.
    fn jobs_due_to_start(&self, now: DateTime<Utc>) -> Result<Vec<Job>, RepositoryError>;
}

/// Application persistence with a unique (job, worker) constraint.
pub trait ApplicationRepository: Send + Sync {
    fn insert_application(&self, application: Application)
        -> Result<Application, RepositoryError>;
    fn fetch_application(&self, id: &ApplicationId)
        -> Result<Option<Application>, RepositoryError>;
    fn find_application(
        &self,
        job: &JobId,
        worker: &UserId,
    ) -> Result<Option<Application>, RepositoryError>;
    fn update_application(&self, application: Application)
        -> Result<Application, RepositoryError>;
    fn applications_for_job(&self, job: &JobId) -> Result<Vec<Application>, RepositoryError>;
    fn applications_for_worker(&self, worker: &UserId)
        -> Result<Vec<Application>, RepositoryError>;
    /// Accepted applications of `worker` on jobs not cancelled, with the windows of those jobs.
    fn accepted_commitments(&self, worker: &UserId) -> Result<Vec<Commitment>, RepositoryError>;
}

/// User discipline ledgers and the incident log.
pub trait DisciplineRepository: Send + Sync {
    fn fetch_discipline(&self, user: &UserId) -> Result<Option<DisciplineRecord>, RepositoryError>;
    /// Returns the stored record, creating an empty ledger for first-time users.
    fn ensure_user(&self, user: &UserId, role: Role) -> Result<DisciplineRecord, RepositoryError>;
    /// Inserts the incident and replaces the ledger in one step; versioned on the ledger.
    fn record_penalty(
        &self,
        record: DisciplineRecord,
        incident: Incident,
    ) -> Result<(DisciplineRecord, Incident), RepositoryError>;
    fn incidents_for_user(&self, user: &UserId) -> Result<Vec<Incident>, RepositoryError>;
}

/// Everything the lifecycle needs, plus the one cross-record transaction.
pub trait MarketplaceStore: JobRepository + ApplicationRepository + DisciplineRepository {
    /// Writes a job and one of its applications together or not at all.
    ///
    /// Both writes are versioned. When the application becomes accepted the store re-checks,
    /// inside the same transaction, that the worker holds no other accepted job overlapping
    /// this one and fails with [`RepositoryError::ScheduleConflict`] otherwise.
    fn commit_pair(
        &self,
        job: Job,
        application: Application,
    ) -> Result<(Job, Application), RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record version is stale")]
    VersionConflict,
    #[error("overlapping accepted commitment on job {job_id}")]
    ScheduleConflict { job_id: JobId },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification hooks (push, e-mail, in-app). Failures never undo a transition.
pub trait Notifier: Send + Sync {
    fn notify_now(&self, notification: Notification) -> Result<(), DispatchError>;
    fn schedule(
        &self,
        notification: Notification,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    JobApplied,
    JobAccepted,
    #[serde(rename = "job_reminder_24h")]
    JobReminder24h,
    #[serde(rename = "job_reminder_2h")]
    JobReminder2h,
    JobStarted,
    JobCompleted,
    JobCancelled,
    WorkerNoShow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub related_job_id: Option<JobId>,
}

/// Delivery failure reported by a notifier.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}
