use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::discipline::{DisciplineRecord, Incident};
use super::domain::{Application, ApplicationId, Job, JobId, OpenJobQuery, Role, UserId};
use super::lifecycle::{ApplicationStatus, JobStatus};
use super::repository::{
    ApplicationRepository, DisciplineRepository, JobRepository, MarketplaceStore,
    RepositoryError,
};
use super::schedule::{first_conflict, Commitment};

#[derive(Debug, Default)]
struct StoreState {
    jobs: HashMap<JobId, Job>,
    applications: HashMap<ApplicationId, Application>,
    by_pair: HashMap<(JobId, UserId), ApplicationId>,
    users: HashMap<UserId, DisciplineRecord>,
    incidents: Vec<Incident>,
}

impl StoreState {
    /// Accepted applications on jobs that can still happen; a cancelled job frees its window.
    fn commitments(&self, worker: &UserId) -> Vec<Commitment> {
        self.applications
            .values()
            .filter(|application| {
                &application.worker_id == worker
                    && application.status == ApplicationStatus::Accepted
            })
            .filter_map(|application| {
                self.jobs
                    .get(&application.job_id)
                    .filter(|job| job.status != JobStatus::Cancelled)
                    .map(|job| Commitment {
                        application_id: application.id.clone(),
                        job_id: job.id.clone(),
                        window: job.window(),
                    })
            })
            .collect()
    }

    fn check_job_version(&self, job: &Job) -> Result<(), RepositoryError> {
        match self.jobs.get(&job.id) {
            Some(stored) if stored.version == job.version => Ok(()),
            Some(_) => Err(RepositoryError::VersionConflict),
            None => Err(RepositoryError::NotFound),
        }
    }

    fn check_application_version(&self, application: &Application) -> Result<(), RepositoryError> {
        match self.applications.get(&application.id) {
            Some(stored) if stored.version == application.version => Ok(()),
            Some(_) => Err(RepositoryError::VersionConflict),
            None => Err(RepositoryError::NotFound),
        }
    }
}

/// Process-local store; a single mutex makes every method, `commit_pair` included, serializable.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMarketplaceStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryMarketplaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }
}

impl JobRepository for InMemoryMarketplaceStore {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError> {
        let mut state = self.lock()?;
        if state.jobs.contains_key(&job.id) {
            return Err(RepositoryError::Conflict);
        }
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self.lock()?.jobs.get(id).cloned())
    }

    fn update_job(&self, mut job: Job) -> Result<Job, RepositoryError> {
        let mut state = self.lock()?;
        state.check_job_version(&job)?;
        job.version += 1;
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    fn jobs_for_employer(&self, employer: &UserId) -> Result<Vec<Job>, RepositoryError> {
        let state = self.lock()?;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| &job.employer_id == employer)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.start_date_time.cmp(&a.start_date_time));
        Ok(jobs)
    }

    fn open_jobs(&self, query: &OpenJobQuery) -> Result<Vec<Job>, RepositoryError> {
        let state = self.lock()?;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| query.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.start_date_time
                .cmp(&b.start_date_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(jobs)
    }

    fn jobs_due_to_start(&self, now: DateTime<Utc>) -> Result<Vec<Job>, RepositoryError> {
        let state = self.lock()?;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| {
                matches!(
                    job.status,
                    JobStatus::Open | JobStatus::Confirmed | JobStatus::Filled
                ) && job.accepted_workers_count > 0
                    && job.start_date_time <= now
            })
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.start_date_time.cmp(&b.start_date_time));
        Ok(jobs)
    }
}

impl ApplicationRepository for InMemoryMarketplaceStore {
    fn insert_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        let mut state = self.lock()?;
        let pair = (application.job_id.clone(), application.worker_id.clone());
        if state.by_pair.contains_key(&pair) || state.applications.contains_key(&application.id)
        {
            return Err(RepositoryError::Conflict);
        }
        state.by_pair.insert(pair, application.id.clone());
        state
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(application)
    }

    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        Ok(self.lock()?.applications.get(id).cloned())
    }

    fn find_application(
        &self,
        job: &JobId,
        worker: &UserId,
    ) -> Result<Option<Application>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .by_pair
            .get(&(job.clone(), worker.clone()))
            .and_then(|id| state.applications.get(id))
            .cloned())
    }

    fn update_application(
        &self,
        mut application: Application,
    ) -> Result<Application, RepositoryError> {
        let mut state = self.lock()?;
        state.check_application_version(&application)?;
        application.version += 1;
        state
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(application)
    }

    fn applications_for_job(&self, job: &JobId) -> Result<Vec<Application>, RepositoryError> {
        let state = self.lock()?;
        let mut applications: Vec<Application> = state
            .applications
            .values()
            .filter(|application| &application.job_id == job)
            .cloned()
            .collect();
        applications.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(applications)
    }

    fn applications_for_worker(
        &self,
        worker: &UserId,
    ) -> Result<Vec<Application>, RepositoryError> {
        let state = self.lock()?;
        let mut applications: Vec<Application> = state
            .applications
            .values()
            .filter(|application| &application.worker_id == worker)
            .cloned()
            .collect();
        applications.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(applications)
    }

    fn accepted_commitments(&self, worker: &UserId) -> Result<Vec<Commitment>, RepositoryError> {
        Ok(self.lock()?.commitments(worker))
    }
}

impl DisciplineRepository for InMemoryMarketplaceStore {
    fn fetch_discipline(
        &self,
        user: &UserId,
    ) -> Result<Option<DisciplineRecord>, RepositoryError> {
        Ok(self.lock()?.users.get(user).cloned())
    }

    fn ensure_user(&self, user: &UserId, role: Role) -> Result<DisciplineRecord, RepositoryError> {
        let mut state = self.lock()?;
        let record = state
            .users
            .entry(user.clone())
            .or_insert_with(|| DisciplineRecord::new(user.clone(), role));
        Ok(record.clone())
    }

    fn record_penalty(
        &self,
        mut record: DisciplineRecord,
        incident: Incident,
    ) -> Result<(DisciplineRecord, Incident), RepositoryError> {
        let mut state = self.lock()?;
        match state.users.get(&record.user_id) {
            Some(stored) if stored.version == record.version => {}
            Some(_) => return Err(RepositoryError::VersionConflict),
            None => return Err(RepositoryError::NotFound),
        }
        record.version += 1;
        state.users.insert(record.user_id.clone(), record.clone());
        state.incidents.push(incident.clone());
        Ok((record, incident))
    }

    fn incidents_for_user(&self, user: &UserId) -> Result<Vec<Incident>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .incidents
            .iter()
            .filter(|incident| &incident.user_id == user)
            .cloned()
            .collect())
    }
}

impl MarketplaceStore for InMemoryMarketplaceStore {
    fn commit_pair(
        &self,
        mut job: Job,
        mut application: Application,
    ) -> Result<(Job, Application), RepositoryError> {
        let mut state = self.lock()?;
        state.check_job_version(&job)?;
        state.check_application_version(&application)?;

        let becomes_accepted = application.status == ApplicationStatus::Accepted
            && state
                .applications
                .get(&application.id)
                .map(|stored| stored.status != ApplicationStatus::Accepted)
                .unwrap_or(false);
        if becomes_accepted {
            let commitments = state.commitments(&application.worker_id);
            if let Some(conflict) = first_conflict(&job.id, &job.window(), &commitments) {
                return Err(RepositoryError::ScheduleConflict {
                    job_id: conflict.job_id.clone(),
                });
            }
        }

        job.version += 1;
        application.version += 1;
        state.jobs.insert(job.id.clone(), job.clone());
        state
            .applications
            .insert(application.id.clone(), application.clone());
        Ok((job, application))
    }
}
