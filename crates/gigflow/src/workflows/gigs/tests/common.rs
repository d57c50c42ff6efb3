use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::clock::ManualClock;
use crate::workflows::gigs::discipline::{DisciplineRecord, Incident, PenaltyRuleTable};
use crate::workflows::gigs::domain::{
    Application, ApplicationId, Caller, ExperienceLevel, HourlyRate, Job, JobDraft, JobId,
    Location, OpenJobQuery, PaymentCapture, PaymentMethod, Role, UserId,
};
use crate::workflows::gigs::memory::InMemoryMarketplaceStore;
use crate::workflows::gigs::repository::{
    ApplicationRepository, DisciplineRepository, DispatchError, JobRepository, MarketplaceStore,
    Notification, NotificationKind, Notifier, RepositoryError,
};
use crate::workflows::gigs::schedule::Commitment;
use crate::workflows::gigs::service::GigService;

pub(super) type TestService = GigService<InMemoryMarketplaceStore, RecordingNotifier>;

pub(super) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

pub(super) struct Harness {
    pub service: Arc<TestService>,
    pub store: Arc<InMemoryMarketplaceStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

pub(super) fn build_service() -> Harness {
    build_service_with_rules(PenaltyRuleTable::default())
}

pub(super) fn build_service_with_rules(rules: PenaltyRuleTable) -> Harness {
    let store = Arc::new(InMemoryMarketplaceStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(t0()));
    let service = Arc::new(GigService::new(
        store.clone(),
        notifier.clone(),
        Arc::new(rules),
        clock.clone(),
    ));
    Harness {
        service,
        store,
        notifier,
        clock,
    }
}

pub(super) fn draft(start_in_hours: i64, length_hours: i64, workers: u32) -> JobDraft {
    let start = t0() + Duration::hours(start_in_hours);
    JobDraft {
        title: "Warehouse packing".to_string(),
        place: "Nasr City depot".to_string(),
        location: Location {
            city: "Cairo".to_string(),
            address: "12 Makram Ebeid".to_string(),
            lat: Some(30.06),
            lng: Some(31.34),
        },
        start_date_time: start,
        end_date_time: start + Duration::hours(length_hours),
        daily_work_hours: 8.0,
        required_workers: workers,
        price_per_hour: HourlyRate {
            amount: 50.0,
            currency: "EGP".to_string(),
        },
        experience_level: ExperienceLevel::None,
        details: None,
        payment_method: PaymentMethod::Card,
    }
}

pub(super) fn employer<S, N>(service: &GigService<S, N>, id: &str) -> Caller
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    service
        .resolve_caller(&UserId::from(id), Role::Employer)
        .expect("employer resolves")
}

pub(super) fn worker<S, N>(service: &GigService<S, N>, id: &str) -> Caller
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    service
        .resolve_caller(&UserId::from(id), Role::Worker)
        .expect("worker resolves")
}

/// Creates and activates a job so it is open for applications.
pub(super) fn open_job<S, N>(
    service: &GigService<S, N>,
    owner: &Caller,
    draft: JobDraft,
) -> Job
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let job = service.create_job(owner, draft).expect("job drafted");
    service
        .activate_job(
            owner,
            &job.id,
            PaymentCapture {
                escrow_id: format!("esc-{}", job.id),
            },
        )
        .expect("job activated")
}

/// Worker applies and the employer accepts; returns the accepted application.
pub(super) fn staff<S, N>(
    service: &GigService<S, N>,
    owner: &Caller,
    job: &JobId,
    hire: &Caller,
) -> Application
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let application = service.apply(hire, job).expect("application created");
    service
        .accept(owner, job, &application.id)
        .expect("application accepted")
        .application
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("valid json")
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    scheduled: Mutex<Vec<(Notification, DateTime<Utc>)>>,
}

impl RecordingNotifier {
    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn sent_kinds(&self) -> Vec<NotificationKind> {
        self.sent().into_iter().map(|n| n.kind).collect()
    }

    pub(super) fn scheduled(&self) -> Vec<(Notification, DateTime<Utc>)> {
        self.scheduled
            .lock()
            .expect("notifier mutex poisoned")
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_now(&self, notification: Notification) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }

    fn schedule(
        &self,
        notification: Notification,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        self.scheduled
            .lock()
            .expect("notifier mutex poisoned")
            .push((notification, scheduled_at));
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify_now(&self, _notification: Notification) -> Result<(), DispatchError> {
        Err(DispatchError::Transport("push gateway offline".to_string()))
    }

    fn schedule(
        &self,
        _notification: Notification,
        _scheduled_at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        Err(DispatchError::Rejected("queue full".to_string()))
    }
}

/// Delegates to the in-memory store but loses the first `failures` ledger writes to
/// concurrent updates, or every ledger write when `offline` is set.
#[derive(Default)]
pub(super) struct FlakyLedgerStore {
    pub inner: InMemoryMarketplaceStore,
    pub failures: AtomicUsize,
    pub offline: bool,
}

impl FlakyLedgerStore {
    pub(super) fn losing_first(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub(super) fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }
}

impl JobRepository for FlakyLedgerStore {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError> {
        self.inner.insert_job(job)
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        self.inner.fetch_job(id)
    }

    fn update_job(&self, job: Job) -> Result<Job, RepositoryError> {
        self.inner.update_job(job)
    }

    fn jobs_for_employer(&self, employer: &UserId) -> Result<Vec<Job>, RepositoryError> {
        self.inner.jobs_for_employer(employer)
    }

    fn open_jobs(&self, query: &OpenJobQuery) -> Result<Vec<Job>, RepositoryError> {
        self.inner.open_jobs(query)
    }

    fn jobs_due_to_start(&self, now: DateTime<Utc>) -> Result<Vec<Job>, RepositoryError> {
        self.inner.jobs_due_to_start(now)
    }
}

impl ApplicationRepository for FlakyLedgerStore {
    fn insert_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        self.inner.insert_application(application)
    }

    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        self.inner.fetch_application(id)
    }

    fn find_application(
        &self,
        job: &JobId,
        worker: &UserId,
    ) -> Result<Option<Application>, RepositoryError> {
        self.inner.find_application(job, worker)
    }

    fn update_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        self.inner.update_application(application)
    }

    fn applications_for_job(&self, job: &JobId) -> Result<Vec<Application>, RepositoryError> {
        self.inner.applications_for_job(job)
    }

    fn applications_for_worker(
        &self,
        worker: &UserId,
    ) -> Result<Vec<Application>, RepositoryError> {
        self.inner.applications_for_worker(worker)
    }

    fn accepted_commitments(&self, worker: &UserId) -> Result<Vec<Commitment>, RepositoryError> {
        self.inner.accepted_commitments(worker)
    }
}

impl DisciplineRepository for FlakyLedgerStore {
    fn fetch_discipline(
        &self,
        user: &UserId,
    ) -> Result<Option<DisciplineRecord>, RepositoryError> {
        self.inner.fetch_discipline(user)
    }

    fn ensure_user(&self, user: &UserId, role: Role) -> Result<DisciplineRecord, RepositoryError> {
        self.inner.ensure_user(user, role)
    }

    fn record_penalty(
        &self,
        record: DisciplineRecord,
        incident: Incident,
    ) -> Result<(DisciplineRecord, Incident), RepositoryError> {
        if self.offline {
            return Err(RepositoryError::Unavailable("ledger offline".to_string()));
        }
        let lose = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if lose {
            return Err(RepositoryError::VersionConflict);
        }
        self.inner.record_penalty(record, incident)
    }

    fn incidents_for_user(&self, user: &UserId) -> Result<Vec<Incident>, RepositoryError> {
        self.inner.incidents_for_user(user)
    }
}

impl MarketplaceStore for FlakyLedgerStore {
    fn commit_pair(
        &self,
        job: Job,
        application: Application,
    ) -> Result<(Job, Application), RepositoryError> {
        self.inner.commit_pair(job, application)
    }
}
