use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::discipline::DisciplineLedger;
use super::lifecycle::{ApplicationStatus, ArrivalStatus, JobStatus};
use super::schedule::TimeWindow;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identity handed to the core by the external authentication layer.
    UserId
);
string_id!(JobId);
string_id!(ApplicationId);
string_id!(IncidentId);

/// Role attached to a resolved caller identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Worker,
    Employer,
    Admin,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Worker => "worker",
            Role::Employer => "employer",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "worker" => Ok(Role::Worker),
            "employer" => Ok(Role::Employer),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Resolved identity plus the discipline snapshot the core gates on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
    pub discipline: DisciplineLedger,
}

impl Caller {
    pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            discipline: DisciplineLedger::default(),
        }
    }

    pub fn with_discipline(mut self, discipline: DisciplineLedger) -> Self {
        self.discipline = discipline;
        self
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
    pub address: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

fn default_currency() -> String {
    "EGP".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRate {
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    #[default]
    None,
    Junior,
    Mid,
    Senior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Wallet,
}

/// Escrow state of the employer's captured funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Held,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub total_amount: f64,
    pub platform_fee: f64,
    pub escrow_id: Option<String>,
}

/// Two-sided completion protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionConfirmation {
    pub employer_confirmed: bool,
    pub workers_confirmed_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub free_cancel_until: DateTime<Utc>,
    pub penalty_after: DateTime<Utc>,
}

impl CancellationPolicy {
    pub fn for_start(start: DateTime<Utc>) -> Self {
        Self {
            free_cancel_until: start - Duration::hours(24),
            penalty_after: start - Duration::hours(2),
        }
    }
}

/// Employer-owned posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub employer_id: UserId,
    pub title: String,
    pub place: String,
    pub location: Location,
    pub details: Option<String>,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub daily_work_hours: f64,
    pub required_workers: u32,
    pub accepted_workers_count: u32,
    pub price_per_hour: HourlyRate,
    pub experience_level: ExperienceLevel,
    pub status: JobStatus,
    pub cancel_reason: Option<String>,
    pub payment: Payment,
    pub confirmation: CompletionConfirmation,
    pub cancellation_policy: CancellationPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every write.
    pub version: u64,
}

impl Job {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_date_time, self.end_date_time)
    }

    pub fn has_capacity(&self) -> bool {
        self.accepted_workers_count < self.required_workers
    }

    pub fn time_until_start(&self, now: DateTime<Utc>) -> Duration {
        self.start_date_time - now
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.employer_id == user
    }

    pub fn recompute_total(&mut self) {
        self.payment.total_amount = total_amount(
            self.daily_work_hours,
            self.required_workers,
            self.price_per_hour.amount,
        );
    }
}

pub fn total_amount(daily_work_hours: f64, required_workers: u32, hourly_amount: f64) -> f64 {
    daily_work_hours * f64::from(required_workers) * hourly_amount
}

/// One worker's claim on one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub job_id: JobId,
    pub worker_id: UserId,
    pub status: ApplicationStatus,
    pub arrival_status: ArrivalStatus,
    pub employer_accepted: bool,
    pub worker_confirmed_completion: bool,
    pub accepted_by_employer_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub no_show_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Application {
    pub fn pending(
        id: ApplicationId,
        job_id: JobId,
        worker_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_id,
            worker_id,
            status: ApplicationStatus::Pending,
            arrival_status: ArrivalStatus::NotArrived,
            employer_accepted: false,
            worker_confirmed_completion: false,
            accepted_by_employer_at: None,
            cancelled_at: None,
            no_show_at: None,
            arrived_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

/// Employer input for a new posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDraft {
    pub title: String,
    pub place: String,
    pub location: Location,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub daily_work_hours: f64,
    pub required_workers: u32,
    pub price_per_hour: HourlyRate,
    #[serde(default)]
    pub experience_level: ExperienceLevel,
    #[serde(default)]
    pub details: Option<String>,
    pub payment_method: PaymentMethod,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobChanges {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub place: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub start_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub daily_work_hours: Option<f64>,
    #[serde(default)]
    pub required_workers: Option<u32>,
    #[serde(default)]
    pub price_per_hour: Option<HourlyRate>,
    #[serde(default)]
    pub experience_level: Option<ExperienceLevel>,
    #[serde(default)]
    pub details: Option<String>,
}

impl JobChanges {
    pub fn touches_pricing(&self) -> bool {
        self.daily_work_hours.is_some()
            || self.required_workers.is_some()
            || self.price_per_hour.is_some()
    }
}

/// External payment confirmation that funds are held in escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCapture {
    pub escrow_id: String,
}

/// Listing filter for workers browsing open jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenJobQuery {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub experience_level: Option<ExperienceLevel>,
}

impl OpenJobQuery {
    pub fn matches(&self, job: &Job) -> bool {
        if job.status != JobStatus::Open {
            return false;
        }
        if let Some(city) = &self.city {
            if &job.location.city != city {
                return false;
            }
        }
        if let Some(level) = self.experience_level {
            if job.experience_level != level {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if job.start_date_time < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if job.start_date_time > to {
                return false;
            }
        }
        true
    }
}
