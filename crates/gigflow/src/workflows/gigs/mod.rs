//! Gig job and application lifecycle with the escalating discipline engine.
//!
//! Employers post jobs, workers apply, and every status change runs through the transition
//! tables in [`lifecycle`]. Broken commitments (withdrawals, cancellations, no-shows) are
//! reported to the [`discipline::PenaltyEngine`], which updates the caller's ledger.

pub mod discipline;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod repository;
pub mod router;
pub mod schedule;
pub mod service;

#[cfg(test)]
mod tests;

pub use discipline::{
    DisciplineLedger, DisciplineRecord, Incident, IncidentReport, IncidentType, PenaltyAction,
    PenaltyEngine, PenaltyOutcome, PenaltyRuleTable, RuleTableError, Severity,
};
pub use domain::{
    Application, ApplicationId, Caller, ExperienceLevel, HourlyRate, Job, JobChanges, JobDraft,
    JobId, Location, OpenJobQuery, PaymentCapture, PaymentMethod, PaymentStatus, Role, UserId,
};
pub use error::GigError;
pub use lifecycle::{ApplicationStatus, ArrivalStatus, JobStatus};
pub use memory::InMemoryMarketplaceStore;
pub use repository::{
    ApplicationRepository, DisciplineRepository, DispatchError, JobRepository, MarketplaceStore,
    Notification, NotificationKind, Notifier, RepositoryError,
};
pub use router::gig_router;
pub use service::{
    accept_application, Acceptance, DisciplineView, GigService, JobDetails, MyJob,
    PenalizedTransition,
};
