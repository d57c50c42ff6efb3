//! Explicit transition tables for jobs and applications.
//!
//! Every status change in the service goes through `on`, so a transition missing from the
//! table below cannot happen anywhere else.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rejected (from-state, event) pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {event} {subject} in state {from}")]
pub struct TransitionRejected {
    pub subject: &'static str,
    pub from: &'static str,
    pub event: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Draft,
    Open,
    Confirmed,
    Filled,
    InProgress,
    Completed,
    Cancelled,
    Disputed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// Payment captured into escrow.
    Activate,
    /// Last open slot accepted.
    Fill,
    Start,
    Complete,
    Cancel,
    Dispute,
}

impl JobEvent {
    pub const fn label(self) -> &'static str {
        match self {
            JobEvent::Activate => "activate",
            JobEvent::Fill => "fill",
            JobEvent::Start => "start",
            JobEvent::Complete => "complete",
            JobEvent::Cancel => "cancel",
            JobEvent::Dispute => "dispute",
        }
    }
}

impl JobStatus {
    pub fn on(self, event: JobEvent) -> Result<JobStatus, TransitionRejected> {
        use JobStatus::*;

        let next = match (self, event) {
            (Draft, JobEvent::Activate) => Open,
            (Open | Confirmed, JobEvent::Fill) => Filled,
            (Open | Confirmed | Filled, JobEvent::Start) => InProgress,
            (Filled | Confirmed | InProgress, JobEvent::Complete) => Completed,
            (Filled | Confirmed | InProgress, JobEvent::Dispute) => Disputed,
            (from, JobEvent::Cancel) if !matches!(from, Completed | Cancelled) => Cancelled,
            (from, event) => {
                return Err(TransitionRejected {
                    subject: "job",
                    from: from.label(),
                    event: event.label(),
                })
            }
        };
        Ok(next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Statuses in which the employer may still edit the posting.
    pub fn accepts_edits(self) -> bool {
        !matches!(
            self,
            JobStatus::InProgress | JobStatus::Completed | JobStatus::Cancelled
        )
    }

    /// Statuses in which completion may be confirmed by either side.
    pub fn awaits_completion(self) -> bool {
        matches!(
            self,
            JobStatus::Filled | JobStatus::Confirmed | JobStatus::InProgress
        )
    }

    pub const fn label(self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::Open => "open",
            JobStatus::Confirmed => "confirmed",
            JobStatus::Filled => "filled",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Disputed => "disputed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationEvent {
    Accept,
    Reject,
    Withdraw,
    NoShow,
}

impl ApplicationEvent {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationEvent::Accept => "accept",
            ApplicationEvent::Reject => "reject",
            ApplicationEvent::Withdraw => "withdraw",
            ApplicationEvent::NoShow => "mark as no-show",
        }
    }
}

impl ApplicationStatus {
    pub fn on(self, event: ApplicationEvent) -> Result<ApplicationStatus, TransitionRejected> {
        use ApplicationStatus::*;

        let next = match (self, event) {
            (Pending, ApplicationEvent::Accept) => Accepted,
            (Pending, ApplicationEvent::Reject) => Rejected,
            (Pending, ApplicationEvent::Withdraw) => Cancelled,
            (Accepted, ApplicationEvent::NoShow) => Cancelled,
            (from, event) => {
                return Err(TransitionRejected {
                    subject: "application",
                    from: from.label(),
                    event: event.label(),
                })
            }
        };
        Ok(next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ApplicationStatus::Rejected | ApplicationStatus::Cancelled)
    }

    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Physical check-in state, independent of the application status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalStatus {
    NotArrived,
    Arrived,
    NoShow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalEvent {
    Arrive,
    NoShow,
}

impl ArrivalStatus {
    pub fn on(self, event: ArrivalEvent) -> Result<ArrivalStatus, TransitionRejected> {
        match (self, event) {
            (ArrivalStatus::NotArrived, ArrivalEvent::Arrive) => Ok(ArrivalStatus::Arrived),
            (ArrivalStatus::NotArrived | ArrivalStatus::Arrived, ArrivalEvent::NoShow) => {
                Ok(ArrivalStatus::NoShow)
            }
            (from, event) => Err(TransitionRejected {
                subject: "arrival",
                from: from.label(),
                event: match event {
                    ArrivalEvent::Arrive => "record arrival for",
                    ArrivalEvent::NoShow => "record a no-show for",
                },
            }),
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ArrivalStatus::NotArrived => "not_arrived",
            ArrivalStatus::Arrived => "arrived",
            ArrivalStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for ArrivalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
