use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::{Role, UserId};
use super::super::error::GigError;
use super::rules::{IncidentCategory, PenaltyAction};

/// Per-user running counters and the current temporary block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisciplineLedger {
    pub warnings: u32,
    pub cancellations: u32,
    pub no_shows: u32,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl DisciplineLedger {
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.map(|until| until > now).unwrap_or(false)
    }

    /// Bumps the counter for `category` and returns its new value.
    pub(crate) fn record(&mut self, category: IncidentCategory) -> u32 {
        let counter = match category {
            IncidentCategory::Cancel => &mut self.cancellations,
            IncidentCategory::NoShow => &mut self.no_shows,
        };
        *counter += 1;
        *counter
    }

    /// Applies a resolved action and returns the label to stamp on the incident.
    /// A block replaces whatever block was in place.
    pub(crate) fn apply(
        &mut self,
        action: Option<PenaltyAction>,
        now: DateTime<Utc>,
    ) -> Result<String, GigError> {
        match action {
            None => Ok("none".to_string()),
            Some(PenaltyAction::Warning) => {
                self.warnings += 1;
                Ok(PenaltyAction::Warning.applied_label())
            }
            Some(action @ PenaltyAction::Block { days }) => {
                let until = Duration::try_days(i64::from(days))
                    .and_then(|span| now.checked_add_signed(span))
                    .ok_or_else(|| {
                        GigError::Validation(format!(
                            "a {days} day block from {now} is out of range"
                        ))
                    })?;
                self.blocked_until = Some(until);
                Ok(action.applied_label())
            }
        }
    }
}

/// Stored ledger for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisciplineRecord {
    pub user_id: UserId,
    pub role: Role,
    pub ledger: DisciplineLedger,
    pub version: u64,
}

impl DisciplineRecord {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            ledger: DisciplineLedger::default(),
            version: 0,
        }
    }
}
