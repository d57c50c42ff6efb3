use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::super::domain::Role;

/// Longest block a rule may impose.
pub const MAX_BLOCK_DAYS: u32 = 3650;

/// Escalation step a rule resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PenaltyAction {
    Warning,
    Block { days: u32 },
}

impl PenaltyAction {
    /// Label stamped on the incident once the action is applied.
    pub fn applied_label(self) -> String {
        match self {
            PenaltyAction::Warning => "warning".to_string(),
            PenaltyAction::Block { days } => format!("blocked {days} days"),
        }
    }
}

impl fmt::Display for PenaltyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PenaltyAction::Warning => f.write_str("warning"),
            PenaltyAction::Block { days } => write!(f, "block_{days}_days"),
        }
    }
}

impl From<PenaltyAction> for String {
    fn from(value: PenaltyAction) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for PenaltyAction {
    type Error = RuleTableError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let raw = value.trim();
        if raw == "warning" {
            return Ok(PenaltyAction::Warning);
        }

        raw.strip_prefix("block_")
            .and_then(|rest| rest.strip_suffix("_days"))
            .and_then(|days| days.parse::<u32>().ok())
            .filter(|days| (1..=MAX_BLOCK_DAYS).contains(days))
            .map(|days| PenaltyAction::Block { days })
            .ok_or_else(|| RuleTableError::UnknownAction(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyRule {
    pub threshold: u32,
    pub action: PenaltyAction,
}

/// Which counter of the ledger an incident feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentCategory {
    Cancel,
    NoShow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRules {
    #[serde(default)]
    pub cancel: Vec<PenaltyRule>,
    #[serde(default)]
    pub no_show: Vec<PenaltyRule>,
}

impl RoleRules {
    fn ladder(&self, category: IncidentCategory) -> &[PenaltyRule] {
        match category {
            IncidentCategory::Cancel => &self.cancel,
            IncidentCategory::NoShow => &self.no_show,
        }
    }

    fn normalize(&mut self, role: &'static str) -> Result<(), RuleTableError> {
        normalize_ladder(&mut self.cancel, role, "cancel")?;
        normalize_ladder(&mut self.no_show, role, "no_show")
    }
}

fn normalize_ladder(
    rules: &mut [PenaltyRule],
    role: &'static str,
    category: &'static str,
) -> Result<(), RuleTableError> {
    rules.sort_by_key(|rule| rule.threshold);
    let mut previous = 0;
    for rule in rules.iter() {
        if rule.threshold == 0 || rule.threshold == previous {
            return Err(RuleTableError::InvalidThreshold {
                role,
                category,
                threshold: rule.threshold,
            });
        }
        previous = rule.threshold;
    }
    Ok(())
}

/// Immutable escalation ladders per role and incident category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyRuleTable {
    #[serde(default)]
    pub worker: RoleRules,
    #[serde(default)]
    pub employer: RoleRules,
}

impl Default for PenaltyRuleTable {
    fn default() -> Self {
        let rule = |threshold, action| PenaltyRule { threshold, action };
        Self {
            worker: RoleRules {
                cancel: vec![
                    rule(1, PenaltyAction::Warning),
                    rule(3, PenaltyAction::Block { days: 3 }),
                    rule(5, PenaltyAction::Block { days: 14 }),
                ],
                no_show: vec![
                    rule(1, PenaltyAction::Block { days: 7 }),
                    rule(3, PenaltyAction::Block { days: 30 }),
                ],
            },
            employer: RoleRules {
                cancel: vec![
                    rule(1, PenaltyAction::Warning),
                    rule(3, PenaltyAction::Block { days: 3 }),
                    rule(5, PenaltyAction::Block { days: 14 }),
                ],
                no_show: Vec::new(),
            },
        }
    }
}

impl PenaltyRuleTable {
    pub fn from_json(raw: &str) -> Result<Self, RuleTableError> {
        let table: PenaltyRuleTable = serde_json::from_str(raw)?;
        table.validated()
    }

    pub fn from_path(path: &Path) -> Result<Self, RuleTableError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RuleTableError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Loads from `path` when given, otherwise returns the built-in table.
    pub fn load(path: Option<&Path>) -> Result<Self, RuleTableError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    /// Sorts every ladder by threshold and rejects zero or repeated thresholds.
    pub fn validated(mut self) -> Result<Self, RuleTableError> {
        self.worker.normalize("worker")?;
        self.employer.normalize("employer")?;
        Ok(self)
    }

    pub fn ladder(&self, role: Role, category: IncidentCategory) -> &[PenaltyRule] {
        match role {
            Role::Worker => self.worker.ladder(category),
            Role::Employer => self.employer.ladder(category),
            Role::Admin => &[],
        }
    }
}

/// Highest-threshold rule whose threshold is at most `counter`; `None` when nothing matches.
pub fn resolve_action(
    table: &PenaltyRuleTable,
    role: Role,
    category: IncidentCategory,
    counter: u32,
) -> Option<PenaltyAction> {
    table
        .ladder(role, category)
        .iter()
        .filter(|rule| rule.threshold <= counter)
        .last()
        .map(|rule| rule.action)
}

#[derive(Debug, thiserror::Error)]
pub enum RuleTableError {
    #[error("unknown penalty action '{0}' (expected 'warning' or 'block_<days>_days')")]
    UnknownAction(String),
    #[error("{role}.{category} has invalid or duplicate threshold {threshold}")]
    InvalidThreshold {
        role: &'static str,
        category: &'static str,
        threshold: u32,
    },
    #[error("malformed penalty rule table: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unable to read penalty rules from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
