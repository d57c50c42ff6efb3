use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ApplicationId, JobId};

/// Half-open `[start, end)` interval a job occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// An accepted application together with the window of the job it commits the worker to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub application_id: ApplicationId,
    pub job_id: JobId,
    pub window: TimeWindow,
}

/// First commitment whose window intersects `candidate`, ignoring the candidate job itself.
pub fn first_conflict<'a>(
    candidate_job: &JobId,
    candidate: &TimeWindow,
    commitments: &'a [Commitment],
) -> Option<&'a Commitment> {
    commitments
        .iter()
        .filter(|commitment| &commitment.job_id != candidate_job)
        .find(|commitment| commitment.window.overlaps(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, hour, 0, 0).unwrap()
    }

    fn commitment(job: &str, start: u32, end: u32) -> Commitment {
        Commitment {
            application_id: ApplicationId(format!("app-{job}")),
            job_id: JobId(job.to_string()),
            window: TimeWindow::new(at(start), at(end)),
        }
    }

    #[test]
    fn touching_windows_do_not_conflict() {
        let morning = TimeWindow::new(at(8), at(12));
        let afternoon = TimeWindow::new(at(12), at(16));
        assert!(!morning.overlaps(&afternoon));
        assert!(!afternoon.overlaps(&morning));
    }

    #[test]
    fn partial_and_nested_windows_conflict() {
        let shift = TimeWindow::new(at(8), at(16));
        assert!(shift.overlaps(&TimeWindow::new(at(15), at(18))));
        assert!(shift.overlaps(&TimeWindow::new(at(6), at(9))));
        assert!(shift.overlaps(&TimeWindow::new(at(10), at(11))));
        assert!(TimeWindow::new(at(10), at(11)).overlaps(&shift));
    }

    #[test]
    fn first_conflict_skips_the_candidate_job() {
        let commitments = vec![commitment("job-a", 8, 12), commitment("job-b", 14, 18)];
        let candidate = TimeWindow::new(at(11), at(15));

        let hit = first_conflict(&JobId("job-c".to_string()), &candidate, &commitments)
            .expect("overlaps job-a");
        assert_eq!(hit.job_id, JobId("job-a".to_string()));

        let own = first_conflict(
            &JobId("job-a".to_string()),
            &TimeWindow::new(at(8), at(12)),
            &commitments,
        );
        assert!(own.is_none());
    }

    #[test]
    fn no_conflict_when_free() {
        let commitments = vec![commitment("job-a", 8, 12)];
        let candidate = TimeWindow::new(at(12), at(20));
        assert!(first_conflict(&JobId("job-z".to_string()), &candidate, &commitments).is_none());
    }
}
