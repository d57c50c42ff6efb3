use chrono::Duration;

use super::common::*;
use crate::workflows::gigs::discipline::{
    IncidentReport, IncidentType, PenaltyAction, PenaltyEngine, PenaltyRuleTable, Severity,
};
use crate::workflows::gigs::domain::{JobId, Role, UserId};
use crate::workflows::gigs::error::GigError;
use crate::workflows::gigs::repository::DisciplineRepository;

fn cancellation(user: &str) -> IncidentReport {
    IncidentReport {
        user_id: UserId::from(user),
        job_id: JobId::from("job-ledger"),
        kind: IncidentType::WorkerCancelled,
        severity: Severity::Medium,
    }
}

#[test]
fn repeated_cancellations_escalate_through_the_ladder() {
    let h = build_service();
    let user = UserId::from("wrk-ladder");
    h.store.ensure_user(&user, Role::Worker).unwrap();

    let outcomes: Vec<_> = (0..5)
        .map(|_| {
            h.service
                .penalties()
                .report(h.store.as_ref(), &cancellation("wrk-ladder"), t0())
                .expect("incident recorded")
        })
        .collect();

    let labels: Vec<_> = outcomes
        .iter()
        .map(|outcome| outcome.penalty_applied.as_str())
        .collect();
    assert_eq!(
        labels,
        vec![
            "warning",
            "warning",
            "blocked 3 days",
            "blocked 3 days",
            "blocked 14 days"
        ]
    );
    assert_eq!(outcomes[2].action, Some(PenaltyAction::Block { days: 3 }));
    assert_eq!(outcomes[4].blocked_until, Some(t0() + Duration::days(14)));

    let record = h.store.fetch_discipline(&user).unwrap().unwrap();
    assert_eq!(record.ledger.cancellations, 5);
    assert_eq!(record.ledger.warnings, 2);
    assert_eq!(record.version, 5);

    let incidents = h.store.incidents_for_user(&user).unwrap();
    assert_eq!(incidents.len(), 5);
    assert!(incidents
        .iter()
        .all(|incident| incident.penalty_applied.is_some()));
}

#[test]
fn blocked_worker_is_refused_until_the_block_expires() {
    let h = build_service();
    let owner = employer(&h.service, "emp-expiry");
    let user = UserId::from("wrk-expiry");
    h.store.ensure_user(&user, Role::Worker).unwrap();
    for _ in 0..3 {
        h.service
            .penalties()
            .report(h.store.as_ref(), &cancellation("wrk-expiry"), t0())
            .unwrap();
    }
    let job = open_job(&h.service, &owner, draft(24 * 10, 8, 1));

    let blocked = worker(&h.service, "wrk-expiry");
    assert!(blocked.discipline.is_blocked(t0()));
    assert!(matches!(
        h.service.apply(&blocked, &job.id),
        Err(GigError::Authorization(_))
    ));

    h.clock.advance(Duration::days(3));
    let released = worker(&h.service, "wrk-expiry");
    assert!(h.service.apply(&released, &job.id).is_ok());
}

#[test]
fn custom_rule_table_drives_the_service() {
    let table = PenaltyRuleTable::from_json(
        r#"{
            "worker": {
                "cancel": [ { "threshold": 1, "action": "block_2_days" } ]
            }
        }"#,
    )
    .expect("valid table");
    let h = build_service_with_rules(table);
    let owner = employer(&h.service, "emp-custom");
    let hire = worker(&h.service, "wrk-custom");
    let job = open_job(&h.service, &owner, draft(48, 8, 1));
    let application = h.service.apply(&hire, &job.id).unwrap();

    let outcome = h.service.withdraw(&hire, &application.id, None).unwrap();
    let penalty = outcome.penalty.expect("penalty recorded");
    assert_eq!(penalty.penalty_applied, "blocked 2 days");
    assert_eq!(penalty.blocked_until, Some(t0() + Duration::days(2)));

    let employer_outcome = h.service.cancel_job(&owner, &job.id, None).unwrap();
    assert_eq!(
        employer_outcome.penalty.map(|penalty| penalty.penalty_applied),
        Some("none".to_string())
    );
}

#[test]
fn lost_ledger_updates_are_retried() {
    let store = FlakyLedgerStore::losing_first(2);
    let user = UserId::from("wrk-retry");
    store.ensure_user(&user, Role::Worker).unwrap();
    let engine = PenaltyEngine::new(std::sync::Arc::new(PenaltyRuleTable::default()));

    let outcome = engine
        .report(&store, &cancellation("wrk-retry"), t0())
        .expect("third attempt wins");
    assert_eq!(outcome.penalty_applied, "warning");

    let record = store.fetch_discipline(&user).unwrap().unwrap();
    assert_eq!(record.ledger.cancellations, 1);
    assert_eq!(store.incidents_for_user(&user).unwrap().len(), 1);
}

#[test]
fn retries_give_up_after_three_lost_updates() {
    let store = FlakyLedgerStore::losing_first(3);
    let user = UserId::from("wrk-give-up");
    store.ensure_user(&user, Role::Worker).unwrap();
    let engine = PenaltyEngine::new(std::sync::Arc::new(PenaltyRuleTable::default()));

    let err = engine
        .report(&store, &cancellation("wrk-give-up"), t0())
        .unwrap_err();
    assert!(matches!(err, GigError::ConcurrencyConflict(_)));
    assert!(err.is_retryable());

    let record = store.fetch_discipline(&user).unwrap().unwrap();
    assert_eq!(record.ledger.cancellations, 0);
    assert!(store.incidents_for_user(&user).unwrap().is_empty());
}

#[test]
fn unknown_user_is_not_found() {
    let h = build_service();
    let err = h
        .service
        .penalties()
        .report(h.store.as_ref(), &cancellation("wrk-ghost"), t0())
        .unwrap_err();
    assert!(matches!(err, GigError::NotFound(_)));
}

#[test]
fn employer_and_worker_ledgers_are_separate() {
    let h = build_service();
    let owner = employer(&h.service, "emp-separate");
    let hire = worker(&h.service, "wrk-separate");
    let job = open_job(&h.service, &owner, draft(48, 8, 1));
    let application = h.service.apply(&hire, &job.id).unwrap();
    h.service.withdraw(&hire, &application.id, None).unwrap();
    h.service.cancel_job(&owner, &job.id, None).unwrap();

    let employer_view = h.service.discipline(&owner).unwrap();
    let worker_view = h.service.discipline(&hire).unwrap();
    assert_eq!(employer_view.ledger.cancellations, 1);
    assert_eq!(worker_view.ledger.cancellations, 1);
    assert_eq!(
        employer_view.incidents[0].kind,
        IncidentType::EmployerCancelled
    );
    assert_eq!(worker_view.incidents[0].kind, IncidentType::WorkerCancelled);
}
