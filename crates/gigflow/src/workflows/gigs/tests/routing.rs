use super::common::*;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::workflows::gigs::memory::InMemoryMarketplaceStore;
use crate::workflows::gigs::router::{self, gig_router, USER_ID_HEADER, USER_ROLE_HEADER};

fn request(method: Method, uri: &str, user: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((user_id, role)) = user {
        builder = builder
            .header(USER_ID_HEADER, user_id)
            .header(USER_ROLE_HEADER, role);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("route executes");
    let status = response.status();
    (status, read_json_body(response).await)
}

fn identity(user_id: &str, role: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_ID_HEADER, HeaderValue::from_str(user_id).unwrap());
    headers.insert(USER_ROLE_HEADER, HeaderValue::from_str(role).unwrap());
    headers
}

#[tokio::test]
async fn requests_without_identity_are_unauthenticated() {
    let h = build_service();
    let router = gig_router(h.service.clone());

    let (status, payload) = send(
        &router,
        request(Method::GET, "/api/v1/jobs/open", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(payload["error"], "unauthenticated");

    let (status, _) = send(
        &router,
        request(
            Method::GET,
            "/api/v1/jobs/open",
            Some(("wrk-1", "landlord")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn job_lifecycle_over_http() {
    let h = build_service();
    let router = gig_router(h.service.clone());
    let employer = Some(("emp-http", "employer"));
    let worker = Some(("wrk-http", "worker"));

    let (status, created) = send(
        &router,
        request(
            Method::POST,
            "/api/v1/jobs",
            employer,
            Some(serde_json::to_value(draft(48, 8, 1)).unwrap()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "draft");
    assert_eq!(created["payment"]["total_amount"], 400.0);
    let job_id = created["id"].as_str().unwrap().to_string();

    let (status, opened) = send(
        &router,
        request(
            Method::POST,
            &format!("/api/v1/jobs/{job_id}/activate"),
            employer,
            Some(json!({ "escrow_id": "esc-http" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(opened["status"], "open");
    assert_eq!(opened["payment"]["status"], "held");

    let (status, applied) = send(
        &router,
        request(
            Method::POST,
            &format!("/api/v1/jobs/{job_id}/apply"),
            worker,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(applied["status"], "pending");
    let application_id = applied["id"].as_str().unwrap().to_string();

    let (status, duplicate) = send(
        &router,
        request(
            Method::POST,
            &format!("/api/v1/jobs/{job_id}/apply"),
            worker,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(duplicate["error"], "state_conflict");
    assert_eq!(duplicate["retryable"], false);

    let (status, _) = send(
        &router,
        request(
            Method::POST,
            &format!("/api/v1/jobs/{job_id}/applications/{application_id}/accept"),
            worker,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, accepted) = send(
        &router,
        request(
            Method::POST,
            &format!("/api/v1/jobs/{job_id}/applications/{application_id}/accept"),
            employer,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["job"]["status"], "filled");
    assert_eq!(accepted["application"]["status"], "accepted");

    let (status, cancelled) = send(
        &router,
        request(
            Method::PUT,
            &format!("/api/v1/jobs/{job_id}/cancel"),
            employer,
            Some(json!({ "reason": "Client postponed" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["record"]["status"], "cancelled");
    assert_eq!(cancelled["record"]["cancel_reason"], "Client postponed");
    assert_eq!(cancelled["record"]["payment"]["status"], "refunded");
    assert_eq!(cancelled["penalty"]["incident"]["type"], "employer_cancelled");
    assert_eq!(cancelled["penalty"]["penalty_applied"], "warning");

    let (status, discipline) = send(
        &router,
        request(Method::GET, "/api/v1/me/discipline", employer, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(discipline["ledger"]["cancellations"], 1);
    assert_eq!(discipline["blocked"], false);
}

#[tokio::test]
async fn validation_and_missing_records_map_to_client_errors() {
    let h = build_service();
    let router = gig_router(h.service.clone());
    let employer = Some(("emp-errors", "employer"));

    let mut invalid = serde_json::to_value(draft(48, 8, 1)).unwrap();
    invalid["daily_work_hours"] = json!(30.0);
    let (status, payload) = send(
        &router,
        request(Method::POST, "/api/v1/jobs", employer, Some(invalid)),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(payload["error"], "validation_error");

    let (status, payload) = send(
        &router,
        request(Method::GET, "/api/v1/jobs/job-nowhere", employer, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload["error"], "not_found");
}

#[tokio::test]
async fn open_jobs_filter_by_city() {
    let h = build_service();
    let owner = employer(&h.service, "emp-filter");
    let cairo = open_job(&h.service, &owner, draft(48, 8, 1));
    let mut elsewhere = draft(72, 8, 1);
    elsewhere.location.city = "Alexandria".to_string();
    let alexandria = open_job(&h.service, &owner, elsewhere);
    let router = gig_router(h.service.clone());

    let (status, payload) = send(
        &router,
        request(
            Method::GET,
            "/api/v1/jobs/open?city=Alexandria",
            Some(("wrk-filter", "worker")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = payload
        .as_array()
        .unwrap()
        .iter()
        .map(|job| job["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![alexandria.id.0.as_str()]);
    assert!(!ids.contains(&cairo.id.0.as_str()));
}

#[tokio::test]
async fn blocked_worker_gets_forbidden_on_apply() {
    let h = build_service();
    let owner = employer(&h.service, "emp-forbid");
    let hire = worker(&h.service, "wrk-forbid");
    let job = open_job(&h.service, &owner, draft(24, 8, 1));
    let application = staff(&h.service, &owner, &job.id, &hire);
    h.clock.advance(Duration::hours(24));
    h.service.start_job(&owner, &job.id).unwrap();
    h.service.mark_no_show(&owner, &application.id).unwrap();
    let next = open_job(&h.service, &owner, draft(96, 8, 1));

    let response = router::apply_handler::<InMemoryMarketplaceStore, RecordingNotifier>(
        State(h.service.clone()),
        identity("wrk-forbid", "worker"),
        Path(next.id.0.clone()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], "authorization_error");
    assert!(payload["message"].as_str().unwrap().contains("blocked"));
}

#[tokio::test]
async fn withdraw_handler_accepts_an_empty_body() {
    let h = build_service();
    let owner = employer(&h.service, "emp-empty");
    let hire = worker(&h.service, "wrk-empty");
    let job = open_job(&h.service, &owner, draft(48, 8, 1));
    let application = h.service.apply(&hire, &job.id).unwrap();

    let response = router::withdraw_handler::<InMemoryMarketplaceStore, RecordingNotifier>(
        State(h.service.clone()),
        identity("wrk-empty", "worker"),
        Path(application.id.0.clone()),
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["record"]["status"], "cancelled");
    assert_eq!(payload["record"]["cancel_reason"], "Withdrawn by worker");
    assert_eq!(payload["penalty"]["incident"]["severity"], "medium");
}

#[tokio::test]
async fn my_lists_are_scoped_to_the_caller() {
    let h = build_service();
    let owner = employer(&h.service, "emp-mine");
    let hire = worker(&h.service, "wrk-mine");
    let job = open_job(&h.service, &owner, draft(48, 8, 2));
    h.service.apply(&hire, &job.id).unwrap();
    let router = gig_router(h.service.clone());

    let (status, jobs) = send(
        &router,
        request(Method::GET, "/api/v1/jobs/mine", Some(("wrk-mine", "worker")), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs[0]["job"]["id"], job.id.0.as_str());
    assert_eq!(jobs[0]["application_status"], "pending");

    let (status, applications) = send(
        &router,
        request(
            Method::GET,
            "/api/v1/applications/mine",
            Some(("wrk-other", "worker")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(applications, json!([]));

    let (status, listed) = send(
        &router,
        request(
            Method::GET,
            &format!("/api/v1/jobs/{}/applications", job.id),
            Some(("emp-mine", "employer")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
}
