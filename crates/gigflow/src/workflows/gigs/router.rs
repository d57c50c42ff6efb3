use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{
    ApplicationId, Caller, JobChanges, JobDraft, JobId, OpenJobQuery, PaymentCapture, Role, UserId,
};
use super::error::GigError;
use super::repository::{MarketplaceStore, Notifier, RepositoryError};
use super::service::GigService;

/// Header carrying the authenticated user id, set by the upstream auth gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the authenticated role (`worker`, `employer` or `admin`).
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Optional free-text reason for cancellations and withdrawals.
#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Router builder exposing the job and application lifecycle over HTTP.
pub fn gig_router<S, N>(service: Arc<GigService<S, N>>) -> Router
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    Router::new()
        .route("/api/v1/jobs", post(create_job_handler::<S, N>))
        .route("/api/v1/jobs/open", get(open_jobs_handler::<S, N>))
        .route("/api/v1/jobs/mine", get(my_jobs_handler::<S, N>))
        .route(
            "/api/v1/jobs/:job_id",
            get(job_details_handler::<S, N>).put(update_job_handler::<S, N>),
        )
        .route(
            "/api/v1/jobs/:job_id/activate",
            post(activate_job_handler::<S, N>),
        )
        .route("/api/v1/jobs/:job_id/start", post(start_job_handler::<S, N>))
        .route("/api/v1/jobs/:job_id/cancel", put(cancel_job_handler::<S, N>))
        .route(
            "/api/v1/jobs/:job_id/confirm-completion",
            put(confirm_completion_handler::<S, N>),
        )
        .route(
            "/api/v1/jobs/:job_id/dispute",
            post(dispute_job_handler::<S, N>),
        )
        .route("/api/v1/jobs/:job_id/apply", post(apply_handler::<S, N>))
        .route(
            "/api/v1/jobs/:job_id/applications",
            get(job_applications_handler::<S, N>),
        )
        .route(
            "/api/v1/jobs/:job_id/applications/:application_id/accept",
            post(accept_handler::<S, N>),
        )
        .route(
            "/api/v1/jobs/:job_id/applications/:application_id/reject",
            post(reject_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/mine",
            get(my_applications_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/withdraw",
            put(withdraw_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/mark-arrival",
            post(mark_arrival_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/mark-no-show",
            post(mark_no_show_handler::<S, N>),
        )
        .route("/api/v1/me/discipline", get(discipline_handler::<S, N>))
        .with_state(service)
}

pub(crate) fn status_for(error: &GigError) -> StatusCode {
    match error {
        GigError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GigError::StateConflict(_) | GigError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        GigError::Authorization(_) => StatusCode::FORBIDDEN,
        GigError::NotFound(_) | GigError::Repository(RepositoryError::NotFound) => {
            StatusCode::NOT_FOUND
        }
        GigError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: GigError) -> Response {
    let payload = json!({
        "error": error.kind(),
        "message": error.to_string(),
        "retryable": error.is_retryable(),
    });
    (status_for(&error), axum::Json(payload)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, GigError>) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

fn unauthenticated(message: &str) -> Response {
    let payload = json!({
        "error": "unauthenticated",
        "message": message,
    });
    (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response()
}

/// Resolves the trusted identity headers into a caller with a fresh discipline snapshot.
fn authenticate<S, N>(service: &GigService<S, N>, headers: &HeaderMap) -> Result<Caller, Response>
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| unauthenticated("missing x-user-id header"))?;
    let role = headers
        .get(USER_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| unauthenticated("missing x-user-role header"))?
        .parse::<Role>()
        .map_err(|err| unauthenticated(&err))?;

    service
        .resolve_caller(&UserId::from(user_id), role)
        .map_err(error_response)
}

macro_rules! caller_or_return {
    ($service:expr, $headers:expr) => {
        match authenticate(&*$service, &$headers) {
            Ok(caller) => caller,
            Err(response) => return response,
        }
    };
}

pub(crate) async fn create_job_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<JobDraft>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(StatusCode::CREATED, service.create_job(&caller, draft))
}

pub(crate) async fn open_jobs_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Query(query): Query<OpenJobQuery>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let _caller = caller_or_return!(service, headers);
    respond(StatusCode::OK, service.open_jobs(&query))
}

pub(crate) async fn my_jobs_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(StatusCode::OK, service.my_jobs(&caller))
}

pub(crate) async fn job_details_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(StatusCode::OK, service.job_details(&caller, &JobId(job_id)))
}

pub(crate) async fn update_job_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    axum::Json(changes): axum::Json<JobChanges>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.update_job(&caller, &JobId(job_id), changes),
    )
}

pub(crate) async fn activate_job_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    axum::Json(capture): axum::Json<PaymentCapture>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.activate_job(&caller, &JobId(job_id), capture),
    )
}

pub(crate) async fn start_job_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(StatusCode::OK, service.start_job(&caller, &JobId(job_id)))
}

pub(crate) async fn cancel_job_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    body: Option<axum::Json<ReasonBody>>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    let reason = body.and_then(|axum::Json(body)| body.reason);
    respond(
        StatusCode::OK,
        service.cancel_job(&caller, &JobId(job_id), reason),
    )
}

pub(crate) async fn confirm_completion_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.confirm_completion(&caller, &JobId(job_id)),
    )
}

pub(crate) async fn dispute_job_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(StatusCode::OK, service.dispute_job(&caller, &JobId(job_id)))
}

pub(crate) async fn apply_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(StatusCode::CREATED, service.apply(&caller, &JobId(job_id)))
}

pub(crate) async fn job_applications_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.applications_for_job(&caller, &JobId(job_id)),
    )
}

pub(crate) async fn accept_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path((job_id, application_id)): Path<(String, String)>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.accept(&caller, &JobId(job_id), &ApplicationId(application_id)),
    )
}

pub(crate) async fn reject_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path((job_id, application_id)): Path<(String, String)>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.reject(&caller, &JobId(job_id), &ApplicationId(application_id)),
    )
}

pub(crate) async fn my_applications_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(StatusCode::OK, service.my_applications(&caller))
}

pub(crate) async fn withdraw_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    body: Option<axum::Json<ReasonBody>>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    let reason = body.and_then(|axum::Json(body)| body.reason);
    respond(
        StatusCode::OK,
        service.withdraw(&caller, &ApplicationId(application_id), reason),
    )
}

pub(crate) async fn mark_arrival_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.mark_arrival(&caller, &ApplicationId(application_id)),
    )
}

pub(crate) async fn mark_no_show_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.mark_no_show(&caller, &ApplicationId(application_id)),
    )
}

pub(crate) async fn discipline_handler<S, N>(
    State(service): State<Arc<GigService<S, N>>>,
    headers: HeaderMap,
) -> Response
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    let caller = caller_or_return!(service, headers);
    respond(StatusCode::OK, service.discipline(&caller))
}
