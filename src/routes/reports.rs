use axum::{
    body::Bytes,
    extract::{FromRequest, Request, State},
    routing::post,
    Extension, Json, Router,
};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::models::{AppState, BlockRequest, CourseRequest, Requester, SubmitResponse};
use crate::queue::{JobKind, JobRequest, JobSubject, JobSubmitter};
use crate::types::{AppError, AppResult};
use crate::validation::RequestValidator;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/student-profile/", post(student_profile))
        .route("/ora2-report/", post(ora2_report))
        .route("/problem-report/", post(problem_report))
        .route("/users-role-report/", post(users_role_report))
}

/// JSON request body where an empty body reads as `T::default()`.
///
/// Missing fields are then reported by validation rather than as a parse error.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned + Default,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::MalformedBody(e.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(JsonBody(T::default()));
        }
        serde_json::from_slice(&bytes)
            .map(JsonBody)
            .map_err(|e| AppError::MalformedBody(e.to_string()))
    }
}

async fn submit_course_report(
    state: &AppState,
    kind: JobKind,
    request: &CourseRequest,
    requester: Requester,
) -> AppResult<Json<SubmitResponse>> {
    let course_key = RequestValidator::new(state.catalog.as_ref()).course_request(request).await?;
    let response = JobSubmitter::new(state.runner.as_ref(), state.catalog.as_ref(), &state.config.reports)
        .submit(JobRequest { kind, subject: JobSubject::Course(course_key), requester })
        .await?;
    Ok(Json(response))
}

async fn student_profile(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    JsonBody(request): JsonBody<CourseRequest>,
) -> AppResult<Json<SubmitResponse>> {
    info!(user = %requester.username, course_id = ?request.course_id, "CMMApi - Student profile report requested");
    submit_course_report(&state, JobKind::StudentProfile, &request, requester).await
}

async fn ora2_report(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    JsonBody(request): JsonBody<CourseRequest>,
) -> AppResult<Json<SubmitResponse>> {
    info!(user = %requester.username, course_id = ?request.course_id, "CMMApi - ORA2 report requested");
    submit_course_report(&state, JobKind::Ora2Export, &request, requester).await
}

async fn users_role_report(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    JsonBody(request): JsonBody<CourseRequest>,
) -> AppResult<Json<SubmitResponse>> {
    info!(user = %requester.username, course_id = ?request.course_id, "CMMApi - User roles report requested");
    submit_course_report(&state, JobKind::UserRoles, &request, requester).await
}

async fn problem_report(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    JsonBody(request): JsonBody<BlockRequest>,
) -> AppResult<Json<SubmitResponse>> {
    info!(user = %requester.username, block_id = ?request.block_id, "CMMApi - Problem report requested");
    let block_key = RequestValidator::block_request(&request)?;
    let response = JobSubmitter::new(state.runner.as_ref(), state.catalog.as_ref(), &state.config.reports)
        .submit(JobRequest {
            kind: JobKind::ProblemResponses,
            subject: JobSubject::Block(block_key),
            requester,
        })
        .await?;
    Ok(Json(response))
}
