use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use tracing::info;

use super::reports::JsonBody;
use crate::models::{AppState, CourseRequest, TaskListResponse};
use crate::queue::StatusAggregator;
use crate::types::{AppError, AppResult};
use crate::validation::RequestValidator;

pub fn router() -> Router<AppState> {
    Router::new().route("/get-all-task/", get(get_all_tasks))
}

/// Status of every report task of a course. The course comes from the JSON
/// body, or from `?course_id=` when the body has none. A query string that
/// does not parse is only an error when it is the course's source.
async fn get_all_tasks(
    State(state): State<AppState>,
    query: Result<Query<CourseRequest>, QueryRejection>,
    JsonBody(body): JsonBody<CourseRequest>,
) -> AppResult<Json<TaskListResponse>> {
    let request = if body.course_id.is_some() {
        body
    } else {
        let Query(query) = query.map_err(|rejection| AppError::MalformedQuery(rejection.body_text()))?;
        query
    };
    info!(course_id = ?request.course_id, "CMMApi - Task status requested");

    let course_key = RequestValidator::new(state.catalog.as_ref()).course_request(&request).await?;
    let response = StatusAggregator::new(state.runner.as_ref(), state.artifacts.as_ref())
        .task_status(&course_key)
        .await?;
    Ok(Json(response))
}
