use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use validator::Validate;

use crate::catalog::CourseCatalog;
use crate::config::Config;
use crate::middleware::{Authenticator, UserThrottle};
use crate::queue::JobRunner;
use crate::storage::ArtifactStore;
use crate::validation::validate_block_syntax;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Host database, absent in in-memory mode.
    pub pool: Option<PgPool>,
    pub catalog: Arc<dyn CourseCatalog>,
    pub runner: Arc<dyn JobRunner>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub authenticator: Arc<dyn Authenticator>,
    pub throttle: Arc<UserThrottle>,
}

/// An authenticated caller of the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    User(Requester),
}

// Task states as written by the host's task runner

pub const STATE_QUEUING: &str = "QUEUING";
pub const STATE_PROGRESS: &str = "PROGRESS";
pub const STATE_SUCCESS: &str = "SUCCESS";
pub const STATE_FAILURE: &str = "FAILURE";
pub const STATE_REVOKED: &str = "REVOKED";

/// States after which a task no longer blocks its dedup key.
pub const READY_STATES: [&str; 3] = [STATE_SUCCESS, STATE_FAILURE, STATE_REVOKED];

pub fn is_ready_state(state: &str) -> bool {
    READY_STATES.contains(&state)
}

/// A row of the job runner's task table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskRecord {
    /// Row id in the task table; the host's task implementations load the row by it.
    pub id: i64,
    pub task_id: String,
    pub task_type: String,
    pub course_id: String,
    pub task_key: String,
    pub task_input: String,
    pub task_state: String,
    pub task_output: Option<String>,
    pub requester_id: i64,
    pub created: DateTime<Utc>,
}

// API Request/Response types

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CourseRequest {
    #[validate(
        required(message = "This field is required."),
        length(min = 1, message = "This field may not be blank.")
    )]
    pub course_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct BlockRequest {
    #[validate(
        required(message = "This field is required."),
        length(min = 1, message = "This field may not be blank."),
        custom(function = "validate_block_syntax")
    )]
    pub block_id: Option<String>,
}

/// Response of every report-creation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// One entry of `/get-all-task/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_type: String,
    pub task_id: String,
    pub task_state: String,
    pub task_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub list_task: Vec<TaskStatus>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub database: String,
}
