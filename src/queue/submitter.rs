use tracing::{info, warn};

use super::jobs::{profile_features, JobKind, JobRequest, JobSubject, ALREADY_RUNNING};
use super::runner::{JobRunner, SubmitError, TaskSubmission};
use crate::catalog::CourseCatalog;
use crate::config::ReportConfig;
use crate::models::SubmitResponse;
use crate::types::{AppError, AppResult};

/// Turns a validated request into a task under its dedup key.
pub struct JobSubmitter<'a> {
    runner: &'a dyn JobRunner,
    catalog: &'a dyn CourseCatalog,
    reports: &'a ReportConfig,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(runner: &'a dyn JobRunner, catalog: &'a dyn CourseCatalog, reports: &'a ReportConfig) -> Self {
        Self { runner, catalog, reports }
    }

    pub async fn submit(&self, request: JobRequest) -> AppResult<SubmitResponse> {
        let kind = request.kind;
        let dedup_key = request.dedup_key();
        let task_input = self.task_input(&request).await?;
        let submission = TaskSubmission {
            kind,
            course_key: request.subject.course_key().clone(),
            task_input,
            dedup_key,
            requester: request.requester,
        };

        match self.runner.submit(submission).await {
            Ok(task) => {
                info!(kind = %kind, task_id = %task.task_id, "Report task created");
                Ok(SubmitResponse {
                    status: kind.created_message(self.reports.locale).to_string(),
                    task_id: Some(task.task_id),
                })
            }
            Err(SubmitError::AlreadyRunning(key)) => {
                warn!(kind = %kind, dedup_key = %key, "Report task already running");
                Ok(SubmitResponse { status: ALREADY_RUNNING.to_string(), task_id: None })
            }
            Err(SubmitError::Other(e)) => Err(AppError::Internal(e)),
        }
    }

    async fn task_input(&self, request: &JobRequest) -> AppResult<serde_json::Value> {
        let input = match (request.kind, &request.subject) {
            (JobKind::StudentProfile, subject) => {
                let course = self.catalog.course(subject.course_key()).await?;
                serde_json::json!(profile_features(&self.reports.student_profile_fields, course.as_ref()))
            }
            (JobKind::ProblemResponses, subject) => {
                let location = match subject {
                    JobSubject::Block(block) => block.to_string(),
                    JobSubject::Course(course) => course.to_string(),
                };
                serde_json::json!({
                    "problem_locations": location,
                    "problem_types_filter": null,
                    "user_id": request.requester.user_id,
                })
            }
            (JobKind::Ora2Export | JobKind::UserRoles, _) => serde_json::json!({}),
        };
        Ok(input)
    }
}
