// Job runner interface and the in-memory runner used for local mode and tests

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use super::dispatch::TaskDispatcher;
use super::jobs::{DedupKey, JobKind, TaskMessage};
use crate::keys::CourseKey;
use crate::models::{is_ready_state, Requester, TaskRecord, STATE_FAILURE, STATE_QUEUING};

/// Everything the job runner needs to reserve and start a task.
#[derive(Debug, Clone)]
pub struct TaskSubmission {
    pub kind: JobKind,
    pub course_key: CourseKey,
    pub task_input: serde_json::Value,
    pub dedup_key: DedupKey,
    pub requester: Requester,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTask {
    pub task_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Task {0} is already running")]
    AlreadyRunning(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Reserve a task under the submission's dedup key and dispatch it.
    ///
    /// Fails with [`SubmitError::AlreadyRunning`] while a task with the same
    /// course, task type and key is not yet in a ready state.
    async fn submit(&self, submission: TaskSubmission) -> Result<SubmittedTask, SubmitError>;

    /// Task records of the given types for a course, oldest first.
    async fn list_jobs(&self, course_key: &CourseKey, task_types: &[&str]) -> Result<Vec<TaskRecord>>;

    async fn update_task(&self, task_id: &str, state: &str, output: Option<String>) -> Result<()>;
}

pub fn new_task_record(submission: &TaskSubmission) -> TaskRecord {
    TaskRecord {
        id: 0,
        task_id: Uuid::new_v4().to_string(),
        task_type: submission.kind.task_type().to_string(),
        course_id: submission.course_key.to_string(),
        task_key: submission.dedup_key.to_string(),
        task_input: submission.task_input.to_string(),
        task_state: STATE_QUEUING.to_string(),
        task_output: None,
        requester_id: submission.requester.user_id,
        created: Utc::now(),
    }
}

/// Dispatch a freshly reserved record. A failed dispatch marks the record as
/// failed so its dedup key does not stay blocked; the dispatch error is what
/// the caller sees even when that update fails too.
pub async fn dispatch_reserved(
    runner: &dyn JobRunner,
    dispatcher: &dyn TaskDispatcher,
    submission: &TaskSubmission,
    record: &TaskRecord,
) -> Result<SubmittedTask, SubmitError> {
    let message = TaskMessage {
        entry_id: record.id,
        task_id: record.task_id.clone(),
        task_type: record.task_type.clone(),
        task_class: submission.kind.task_class().to_string(),
        course_id: record.course_id.clone(),
        task_input: submission.task_input.clone(),
        requester: submission.requester.clone(),
    };
    if let Err(e) = dispatcher.dispatch(&message).await {
        error!(task_id = %record.task_id, "Failed to dispatch task: {:?}", e);
        let output = serde_json::json!({
            "exception": "DispatchError",
            "message": e.to_string(),
        });
        if let Err(update_err) =
            runner.update_task(&record.task_id, STATE_FAILURE, Some(output.to_string())).await
        {
            error!(task_id = %record.task_id, "Failed to mark undispatched task as failed: {:?}", update_err);
        }
        return Err(SubmitError::Other(e));
    }
    info!(task_id = %record.task_id, task_type = %record.task_type, "Task submitted");
    Ok(SubmittedTask { task_id: record.task_id.clone() })
}

pub struct InMemoryJobRunner {
    records: Mutex<Vec<TaskRecord>>,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl InMemoryJobRunner {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self { records: Mutex::new(Vec::new()), dispatcher }
    }

    /// Add an existing record, as if another process had written it.
    pub async fn insert(&self, record: TaskRecord) {
        self.records.lock().await.push(record);
    }

    async fn reserve(&self, submission: &TaskSubmission) -> Result<TaskRecord, SubmitError> {
        let mut records = self.records.lock().await;
        let course_id = submission.course_key.to_string();
        let running = records.iter().any(|r| {
            r.course_id == course_id
                && r.task_type == submission.kind.task_type()
                && r.task_key == submission.dedup_key.as_str()
                && !is_ready_state(&r.task_state)
        });
        if running {
            return Err(SubmitError::AlreadyRunning(submission.dedup_key.to_string()));
        }
        let mut record = new_task_record(submission);
        record.id = records.len() as i64 + 1;
        records.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl JobRunner for InMemoryJobRunner {
    async fn submit(&self, submission: TaskSubmission) -> Result<SubmittedTask, SubmitError> {
        let record = self.reserve(&submission).await?;
        dispatch_reserved(self, self.dispatcher.as_ref(), &submission, &record).await
    }

    async fn list_jobs(&self, course_key: &CourseKey, task_types: &[&str]) -> Result<Vec<TaskRecord>> {
        let course_id = course_key.to_string();
        let records = self.records.lock().await;
        let mut matching: Vec<TaskRecord> = records
            .iter()
            .filter(|r| r.course_id == course_id && task_types.contains(&r.task_type.as_str()))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.task_id.cmp(&b.task_id)));
        Ok(matching)
    }

    async fn update_task(&self, task_id: &str, state: &str, output: Option<String>) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.task_id == task_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown task: {}", task_id))?;
        record.task_state = state.to_string();
        record.task_output = output;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::STATE_SUCCESS;
    use crate::queue::dispatch::ChannelDispatcher;

    struct FailingDispatcher;

    #[async_trait]
    impl TaskDispatcher for FailingDispatcher {
        async fn dispatch(&self, _message: &TaskMessage) -> Result<()> {
            anyhow::bail!("broker unavailable")
        }
    }

    fn submission(kind: JobKind, course: &str) -> TaskSubmission {
        let course_key = CourseKey::parse(course).unwrap();
        TaskSubmission {
            kind,
            dedup_key: DedupKey::new(kind, &course_key),
            course_key,
            task_input: serde_json::json!({}),
            requester: Requester { user_id: 1, username: "staff".into() },
        }
    }

    #[tokio::test]
    async fn test_second_submission_is_refused_while_running() {
        let (dispatcher, mut receiver) = ChannelDispatcher::new();
        let runner = InMemoryJobRunner::new(Arc::new(dispatcher));

        let first = runner.submit(submission(JobKind::Ora2Export, "course-v1:org+X+2024")).await.unwrap();
        let second = runner.submit(submission(JobKind::Ora2Export, "course-v1:org+X+2024")).await;
        assert!(matches!(second, Err(SubmitError::AlreadyRunning(_))));

        let message = receiver.recv().await.unwrap();
        assert_eq!(message.task_id, first.task_id);
        assert_eq!(message.task_type, "cmmapi_export_ora2_data");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_other_kind_or_course_is_not_blocked() {
        let (dispatcher, _receiver) = ChannelDispatcher::new();
        let runner = InMemoryJobRunner::new(Arc::new(dispatcher));

        runner.submit(submission(JobKind::Ora2Export, "course-v1:org+X+2024")).await.unwrap();
        runner.submit(submission(JobKind::UserRoles, "course-v1:org+X+2024")).await.unwrap();
        runner.submit(submission(JobKind::Ora2Export, "course-v1:org+Y+2024")).await.unwrap();
    }

    #[tokio::test]
    async fn test_finished_task_releases_dedup_key() {
        let (dispatcher, _receiver) = ChannelDispatcher::new();
        let runner = InMemoryJobRunner::new(Arc::new(dispatcher));

        let first = runner.submit(submission(JobKind::UserRoles, "course-v1:org+X+2024")).await.unwrap();
        runner.update_task(&first.task_id, STATE_SUCCESS, None).await.unwrap();
        let second = runner.submit(submission(JobKind::UserRoles, "course-v1:org+X+2024")).await.unwrap();
        assert_ne!(first.task_id, second.task_id);
    }

    #[tokio::test]
    async fn test_failed_dispatch_marks_record_failed() {
        let runner = InMemoryJobRunner::new(Arc::new(FailingDispatcher));
        let result = runner.submit(submission(JobKind::Ora2Export, "course-v1:org+X+2024")).await;
        assert!(matches!(result, Err(SubmitError::Other(_))));

        let course = CourseKey::parse("course-v1:org+X+2024").unwrap();
        let records = runner.list_jobs(&course, &JobKind::all_task_types()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_state, STATE_FAILURE);
    }

    struct ReadOnlyRunner;

    #[async_trait]
    impl JobRunner for ReadOnlyRunner {
        async fn submit(&self, _submission: TaskSubmission) -> Result<SubmittedTask, SubmitError> {
            Err(SubmitError::Other(anyhow::anyhow!("not used")))
        }

        async fn list_jobs(&self, _course_key: &CourseKey, _task_types: &[&str]) -> Result<Vec<TaskRecord>> {
            Ok(Vec::new())
        }

        async fn update_task(&self, _task_id: &str, _state: &str, _output: Option<String>) -> Result<()> {
            anyhow::bail!("database is read-only")
        }
    }

    #[tokio::test]
    async fn test_dispatch_error_survives_failed_update() {
        let submission = submission(JobKind::Ora2Export, "course-v1:org+X+2024");
        let record = new_task_record(&submission);
        let result = dispatch_reserved(&ReadOnlyRunner, &FailingDispatcher, &submission, &record).await;
        match result {
            Err(SubmitError::Other(e)) => assert_eq!(e.to_string(), "broker unavailable"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_records_get_row_ids_and_messages_carry_them() {
        let (dispatcher, mut receiver) = ChannelDispatcher::new();
        let runner = InMemoryJobRunner::new(Arc::new(dispatcher));
        runner.submit(submission(JobKind::Ora2Export, "course-v1:org+X+2024")).await.unwrap();
        runner.submit(submission(JobKind::Ora2Export, "course-v1:org+Y+2024")).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap().entry_id, 1);
        let second = receiver.recv().await.unwrap();
        assert_eq!(second.entry_id, 2);
        assert_eq!(second.requester.username, "staff");
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_course_and_type() {
        let (dispatcher, _receiver) = ChannelDispatcher::new();
        let runner = InMemoryJobRunner::new(Arc::new(dispatcher));
        runner.submit(submission(JobKind::Ora2Export, "course-v1:org+X+2024")).await.unwrap();
        runner.submit(submission(JobKind::Ora2Export, "course-v1:org+Y+2024")).await.unwrap();
        let mut foreign = new_task_record(&submission(JobKind::Ora2Export, "course-v1:org+X+2024"));
        foreign.task_type = "grade_course".to_string();
        runner.insert(foreign).await;

        let course = CourseKey::parse("course-v1:org+X+2024").unwrap();
        let records = runner.list_jobs(&course, &JobKind::all_task_types()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_type, "cmmapi_export_ora2_data");
    }
}
