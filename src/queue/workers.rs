// Worker for the reports this service generates itself

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::jobs::{JobKind, TaskMessage};
use super::runner::JobRunner;
use crate::keys::CourseKey;
use crate::models::{STATE_FAILURE, STATE_PROGRESS, STATE_SUCCESS};
use crate::reports::{generate_user_roles_report, RosterSource};
use crate::storage::ArtifactStore;

pub struct Worker {
    runner: Arc<dyn JobRunner>,
    roster: Arc<dyn RosterSource>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl Worker {
    pub fn new(
        runner: Arc<dyn JobRunner>,
        roster: Arc<dyn RosterSource>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self { runner, roster, artifacts }
    }

    pub async fn process_job(&self, job: TaskMessage) -> anyhow::Result<()> {
        info!(task_id = %job.task_id, task_type = %job.task_type, "Processing job");

        match job.kind() {
            Some(JobKind::UserRoles) => self.process_user_roles_job(job).await?,
            Some(kind) => self.close_host_job(job, kind).await?,
            None => {
                warn!("Unknown job type: {}", job.task_type);
            }
        }

        Ok(())
    }

    /// Host reports only reach this worker when no host worker is attached,
    /// so the task is closed as failed to release its dedup key.
    async fn close_host_job(&self, job: TaskMessage, kind: JobKind) -> anyhow::Result<()> {
        warn!(task_id = %job.task_id, kind = %kind, "No host worker for this report, marking it failed");
        let output = serde_json::json!({
            "exception": "HostWorkerUnavailable",
            "message": format!("No host worker is attached to generate {} reports", kind),
        });
        self.runner
            .update_task(&job.task_id, STATE_FAILURE, Some(output.to_string()))
            .await
            .context("Failed to close host report task")
    }

    async fn process_user_roles_job(&self, job: TaskMessage) -> anyhow::Result<()> {
        if let Err(e) = self.runner.update_task(&job.task_id, STATE_PROGRESS, None).await {
            warn!(task_id = %job.task_id, "Failed to mark task in progress: {:?}", e);
        }

        let result = match CourseKey::parse(&job.course_id) {
            Ok(course_key) => generate_user_roles_report(
                self.roster.as_ref(),
                self.artifacts.as_ref(),
                &course_key,
                Utc::now(),
            )
            .await
            .and_then(|progress| serde_json::to_string(&progress).map_err(Into::into)),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(output) => {
                self.runner
                    .update_task(&job.task_id, STATE_SUCCESS, Some(output))
                    .await
                    .context("Failed to record report success")?;
                info!(task_id = %job.task_id, "User roles report generated");
                Ok(())
            }
            Err(e) => {
                error!(task_id = %job.task_id, "User roles report failed: {:?}", e);
                let output = serde_json::json!({
                    "exception": "ReportError",
                    "message": e.to_string(),
                });
                if let Err(update_err) =
                    self.runner.update_task(&job.task_id, STATE_FAILURE, Some(output.to_string())).await
                {
                    error!(task_id = %job.task_id, "Failed to record report failure: {:?}", update_err);
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    /// Process tasks from an in-process dispatcher until it is dropped.
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<TaskMessage>) {
        while let Some(job) = receiver.recv().await {
            if let Err(e) = self.process_job(job).await {
                error!("Job processing failed: {:?}", e);
            }
        }
        info!("Task channel closed, worker stopped");
    }

    /// Process tasks pushed onto a Redis list.
    pub async fn run_redis(self, mut conn: ConnectionManager, queue: String) {
        info!(queue = %queue, "Worker listening on Redis queue");
        loop {
            let popped: redis::RedisResult<Option<(String, String)>> = conn.brpop(&queue, 5.0).await;
            match popped {
                Ok(Some((_, payload))) => match serde_json::from_str::<TaskMessage>(&payload) {
                    Ok(job) => {
                        if let Err(e) = self.process_job(job).await {
                            error!("Job processing failed: {:?}", e);
                        }
                    }
                    Err(e) => error!("Discarding malformed task message: {}", e),
                },
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to read from Redis queue {}: {}", queue, e);
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Requester;
    use crate::queue::dispatch::ChannelDispatcher;
    use crate::queue::jobs::DedupKey;
    use crate::queue::runner::{InMemoryJobRunner, SubmitError, SubmittedTask, TaskSubmission};
    use crate::queue::status::StatusAggregator;
    use crate::reports::{InMemoryRoster, RosterEntry};
    use crate::storage::InMemoryArtifactStore;

    fn submission(kind: JobKind, course_key: &CourseKey) -> TaskSubmission {
        TaskSubmission {
            kind,
            course_key: course_key.clone(),
            task_input: serde_json::json!({}),
            dedup_key: DedupKey::new(kind, course_key),
            requester: Requester { user_id: 1, username: "staff".into() },
        }
    }

    #[tokio::test]
    async fn test_user_roles_job_produces_downloadable_report() {
        let course = CourseKey::parse("course-v1:mss+999+2021").unwrap();
        let (dispatcher, mut receiver) = ChannelDispatcher::new();
        let runner = Arc::new(InMemoryJobRunner::new(Arc::new(dispatcher)));
        let roster = Arc::new(InMemoryRoster::default());
        roster.add_team_member(&course, RosterEntry::new("instructor", "i@edx.org", None)).await;
        let artifacts = Arc::new(InMemoryArtifactStore::default());
        let worker = Worker::new(runner.clone(), roster, artifacts.clone());

        runner.submit(submission(JobKind::UserRoles, &course)).await.unwrap();
        worker.process_job(receiver.recv().await.unwrap()).await.unwrap();

        let status = StatusAggregator::new(runner.as_ref(), artifacts.as_ref())
            .task_status(&course)
            .await
            .unwrap();
        assert_eq!(status.list_task.len(), 1);
        let task = &status.list_task[0];
        assert_eq!(task.task_state, STATE_SUCCESS);
        let output: serde_json::Value = serde_json::from_str(task.task_output.as_deref().unwrap()).unwrap();
        assert_eq!(output["step"], "CMMAPI Student Role - CSV uploaded");
        let report_name = output["report_name"].as_str().unwrap();
        assert!(report_name.starts_with("mss_999_2021_Reporte_Roles_"));
        assert_eq!(task.url, Some(format!("memory://{}/{}", course, report_name)));
    }

    #[tokio::test]
    async fn test_host_report_without_host_worker_releases_key() {
        let course = CourseKey::parse("course-v1:mss+999+2021").unwrap();
        let (dispatcher, mut receiver) = ChannelDispatcher::new();
        let runner = Arc::new(InMemoryJobRunner::new(Arc::new(dispatcher)));
        let worker = Worker::new(
            runner.clone(),
            Arc::new(InMemoryRoster::default()),
            Arc::new(InMemoryArtifactStore::default()),
        );

        runner.submit(submission(JobKind::StudentProfile, &course)).await.unwrap();
        worker.process_job(receiver.recv().await.unwrap()).await.unwrap();

        let records = runner.list_jobs(&course, &JobKind::all_task_types()).await.unwrap();
        assert_eq!(records[0].task_state, STATE_FAILURE);
        let output: serde_json::Value = serde_json::from_str(records[0].task_output.as_deref().unwrap()).unwrap();
        assert_eq!(output["exception"], "HostWorkerUnavailable");

        runner.submit(submission(JobKind::StudentProfile, &course)).await.unwrap();
    }

    /// Fails every transition to PROGRESS, delegates everything else.
    struct NoProgressRunner(InMemoryJobRunner);

    #[async_trait::async_trait]
    impl JobRunner for NoProgressRunner {
        async fn submit(&self, submission: TaskSubmission) -> Result<SubmittedTask, SubmitError> {
            self.0.submit(submission).await
        }

        async fn list_jobs(
            &self,
            course_key: &CourseKey,
            task_types: &[&str],
        ) -> anyhow::Result<Vec<crate::models::TaskRecord>> {
            self.0.list_jobs(course_key, task_types).await
        }

        async fn update_task(&self, task_id: &str, state: &str, output: Option<String>) -> anyhow::Result<()> {
            if state == STATE_PROGRESS {
                anyhow::bail!("connection reset");
            }
            self.0.update_task(task_id, state, output).await
        }
    }

    #[tokio::test]
    async fn test_progress_update_failure_does_not_strand_task() {
        let course = CourseKey::parse("course-v1:mss+999+2021").unwrap();
        let (dispatcher, mut receiver) = ChannelDispatcher::new();
        let runner = Arc::new(NoProgressRunner(InMemoryJobRunner::new(Arc::new(dispatcher))));
        let worker = Worker::new(
            runner.clone(),
            Arc::new(InMemoryRoster::default()),
            Arc::new(InMemoryArtifactStore::default()),
        );

        runner.submit(submission(JobKind::UserRoles, &course)).await.unwrap();
        worker.process_job(receiver.recv().await.unwrap()).await.unwrap();

        let records = runner.list_jobs(&course, &JobKind::all_task_types()).await.unwrap();
        assert_eq!(records[0].task_state, STATE_SUCCESS);
    }
}
