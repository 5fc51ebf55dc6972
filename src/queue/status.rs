use std::collections::HashMap;

use tracing::info;

use super::jobs::JobKind;
use super::runner::JobRunner;
use crate::keys::CourseKey;
use crate::models::{TaskListResponse, TaskRecord, TaskStatus};
use crate::storage::ArtifactStore;
use crate::types::AppResult;

/// Joins a course's report tasks with the download links of their files.
pub struct StatusAggregator<'a> {
    runner: &'a dyn JobRunner,
    artifacts: &'a dyn ArtifactStore,
}

impl<'a> StatusAggregator<'a> {
    pub fn new(runner: &'a dyn JobRunner, artifacts: &'a dyn ArtifactStore) -> Self {
        Self { runner, artifacts }
    }

    pub async fn task_status(&self, course_key: &CourseKey) -> AppResult<TaskListResponse> {
        let mut records = self.runner.list_jobs(course_key, &JobKind::all_task_types()).await?;
        records.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.task_id.cmp(&b.task_id)));

        let links: HashMap<String, String> = self
            .artifacts
            .links_for(course_key)
            .await?
            .into_iter()
            .map(|link| (link.name, link.url))
            .collect();

        let list_task = records
            .into_iter()
            .map(|record| {
                let url = report_name(&record).and_then(|name| links.get(&name).cloned());
                TaskStatus {
                    task_type: record.task_type,
                    task_id: record.task_id,
                    task_state: record.task_state,
                    task_output: record.task_output,
                    url,
                }
            })
            .collect();
        Ok(TaskListResponse { list_task })
    }
}

/// `report_name` from a task's JSON output, if it has one.
fn report_name(record: &TaskRecord) -> Option<String> {
    let output = record.task_output.as_deref()?;
    match serde_json::from_str::<serde_json::Value>(output) {
        Ok(serde_json::Value::Object(map)) => {
            map.get("report_name").and_then(|v| v.as_str()).map(str::to_string)
        }
        _ => {
            info!("CMM-Api - Task output is not a dict type, task_id: {}", record.task_id);
            None
        }
    }
}
