use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::error;

use crate::catalog::{CourseCatalog, CourseSummary};
use crate::keys::CourseKey;
use crate::middleware::Authenticator;
use crate::models::{Requester, TaskRecord, READY_STATES};
use crate::queue::{
    dispatch_reserved, new_task_record, JobRunner, SubmitError, SubmittedTask, TaskDispatcher,
    TaskSubmission,
};
use crate::reports::{RosterEntry, RosterSource};

/// Postgres error code for a missing table.
const UNDEFINED_TABLE: &str = "42P01";

/// Read access to the host platform's tables.
#[derive(Clone)]
pub struct HostDatabase {
    pool: PgPool,
}

impl HostDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_roster(
        &self,
        with_run: &str,
        without_run: &str,
        course_key: &CourseKey,
    ) -> Result<Vec<RosterEntry>> {
        let course_id = course_key.to_string();
        let rows = match sqlx::query_as::<_, (String, String, Option<String>)>(with_run)
            .bind(&course_id)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNDEFINED_TABLE) => {
                error!("CMMApi - Error with institutional login table, listing users without run");
                sqlx::query_as::<_, (String, String, Option<String>)>(without_run)
                    .bind(&course_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            Err(e) => return Err(e.into()),
        };
        Ok(rows
            .into_iter()
            .map(|(username, email, run)| RosterEntry { username, email, run })
            .collect())
    }
}

#[async_trait]
impl CourseCatalog for HostDatabase {
    async fn exists(&self, key: &CourseKey) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM course_overviews_courseoverview WHERE id = $1)",
        )
        .bind(key.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn course(&self, key: &CourseKey) -> Result<Option<CourseSummary>> {
        let row = sqlx::query_as::<_, (bool, bool)>(
            r#"
            SELECT COALESCE(c.is_cohorted, FALSE),
                   EXISTS(SELECT 1 FROM teams_courseteam t WHERE t.course_id = o.id)
            FROM course_overviews_courseoverview o
            LEFT JOIN course_groups_coursecohortssettings c ON c.course_id = o.id
            WHERE o.id = $1
            "#,
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(cohorted, teams_enabled)| CourseSummary {
            key: key.clone(),
            cohorted,
            teams_enabled,
        }))
    }
}

#[async_trait]
impl RosterSource for HostDatabase {
    async fn course_team(&self, course_key: &CourseKey) -> Result<Vec<RosterEntry>> {
        self.fetch_roster(
            r#"
            SELECT DISTINCT u.username, u.email, l.run
            FROM student_courseaccessrole r
            JOIN auth_user u ON u.id = r.user_id
            LEFT JOIN uchileedxlogin_edxloginuser l ON l.user_id = u.id
            WHERE r.course_id = $1
            ORDER BY u.username
            "#,
            r#"
            SELECT DISTINCT u.username, u.email, NULL::TEXT
            FROM student_courseaccessrole r
            JOIN auth_user u ON u.id = r.user_id
            WHERE r.course_id = $1
            ORDER BY u.username
            "#,
            course_key,
        )
        .await
    }

    async fn active_enrollments(&self, course_key: &CourseKey) -> Result<Vec<RosterEntry>> {
        self.fetch_roster(
            r#"
            SELECT u.username, u.email, l.run
            FROM student_courseenrollment e
            JOIN auth_user u ON u.id = e.user_id
            LEFT JOIN uchileedxlogin_edxloginuser l ON l.user_id = u.id
            WHERE e.course_id = $1 AND e.is_active
            ORDER BY u.username
            "#,
            r#"
            SELECT u.username, u.email, NULL::TEXT
            FROM student_courseenrollment e
            JOIN auth_user u ON u.id = e.user_id
            WHERE e.course_id = $1 AND e.is_active
            ORDER BY u.username
            "#,
            course_key,
        )
        .await
    }
}

#[async_trait]
impl Authenticator for HostDatabase {
    async fn authenticate(&self, token: &str) -> Result<Option<Requester>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT u.id::BIGINT, u.username
            FROM oauth2_provider_accesstoken t
            JOIN auth_user u ON u.id = t.user_id
            WHERE t.token = $1 AND t.expires > NOW() AND u.is_active
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, username)| Requester { user_id, username }))
    }
}

/// Job runner backed by the host's task table.
pub struct PgJobRunner {
    pool: PgPool,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl PgJobRunner {
    pub fn new(pool: PgPool, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self { pool, dispatcher }
    }

    async fn reserve(&self, submission: &TaskSubmission) -> Result<TaskRecord, SubmitError> {
        let mut tx = self.pool.begin().await.context("Failed to start transaction")?;

        // Serializes concurrent submissions for the same key until commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(submission.dedup_key.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to lock dedup key")?;

        let running = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM instructor_task_instructortask
                WHERE course_id = $1 AND task_type = $2 AND task_key = $3
                  AND task_state <> ALL($4)
            )
            "#,
        )
        .bind(submission.course_key.to_string())
        .bind(submission.kind.task_type())
        .bind(submission.dedup_key.as_str())
        .bind(&READY_STATES[..])
        .fetch_one(&mut *tx)
        .await
        .context("Failed to check running tasks")?;
        if running {
            return Err(SubmitError::AlreadyRunning(submission.dedup_key.to_string()));
        }

        let mut record = new_task_record(submission);
        record.id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO instructor_task_instructortask
                (task_type, course_id, task_key, task_input, task_id, task_state,
                 task_output, requester_id, created, updated, subtasks)
            VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8, $8, '')
            RETURNING id::BIGINT
            "#,
        )
        .bind(&record.task_type)
        .bind(&record.course_id)
        .bind(&record.task_key)
        .bind(&record.task_input)
        .bind(&record.task_id)
        .bind(&record.task_state)
        .bind(record.requester_id)
        .bind(record.created)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert task")?;

        tx.commit().await.context("Failed to commit task reservation")?;
        Ok(record)
    }
}

#[async_trait]
impl JobRunner for PgJobRunner {
    async fn submit(&self, submission: TaskSubmission) -> Result<SubmittedTask, SubmitError> {
        let record = self.reserve(&submission).await?;
        dispatch_reserved(self, self.dispatcher.as_ref(), &submission, &record).await
    }

    async fn list_jobs(&self, course_key: &CourseKey, task_types: &[&str]) -> Result<Vec<TaskRecord>> {
        let records = sqlx::query_as::<_, TaskRecord>(
            r#"
            SELECT id::BIGINT AS id, task_id, task_type, course_id, task_key, task_input,
                   task_state, task_output, requester_id::BIGINT AS requester_id, created
            FROM instructor_task_instructortask
            WHERE course_id = $1 AND task_type = ANY($2)
            ORDER BY created ASC, task_id ASC
            "#,
        )
        .bind(course_key.to_string())
        .bind(task_types)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn update_task(&self, task_id: &str, state: &str, output: Option<String>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE instructor_task_instructortask
            SET task_state = $2, task_output = $3, updated = NOW()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(state)
        .bind(output)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Unknown task: {}", task_id);
        }
        Ok(())
    }
}
