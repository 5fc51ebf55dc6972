//! User roles report: course team members first, then enrolled students.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::keys::CourseKey;
use crate::storage::ArtifactStore;

pub const ROLE_STAFF: &str = "Docente/Equipo";
pub const ROLE_STUDENT: &str = "Estudiante";
pub const REPORT_HEADER: [&str; 4] = ["Username", "Email", "Run", "Rol"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub username: String,
    pub email: String,
    /// National id from the institutional login, when known.
    pub run: Option<String>,
}

impl RosterEntry {
    pub fn new(username: &str, email: &str, run: Option<&str>) -> Self {
        Self { username: username.to_string(), email: email.to_string(), run: run.map(str::to_string) }
    }
}

#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Users holding any access role in the course.
    async fn course_team(&self, course_key: &CourseKey) -> Result<Vec<RosterEntry>>;

    /// Users with an active enrollment, ordered by username.
    async fn active_enrollments(&self, course_key: &CourseKey) -> Result<Vec<RosterEntry>>;
}

#[derive(Clone, Default)]
pub struct InMemoryRoster {
    team: Arc<RwLock<HashMap<String, Vec<RosterEntry>>>>,
    students: Arc<RwLock<HashMap<String, Vec<RosterEntry>>>>,
}

impl InMemoryRoster {
    pub async fn add_team_member(&self, course_key: &CourseKey, entry: RosterEntry) {
        self.team.write().await.entry(course_key.to_string()).or_default().push(entry);
    }

    pub async fn enroll(&self, course_key: &CourseKey, entry: RosterEntry) {
        self.students.write().await.entry(course_key.to_string()).or_default().push(entry);
    }
}

#[async_trait]
impl RosterSource for InMemoryRoster {
    async fn course_team(&self, course_key: &CourseKey) -> Result<Vec<RosterEntry>> {
        Ok(self.team.read().await.get(&course_key.to_string()).cloned().unwrap_or_default())
    }

    async fn active_enrollments(&self, course_key: &CourseKey) -> Result<Vec<RosterEntry>> {
        let mut students =
            self.students.read().await.get(&course_key.to_string()).cloned().unwrap_or_default();
        students.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(students)
    }
}

/// Team rows followed by the enrolled users that are not on the team.
pub fn role_rows(team: &[RosterEntry], students: &[RosterEntry]) -> Vec<[String; 4]> {
    let team_usernames: HashSet<&str> = team.iter().map(|e| e.username.as_str()).collect();
    let row = |entry: &RosterEntry, role: &str| {
        [
            entry.username.clone(),
            entry.email.clone(),
            entry.run.clone().unwrap_or_default(),
            role.to_string(),
        ]
    };
    team.iter()
        .map(|entry| row(entry, ROLE_STAFF))
        .chain(
            students
                .iter()
                .filter(|entry| !team_usernames.contains(entry.username.as_str()))
                .map(|entry| row(entry, ROLE_STUDENT)),
        )
        .collect()
}

pub fn report_name(course_key: &CourseKey, generated_at: DateTime<Utc>) -> String {
    format!(
        "{}_Reporte_Roles_{}.csv",
        course_key.filename_prefix(),
        generated_at.format("%Y-%m-%d-%H%M")
    )
}

pub fn render_csv(rows: &[[String; 4]]) -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(REPORT_HEADER)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    Ok(wtr.into_inner()?)
}

/// Task output recorded once the report is uploaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportProgress {
    pub action_name: String,
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub total: u32,
    pub duration_ms: u64,
    pub step: String,
    pub report_name: String,
}

pub async fn generate_user_roles_report(
    roster: &dyn RosterSource,
    store: &dyn ArtifactStore,
    course_key: &CourseKey,
    generated_at: DateTime<Utc>,
) -> Result<ReportProgress> {
    let started = Instant::now();
    info!(course = %course_key, "CMMAPI Student Role - Calculating students data");
    let team = roster.course_team(course_key).await?;
    let students = roster.active_enrollments(course_key).await?;
    let rows = role_rows(&team, &students);

    let name = report_name(course_key, generated_at);
    info!(course = %course_key, report = %name, "CMMAPI Student Role - Uploading CSV");
    store.store(course_key, &name, render_csv(&rows)?).await?;

    Ok(ReportProgress {
        action_name: "generated".to_string(),
        attempted: 1,
        succeeded: 1,
        failed: 0,
        total: 1,
        duration_ms: started.elapsed().as_millis() as u64,
        step: "CMMAPI Student Role - CSV uploaded".to_string(),
        report_name: name,
    })
}
