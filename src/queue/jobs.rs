// Job kinds and the data attached to a submission

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::CourseSummary;
use crate::config::Locale;
use crate::keys::{CourseKey, UsageKey};
use crate::models::Requester;

/// Status returned when an equivalent job is still in flight.
pub const ALREADY_RUNNING: &str = "Already Running Task";

/// Student profile columns used when none are configured.
pub const DEFAULT_PROFILE_FEATURES: [&str; 15] = [
    "id",
    "username",
    "name",
    "email",
    "language",
    "location",
    "year_of_birth",
    "gender",
    "level_of_education",
    "mailing_address",
    "goals",
    "enrollment_mode",
    "verification_status",
    "last_login",
    "date_joined",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    StudentProfile,
    Ora2Export,
    ProblemResponses,
    UserRoles,
}

impl JobKind {
    pub const ALL: [JobKind; 4] =
        [JobKind::StudentProfile, JobKind::Ora2Export, JobKind::ProblemResponses, JobKind::UserRoles];

    /// Tag stored as the task type in the job runner.
    pub fn task_type(self) -> &'static str {
        match self {
            JobKind::StudentProfile => "cmmapi_profile_info_csv",
            JobKind::Ora2Export => "cmmapi_export_ora2_data",
            JobKind::ProblemResponses => "cmmapi_problem_responses_csv",
            JobKind::UserRoles => "cmmapi_student_data",
        }
    }

    pub fn from_task_type(task_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.task_type() == task_type)
    }

    pub fn all_task_types() -> Vec<&'static str> {
        Self::ALL.iter().map(|kind| kind.task_type()).collect()
    }

    pub fn dedup_prefix(self) -> &'static str {
        match self {
            JobKind::StudentProfile => "CMM-API-STUDENT-PROFILE",
            JobKind::Ora2Export => "CMM-API-ORA2-REPORT",
            JobKind::ProblemResponses => "CMM-API-PROBLEM-REPORT",
            JobKind::UserRoles => "CMM-API-STUDENT-DATA",
        }
    }

    /// Name of the task implementation the worker runs.
    pub fn task_class(self) -> &'static str {
        match self {
            JobKind::StudentProfile => "lms.djangoapps.instructor_task.tasks.calculate_students_features_csv",
            JobKind::Ora2Export => "lms.djangoapps.instructor_task.tasks.export_ora2_data",
            JobKind::ProblemResponses => {
                "lms.djangoapps.instructor_task.tasks.calculate_problem_responses_csv"
            }
            JobKind::UserRoles => "cmm_report_api.user_roles",
        }
    }

    /// Whether the report file is produced by the host's workers rather than ours.
    pub fn generated_by_host(self) -> bool {
        !matches!(self, JobKind::UserRoles)
    }

    pub fn created_message(self, locale: Locale) -> &'static str {
        match (locale, self) {
            (Locale::Es, JobKind::StudentProfile) => "El reporte Perfil de estudiantes está siendo creado.",
            (Locale::Es, JobKind::Ora2Export) => "El reporte ORA2 está siendo creado.",
            (Locale::Es, JobKind::ProblemResponses) => "El reporte Problem Responses está siendo creado.",
            (Locale::Es, JobKind::UserRoles) => "El reporte Rol Usuarios está siendo creado.",
            (Locale::En, JobKind::StudentProfile) => "The student profile report is being created.",
            (Locale::En, JobKind::Ora2Export) => "The ORA2 report is being created.",
            (Locale::En, JobKind::ProblemResponses) => "The problem responses report is being created.",
            (Locale::En, JobKind::UserRoles) => "The user roles report is being created.",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::StudentProfile => write!(f, "student-profile"),
            JobKind::Ora2Export => write!(f, "ora2-export"),
            JobKind::ProblemResponses => write!(f, "problem-responses"),
            JobKind::UserRoles => write!(f, "user-roles"),
        }
    }
}

/// Key the job runner uses to refuse a duplicate of an in-flight job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(kind: JobKind, course_key: &CourseKey) -> Self {
        DedupKey(format!("{}-{}", kind.dedup_prefix(), course_key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSubject {
    Course(CourseKey),
    Block(UsageKey),
}

impl JobSubject {
    /// The course a job is deduplicated and filed under.
    pub fn course_key(&self) -> &CourseKey {
        match self {
            JobSubject::Course(key) => key,
            JobSubject::Block(key) => key.course_key(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub kind: JobKind,
    pub subject: JobSubject,
    pub requester: Requester,
}

impl JobRequest {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(self.kind, self.subject.course_key())
    }
}

/// Student profile columns for a course: the configured (or default) list,
/// then cohort and team when they apply, with city and country always last.
pub fn profile_features(configured: &[String], course: Option<&CourseSummary>) -> Vec<String> {
    let mut features: Vec<String> = if configured.is_empty() {
        DEFAULT_PROFILE_FEATURES.iter().map(|f| f.to_string()).collect()
    } else {
        configured.to_vec()
    };
    if let Some(course) = course {
        if course.cohorted {
            features.push("cohort".to_string());
        }
        if course.teams_enabled {
            features.push("team".to_string());
        }
    }
    features.push("city".to_string());
    features.push("country".to_string());
    features
}

/// Message handed to a worker once a task record exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub entry_id: i64,
    pub task_id: String,
    pub task_type: String,
    pub task_class: String,
    pub course_id: String,
    pub task_input: serde_json::Value,
    pub requester: Requester,
}

impl TaskMessage {
    pub fn kind(&self) -> Option<JobKind> {
        JobKind::from_task_type(&self.task_type)
    }
}
