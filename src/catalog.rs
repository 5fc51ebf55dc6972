//! Lookup of courses known to the host platform.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::keys::{CourseKey, InvalidKeyError};

/// What the report endpoints need to know about a course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseSummary {
    pub key: CourseKey,
    pub cohorted: bool,
    pub teams_enabled: bool,
}

impl CourseSummary {
    pub fn new(key: CourseKey) -> Self {
        Self { key, cohorted: false, teams_enabled: false }
    }
}

#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn exists(&self, key: &CourseKey) -> Result<bool>;

    async fn course(&self, key: &CourseKey) -> Result<Option<CourseSummary>>;
}

#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    inner: Arc<RwLock<HashMap<String, CourseSummary>>>,
}

impl InMemoryCatalog {
    /// Catalog holding the given course ids, with default course settings.
    pub fn from_course_ids(ids: &[String]) -> Result<Self, InvalidKeyError> {
        let courses = ids
            .iter()
            .map(|id| {
                let key = CourseKey::parse(id)?;
                Ok((key.to_string(), CourseSummary::new(key)))
            })
            .collect::<Result<HashMap<_, _>, InvalidKeyError>>()?;
        Ok(Self { inner: Arc::new(RwLock::new(courses)) })
    }

    pub async fn insert(&self, course: CourseSummary) {
        let mut guard = self.inner.write().await;
        guard.insert(course.key.to_string(), course);
    }
}

#[async_trait]
impl CourseCatalog for InMemoryCatalog {
    async fn exists(&self, key: &CourseKey) -> Result<bool> {
        let guard = self.inner.read().await;
        Ok(guard.contains_key(&key.to_string()))
    }

    async fn course(&self, key: &CourseKey) -> Result<Option<CourseSummary>> {
        let guard = self.inner.read().await;
        Ok(guard.get(&key.to_string()).cloned())
    }
}
