// Report file storage

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::keys::CourseKey;

pub mod report_store;

pub use report_store::*;

/// A stored report and where it can be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLink {
    pub name: String,
    pub url: String,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Reports stored for a course, newest first.
    async fn links_for(&self, course_key: &CourseKey) -> Result<Vec<ArtifactLink>>;

    async fn store(&self, course_key: &CourseKey, name: &str, content: Vec<u8>) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct InMemoryArtifactStore {
    inner: Arc<RwLock<HashMap<String, Vec<(ArtifactLink, Vec<u8>)>>>>,
}

impl InMemoryArtifactStore {
    pub async fn add_link(&self, course_key: &CourseKey, name: &str, url: &str) {
        let link = ArtifactLink { name: name.to_string(), url: url.to_string() };
        let mut guard = self.inner.write().await;
        guard.entry(course_key.to_string()).or_default().insert(0, (link, Vec::new()));
    }

    pub async fn content(&self, course_key: &CourseKey, name: &str) -> Option<Vec<u8>> {
        let guard = self.inner.read().await;
        guard
            .get(&course_key.to_string())?
            .iter()
            .find(|(link, _)| link.name == name)
            .map(|(_, content)| content.clone())
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn links_for(&self, course_key: &CourseKey) -> Result<Vec<ArtifactLink>> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(&course_key.to_string())
            .map(|entries| entries.iter().map(|(link, _)| link.clone()).collect())
            .unwrap_or_default())
    }

    async fn store(&self, course_key: &CourseKey, name: &str, content: Vec<u8>) -> Result<()> {
        let link = ArtifactLink { name: name.to_string(), url: format!("memory://{}/{}", course_key, name) };
        let mut guard = self.inner.write().await;
        let entries = guard.entry(course_key.to_string()).or_default();
        entries.retain(|(existing, _)| existing.name != name);
        entries.insert(0, (link, content));
        Ok(())
    }
}
