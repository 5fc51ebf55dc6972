// Filesystem report store

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use super::{ArtifactLink, ArtifactStore};
use crate::keys::CourseKey;

/// Stores reports under `<root>/<sha256(course id)>/<name>` and links them
/// as `<base_url>/<sha256(course id)>/<name>`.
#[derive(Debug, Clone)]
pub struct LocalReportStore {
    root: PathBuf,
    base_url: String,
}

impl LocalReportStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self { root: root.into(), base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn course_dir_name(course_key: &CourseKey) -> String {
        hex::encode(Sha256::digest(course_key.to_string().as_bytes()))
    }

    pub fn path_to(&self, course_key: &CourseKey, name: &str) -> PathBuf {
        self.root.join(Self::course_dir_name(course_key)).join(name)
    }
}

#[async_trait]
impl ArtifactStore for LocalReportStore {
    async fn links_for(&self, course_key: &CourseKey) -> Result<Vec<ArtifactLink>> {
        let dir_name = Self::course_dir_name(course_key);
        let dir = self.root.join(&dir_name);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
        };

        let mut files: Vec<(SystemTime, String)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            files.push((metadata.modified()?, name));
        }
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        Ok(files
            .into_iter()
            .map(|(_, name)| ArtifactLink {
                url: format!("{}/{}/{}", self.base_url, dir_name, name),
                name,
            })
            .collect())
    }

    async fn store(&self, course_key: &CourseKey, name: &str, content: Vec<u8>) -> Result<()> {
        let path = self.path_to(course_key, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await.with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), "Report stored");
        Ok(())
    }
}
