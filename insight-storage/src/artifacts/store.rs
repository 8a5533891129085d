use std::path::PathBuf;

use insight_core::{Result, TaskId};

use super::version::VersionRegistry;

/// Filesystem store for versioned artifact blobs. Versions are additive:
/// a new save always allocates the next number, existing files are never
/// rewritten.
///
/// Allocation is a directory scan and is not safe against concurrent saves
/// of the same name; the deployment runs one worker process with one task
/// at a time, which serializes all writes.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    registry: VersionRegistry,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            registry: VersionRegistry::new(root),
        }
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    /// Allocate the next version for `name` and write the blob. The
    /// namespace directory is created here, on first write, not on reads.
    pub async fn save(
        &self,
        name: &str,
        scope: Option<&TaskId>,
        bytes: &[u8],
    ) -> Result<(u32, PathBuf)> {
        let dir = self.registry.namespace_dir(scope);
        tokio::fs::create_dir_all(&dir).await?;

        let version = self.registry.next_version(name, scope)?;
        let path = self.registry.artifact_path(name, version, scope);
        tokio::fs::write(&path, bytes).await?;

        tracing::info!(
            artifact = name,
            version,
            path = %path.display(),
            "saved artifact"
        );
        Ok((version, path))
    }

    /// Read an artifact's bytes; `version: None` means latest. Absent
    /// artifacts surface as NotFound from the registry.
    pub async fn load(
        &self,
        name: &str,
        version: Option<u32>,
        scope: Option<&TaskId>,
    ) -> Result<Vec<u8>> {
        let path = self.registry.resolve_path(name, version, scope)?;
        Ok(tokio::fs::read(&path).await?)
    }
}
