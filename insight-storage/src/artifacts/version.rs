use std::path::{Path, PathBuf};

use insight_core::{CoreError, Result, TaskId};

/// File extension for serialized artifacts.
pub const ARTIFACT_EXT: &str = "bin";

/// Parse the version number out of an artifact file name.
///
/// Canonical rule: the extension is stripped first, and the remaining stem
/// must be exactly `{name}_v{digits}`. `model_v3.bin` parses as 3 for
/// `model`; `model_vX.bin`, `model_v3.tmp.bin` (stem `model_v3.tmp`) and
/// `other_v3.bin` do not parse. Corrupt or foreign files are skipped by the
/// caller, never fatal.
pub fn parse_version(artifact_name: &str, file_name: &str) -> Option<u32> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    let suffix = stem.strip_prefix(artifact_name)?.strip_prefix("_v")?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Resolves and allocates version numbers for named artifacts stored as
/// `{root}/{name}_v{N}.bin`, or `{root}/{task_id}/{name}_v{N}.bin` when
/// scoped to a task.
///
/// Version allocation is a directory scan with no locking; it is only safe
/// under the single-worker deployment. A concurrent deployment must add a
/// per-name lock or a monotonic counter in the durable store first.
#[derive(Debug, Clone)]
pub struct VersionRegistry {
    root: PathBuf,
}

impl VersionRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Namespace directory for a lookup. Not created here; directory
    /// creation is lazy and happens on first write only.
    pub fn namespace_dir(&self, scope: Option<&TaskId>) -> PathBuf {
        match scope {
            Some(task_id) => self.root.join(task_id.to_string()),
            None => self.root.clone(),
        }
    }

    /// Existing versions for a name, ascending. An absent namespace
    /// directory reads as "no versions", not an error.
    pub fn list_versions(&self, name: &str, scope: Option<&TaskId>) -> Result<Vec<u32>> {
        let dir = self.namespace_dir(scope);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            // A zero-byte file is a write the process died in the middle
            // of; treat it as absent.
            match entry.metadata() {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {}
                _ => continue,
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(version) = parse_version(name, file_name) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Next version to allocate: 1 + max(existing), or 1 when none exist.
    pub fn next_version(&self, name: &str, scope: Option<&TaskId>) -> Result<u32> {
        let versions = self.list_versions(name, scope)?;
        Ok(versions.last().map_or(1, |max| max + 1))
    }

    /// Latest existing version, or NotFound when the name has none.
    pub fn latest_version(&self, name: &str, scope: Option<&TaskId>) -> Result<u32> {
        self.list_versions(name, scope)?
            .last()
            .copied()
            .ok_or_else(|| CoreError::NotFound(format!("no versions of artifact: {name}")))
    }

    pub fn artifact_path(&self, name: &str, version: u32, scope: Option<&TaskId>) -> PathBuf {
        self.namespace_dir(scope)
            .join(format!("{name}_v{version}.{ARTIFACT_EXT}"))
    }

    /// Path of an artifact. With an explicit version the file must exist;
    /// without one the latest version is picked. Either way an absent
    /// artifact is a NotFound error, never a speculative path.
    pub fn resolve_path(
        &self,
        name: &str,
        version: Option<u32>,
        scope: Option<&TaskId>,
    ) -> Result<PathBuf> {
        let version = match version {
            Some(version) => {
                if !self.list_versions(name, scope)?.contains(&version) {
                    return Err(CoreError::NotFound(format!(
                        "artifact {name} has no version {version}"
                    )));
                }
                version
            }
            None => self.latest_version(name, scope)?,
        };
        Ok(self.artifact_path(name, version, scope))
    }
}
