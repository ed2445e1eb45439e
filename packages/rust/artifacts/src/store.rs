//! Versioned artifact storage.
//!
//! Artifacts are addressed by `(app, user, session, filename)` and every save
//! creates a new immutable version. [`FsArtifactStore`] lays them out as
//! `<root>/<app>/<user>/<session>/<filename>/<version>` with a `.sha256`
//! sidecar next to each version, checked on every load.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use variantflow_shared::{Result, TaskContext, VariantFlowError};

/// Address of an artifact, independent of version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub filename: String,
}

impl ArtifactKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            filename: filename.into(),
        }
    }

    /// Key for `filename` inside a task's session.
    pub fn for_task(context: &TaskContext, filename: impl Into<String>) -> Self {
        Self::new(
            &context.app_name,
            &context.user_id,
            &context.session_id,
            filename,
        )
    }

    fn components(&self) -> [(&'static str, &str); 4] {
        [
            ("app_name", &self.app_name),
            ("user_id", &self.user_id),
            ("session_id", &self.session_id),
            ("filename", &self.filename),
        ]
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.app_name, self.user_id, self.session_id, self.filename
        )
    }
}

/// Blob storage the pipeline stages hand their results through.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Latest version of the artifact, or [`VariantFlowError::NotFound`].
    async fn load(&self, key: &ArtifactKey) -> Result<Vec<u8>>;

    /// Store a new version and return its number (first save is version 0).
    async fn save(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<u64>;
}

/// Filesystem-backed [`ArtifactStore`].
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create the store, making `root` if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| VariantFlowError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, key: &ArtifactKey) -> Result<PathBuf> {
        let mut dir = self.root.clone();
        for (name, value) in key.components() {
            if value.is_empty()
                || value == "."
                || value == ".."
                || value.contains(['/', '\\'])
            {
                return Err(VariantFlowError::validation(format!(
                    "invalid artifact {name}: {value:?}"
                )));
            }
            dir.push(value);
        }
        Ok(dir)
    }

    /// All stored version numbers, ascending.
    pub async fn versions(&self, key: &ArtifactKey) -> Result<Vec<u64>> {
        let dir = self.artifact_dir(key)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VariantFlowError::io(&dir, e)),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| VariantFlowError::io(&dir, e))?
        {
            if let Some(v) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    #[instrument(skip_all, fields(artifact = %key))]
    async fn load(&self, key: &ArtifactKey) -> Result<Vec<u8>> {
        let dir = self.artifact_dir(key)?;
        let version = self
            .versions(key)
            .await?
            .pop()
            .ok_or_else(|| VariantFlowError::not_found(format!("artifact {key}")))?;

        let path = dir.join(version.to_string());
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| VariantFlowError::io(&path, e))?;

        let sidecar = dir.join(format!("{version}.sha256"));
        let expected = tokio::fs::read_to_string(&sidecar)
            .await
            .map_err(|e| VariantFlowError::io(&sidecar, e))?;
        let actual = sha256_hex(&bytes);
        if expected.trim() != actual {
            return Err(VariantFlowError::validation(format!(
                "artifact {key} v{version} failed checksum verification"
            )));
        }

        debug!(version, size = bytes.len(), "loaded artifact");
        Ok(bytes)
    }

    #[instrument(skip_all, fields(artifact = %key, size = bytes.len()))]
    async fn save(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<u64> {
        let dir = self.artifact_dir(key)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| VariantFlowError::io(&dir, e))?;

        let version = self
            .versions(key)
            .await?
            .last()
            .map_or(0, |v| v + 1);

        let target = dir.join(version.to_string());
        let temp = dir.join(format!(".{version}.tmp"));

        // Write to temp file first, then rename into place
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| VariantFlowError::io(&temp, e))?;

        let sidecar = dir.join(format!("{version}.sha256"));
        tokio::fs::write(&sidecar, sha256_hex(bytes))
            .await
            .map_err(|e| VariantFlowError::io(&sidecar, e))?;

        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|e| VariantFlowError::io(&target, e))?;

        debug!(version, "saved artifact");
        Ok(version)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> FsArtifactStore {
        let dir = std::env::temp_dir().join(format!(
            "vf-artifacts-test-{}",
            uuid::Uuid::now_v7()
        ));
        FsArtifactStore::open(dir).expect("open store")
    }

    fn key(filename: &str) -> ArtifactKey {
        ArtifactKey::new("variantflow", "user-1", "session-1", filename)
    }

    #[tokio::test]
    async fn save_then_load_latest() {
        let store = temp_store();
        let k = key("variants.json");

        assert_eq!(store.save(&k, b"first").await.unwrap(), 0);
        assert_eq!(store.save(&k, b"second").await.unwrap(), 1);

        assert_eq!(store.load(&k).await.unwrap(), b"second");
        assert_eq!(store.versions(&k).await.unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let store = temp_store();
        let err = store.load(&key("absent.json")).await.unwrap_err();
        assert!(matches!(err, VariantFlowError::NotFound(_)));
    }

    #[tokio::test]
    async fn tampered_artifact_fails_checksum() {
        let store = temp_store();
        let k = key("annotations.json");
        store.save(&k, b"{\"ok\":true}").await.unwrap();

        let path = store
            .root()
            .join("variantflow/user-1/session-1/annotations.json/0");
        std::fs::write(&path, b"{\"ok\":false}").unwrap();

        let err = store.load(&k).await.unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[tokio::test]
    async fn path_components_are_validated() {
        let store = temp_store();
        let err = store
            .save(&ArtifactKey::new("app", "..", "s", "f"), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, VariantFlowError::Validation { .. }));

        let err = store
            .save(&ArtifactKey::new("app", "u", "s", "a/b"), b"x")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("filename"));
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let store = temp_store();
        let k = key("x.json");
        store.save(&k, b"data").await.unwrap();

        let dir = store.root().join("variantflow/user-1/session-1/x.json");
        let leftovers: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
