//! Publishing test videos under the dashboard's public directory

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// URL prefix and directory name for published artifacts.
pub const ARTIFACTS_DIR: &str = "test-artifacts";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    public_dir: PathBuf,
}

/// Replace everything outside `[A-Za-z0-9]` with `-`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

impl ArtifactStore {
    pub fn new(public_dir: impl Into<PathBuf>) -> Self {
        Self {
            public_dir: public_dir.into(),
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.public_dir.join(ARTIFACTS_DIR).join(run_id)
    }

    fn video_file_name(test_name: &str) -> String {
        let suffix: [u8; 4] = rand::random();
        format!(
            "video-{}-{}-{}.webm",
            sanitize(test_name),
            chrono::Utc::now().timestamp_millis(),
            hex::encode(suffix)
        )
    }

    /// Copy a recorded video and return its public URL. Failures are logged
    /// and yield `None`; a missing video never fails a test.
    pub async fn store_video(&self, run_id: &str, test_name: &str, source: &Path) -> Option<String> {
        let dir = self.run_dir(run_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(run_id, "Could not create {}: {}", dir.display(), e);
            return None;
        }

        let file_name = Self::video_file_name(test_name);
        let dest = dir.join(&file_name);
        match tokio::fs::copy(source, &dest).await {
            Ok(bytes) => {
                debug!(run_id, "Stored video {} ({} bytes)", dest.display(), bytes);
                Some(format!("/{}/{}/{}", ARTIFACTS_DIR, run_id, file_name))
            }
            Err(e) => {
                warn!(run_id, "Could not copy video {}: {}", source.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("adds an item (x2)"), "adds-an-item--x2-");
        assert_eq!(sanitize("Größe"), "Gr--e");
    }

    #[tokio::test]
    async fn test_store_video() {
        let public = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("video.webm");
        std::fs::write(&source, b"webm").unwrap();

        let store = ArtifactStore::new(public.path());
        let url = store.store_video("run-1", "adds an item", &source).await.unwrap();
        assert!(url.starts_with("/test-artifacts/run-1/video-adds-an-item-"));
        assert!(url.ends_with(".webm"));

        let file_name = url.rsplit('/').next().unwrap();
        let stored = store.run_dir("run-1").join(file_name);
        assert_eq!(std::fs::read(stored).unwrap(), b"webm");
    }

    #[tokio::test]
    async fn test_store_missing_video_is_none() {
        let public = TempDir::new().unwrap();
        let store = ArtifactStore::new(public.path());
        let url = store
            .store_video("run-1", "t", Path::new("/no/such/video.webm"))
            .await;
        assert!(url.is_none());
    }
}
