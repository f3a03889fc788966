use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Result, SurfaceError};
use crate::traits::{AgentSurface, SurfaceProvider, TriggerChannel};

// ---------------------------------------------------------------------------
// FileSurface
// ---------------------------------------------------------------------------

/// File-backed agent surface: one directory per agent.
///
/// Layout inside the agent directory:
/// - `rendered.txt`  — the agent's current rendered output (read).
/// - `generating`    — marker file; present while the agent is generating.
/// - `inbox.txt`     — submissions are appended here, one per line block.
///
/// An external bridge process (browser extension, log tailer, whatever
/// actually talks to the agent) keeps these files current. A missing
/// agent directory means the bridge is gone and the surface is
/// unreachable.
pub struct FileSurface {
    name: String,
    dir: PathBuf,
}

impl FileSurface {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    fn rendered_path(&self) -> PathBuf {
        self.dir.join("rendered.txt")
    }

    fn generating_path(&self) -> PathBuf {
        self.dir.join("generating")
    }

    fn inbox_path(&self) -> PathBuf {
        self.dir.join("inbox.txt")
    }

    fn check_dir(&self) -> Result<()> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(SurfaceError::Unreachable(format!(
                "surface directory missing for {}: {}",
                self.name,
                self.dir.display()
            )))
        }
    }
}

#[async_trait]
impl AgentSurface for FileSurface {
    fn agent_name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, text: &str) -> Result<()> {
        self.check_dir()?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.inbox_path())
            .await
            .map_err(|e| SurfaceError::Io(format!("open inbox for {}: {e}", self.name)))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| SurfaceError::Io(format!("append inbox for {}: {e}", self.name)))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| SurfaceError::Io(format!("append inbox for {}: {e}", self.name)))?;
        file.flush()
            .await
            .map_err(|e| SurfaceError::Io(format!("append inbox for {}: {e}", self.name)))?;
        debug!(agent = %self.name, bytes = text.len(), "submitted to inbox");
        Ok(())
    }

    async fn read_rendered(&self) -> Result<String> {
        self.check_dir()?;
        match tokio::fs::read_to_string(self.rendered_path()).await {
            Ok(text) => Ok(text),
            // No rendered output yet is a legitimate empty observation.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(SurfaceError::Io(format!(
                "read rendered for {}: {e}",
                self.name
            ))),
        }
    }

    async fn is_generating(&self) -> Result<bool> {
        self.check_dir()?;
        Ok(tokio::fs::try_exists(self.generating_path())
            .await
            .unwrap_or(false))
    }

    async fn is_reachable(&self) -> bool {
        self.dir.is_dir()
    }
}

// ---------------------------------------------------------------------------
// FileChannel
// ---------------------------------------------------------------------------

/// File-backed trigger channel: a single shared text file, read whole
/// and replaced whole (the clipboard analog of the original setup).
pub struct FileChannel {
    path: PathBuf,
}

impl FileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TriggerChannel for FileChannel {
    async fn read(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(SurfaceError::Io(format!(
                "read channel {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SurfaceError::Io(format!("create channel dir: {e}")))?;
        }
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| SurfaceError::Io(format!("write channel {}: {e}", self.path.display())))
    }
}

// ---------------------------------------------------------------------------
// FileSurfaceProvider
// ---------------------------------------------------------------------------

/// Opens [`FileSurface`]s under a common root, creating each agent's
/// directory on first open so a fresh install is immediately usable.
pub struct FileSurfaceProvider {
    root: PathBuf,
}

impl FileSurfaceProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SurfaceProvider for FileSurfaceProvider {
    async fn open(&self, agent: &str) -> Result<Arc<dyn AgentSurface>> {
        let dir = self.root.join(agent);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SurfaceError::Unreachable(format!("create surface dir for {agent}: {e}")))?;
        Ok(Arc::new(FileSurface::new(agent, dir)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provider_creates_dir_and_surface_reads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = FileSurfaceProvider::new(tmp.path());

        let surface = provider.open("Gemini").await.unwrap();
        assert_eq!(surface.agent_name(), "Gemini");
        assert!(surface.is_reachable().await);
        assert_eq!(surface.read_rendered().await.unwrap(), "");
        assert!(!surface.is_generating().await.unwrap());
    }

    #[tokio::test]
    async fn rendered_and_generating_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ChatGPT");
        std::fs::create_dir_all(&dir).unwrap();
        let surface = FileSurface::new("ChatGPT", &dir);

        std::fs::write(dir.join("rendered.txt"), "hello world").unwrap();
        assert_eq!(surface.read_rendered().await.unwrap(), "hello world");

        std::fs::write(dir.join("generating"), "").unwrap();
        assert!(surface.is_generating().await.unwrap());
        std::fs::remove_file(dir.join("generating")).unwrap();
        assert!(!surface.is_generating().await.unwrap());
    }

    #[tokio::test]
    async fn submit_appends_to_inbox() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("Deepseek");
        std::fs::create_dir_all(&dir).unwrap();
        let surface = FileSurface::new("Deepseek", &dir);

        surface.submit("first").await.unwrap();
        surface.submit("second").await.unwrap();

        let inbox = std::fs::read_to_string(dir.join("inbox.txt")).unwrap();
        assert_eq!(inbox, "first\nsecond\n");
    }

    #[tokio::test]
    async fn missing_dir_is_unreachable() {
        let tmp = tempfile::tempdir().unwrap();
        let surface = FileSurface::new("Ghost", tmp.path().join("gone"));

        assert!(!surface.is_reachable().await);
        assert!(matches!(
            surface.read_rendered().await,
            Err(SurfaceError::Unreachable(_))
        ));
        assert!(matches!(
            surface.submit("x").await,
            Err(SurfaceError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn channel_read_write() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = FileChannel::new(tmp.path().join("channel.txt"));

        assert_eq!(channel.read().await.unwrap(), "");
        channel.write("Gemini: hello").await.unwrap();
        assert_eq!(channel.read().await.unwrap(), "Gemini: hello");
        channel.write("replaced").await.unwrap();
        assert_eq!(channel.read().await.unwrap(), "replaced");
    }
}
