use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// 单个任务独占的临时目录，析构时自动清理
///
/// 目录结构: `<root>/video-annotate/<uuid>/`，并发任务之间互不干扰。
#[derive(Debug)]
pub struct JobWorkspace {
    dir: PathBuf,
}

impl JobWorkspace {
    pub fn create(root: impl AsRef<Path>) -> io::Result<Self> {
        let dir = root
            .as_ref()
            .join("video-annotate")
            .join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("⚠️  清理临时目录失败: {} - {}", self.dir.display(), e);
            }
        }
    }
}
