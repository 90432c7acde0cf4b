use std::path::{Path, PathBuf};

/// pipeline cache blob 在磁盘上的位置
///
/// 读取失败视为没有缓存；写入失败只记录日志，不影响渲染
#[derive(Debug, Clone)]
pub struct PipelineCacheStore {
    path: PathBuf,
}

impl PipelineCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<Vec<u8>> {
        match std::fs::read(&self.path) {
            Ok(data) if !data.is_empty() => {
                log::info!("pipeline cache loaded: {} bytes from {}", data.len(), self.path.display());
                Some(data)
            }
            Ok(_) => None,
            Err(e) => {
                log::info!("no pipeline cache at {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn store(&self, data: &[u8]) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("failed to create pipeline cache dir {}: {}", parent.display(), e);
                return;
            }
        }
        match std::fs::write(&self.path, data) {
            Ok(()) => log::info!("pipeline cache stored: {} bytes to {}", data.len(), self.path.display()),
            Err(e) => log::warn!("failed to store pipeline cache to {}: {}", self.path.display(), e),
        }
    }
}
