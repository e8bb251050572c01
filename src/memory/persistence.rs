//! 会话快照持久化
//!
//! 将 snapshotState() 的结果写入/从 JSON 文件加载，用于跨进程恢复会话（可选使用）。

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::core::SessionSnapshot;

/// 单文件 JSON 快照
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在时返回 None
    pub fn load(&self) -> anyhow::Result<Option<SessionSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read snapshot {}", self.path.display()))?;
        let snapshot = serde_json::from_str(&data)
            .with_context(|| format!("Invalid snapshot {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    /// 写入快照；父目录不存在时自动创建。先写临时文件再 rename，避免留下半个文件
    pub fn save(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move snapshot to {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), cycle = snapshot.cycle, "Snapshot saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdi::desire::DesireRegistry;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("none.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_creates_parent_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state/session.json"));
        let snapshot = SessionSnapshot {
            cycle: 7,
            desires: DesireRegistry::from_texts(["a", "b"]),
            ..Default::default()
        };
        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.cycle, 7);
        assert_eq!(loaded.desires.len(), 2);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SnapshotStore::new(&path).load().is_err());
    }
}
