//! 内容存储
//!
//! 上传文件的本地文件系统存储。写入在对外可见之前完成fsync，
//! 读者永远不会看到半写文件。

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use mia_core::ports::ContentStore;
use mia_core::{ArchiveError, Result};

/// 同名文件的覆盖策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// 第二次写入同名文件直接拒绝
    Reject,
    /// 临时文件加原子重命名替换旧内容；并发同名写入在重命名处串行化
    Replace,
}

/// 本地文件系统内容存储
#[derive(Debug)]
pub struct LocalContentStore {
    root: PathBuf,
    policy: OverwritePolicy,
}

impl LocalContentStore {
    pub fn new(root: impl Into<PathBuf>, policy: OverwritePolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    /// 确保存储根目录存在
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// 存储名必须是单纯的文件名，不接受路径成分
    fn target_path(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        let is_plain = matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(_)), None)
        );
        if name.is_empty() || !is_plain {
            return Err(ArchiveError::Storage(format!(
                "invalid storage name '{name}'"
            )));
        }
        Ok(self.root.join(name))
    }

    async fn write_durably(file: &mut tokio::fs::File, data: &[u8]) -> std::io::Result<()> {
        file.write_all(data).await?;
        file.sync_all().await
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn put(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let target = self.target_path(name)?;

        match self.policy {
            OverwritePolicy::Reject => {
                let mut file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&target)
                    .await
                    .map_err(|e| {
                        ArchiveError::Storage(format!("create '{}': {e}", target.display()))
                    })?;
                Self::write_durably(&mut file, data).await.map_err(|e| {
                    ArchiveError::Storage(format!("write '{}': {e}", target.display()))
                })?;
            }
            OverwritePolicy::Replace => {
                let tmp = self
                    .root
                    .join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));
                let mut file = tokio::fs::File::create(&tmp).await.map_err(|e| {
                    ArchiveError::Storage(format!("create '{}': {e}", tmp.display()))
                })?;
                if let Err(e) = Self::write_durably(&mut file, data).await {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(ArchiveError::Storage(format!(
                        "write '{}': {e}",
                        target.display()
                    )));
                }
                drop(file);
                tokio::fs::rename(&tmp, &target).await.map_err(|e| {
                    ArchiveError::Storage(format!("promote '{}': {e}", target.display()))
                })?;
            }
        }

        tracing::debug!(name, bytes = data.len(), "stored upload content");
        Ok(target)
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn get(&self, path: &Path) -> Result<Vec<u8>> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ArchiveError::NotFound(
                format!("stored file '{}'", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir, policy: OverwritePolicy) -> LocalContentStore {
        LocalContentStore::new(dir.path(), policy)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, OverwritePolicy::Replace);

        let path = store.put("scan001.dcm", b"dicom-bytes").await.unwrap();
        assert!(store.exists(&path).await);
        assert_eq!(store.get(&path).await.unwrap(), b"dicom-bytes");
    }

    #[tokio::test]
    async fn test_get_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, OverwritePolicy::Replace);

        let missing = dir.path().join("absent.dcm");
        assert!(!store.exists(&missing).await);
        match store.get(&missing).await {
            Err(ArchiveError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_second_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, OverwritePolicy::Reject);

        store.put("scan001.dcm", b"first").await.unwrap();
        assert!(store.put("scan001.dcm", b"second").await.is_err());

        let path = dir.path().join("scan001.dcm");
        assert_eq!(store.get(&path).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_replace_policy_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, OverwritePolicy::Replace);

        store.put("scan001.dcm", b"first").await.unwrap();
        let path = store.put("scan001.dcm", b"second").await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), b"second");

        // 替换写入不留下临时文件
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_path_components_in_name_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, OverwritePolicy::Replace);

        assert!(store.put("../escape.dcm", b"x").await.is_err());
        assert!(store.put("a/b.dcm", b"x").await.is_err());
        assert!(store.put("..", b"x").await.is_err());
        assert!(store.put("", b"x").await.is_err());
    }
}
