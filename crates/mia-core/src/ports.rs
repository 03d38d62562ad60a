//! 组件边界接口
//!
//! 摄取编排器通过这些接口与内容存储、元数据提取器和层级仓库交互；
//! 实现位于各自的基础设施crate中。

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::models::{DicomMetadata, IngestOutcome, IngestRecord};
use crate::Result;

/// 内容存储接口
///
/// 原始文件字节的持久存储；从摄取管线的角度是只追加的。
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// 以给定名称完整持久化一份字节内容，返回最终存储路径
    ///
    /// 返回时内容必须已完整落盘，读者不可能观察到半写文件。
    async fn put(&self, name: &str, data: &[u8]) -> Result<PathBuf>;

    /// 判断路径下是否存在已存储的文件
    async fn exists(&self, path: &Path) -> bool;

    /// 读取已存储文件的全部字节
    async fn get(&self, path: &Path) -> Result<Vec<u8>>;
}

/// 元数据提取器接口
///
/// 以已存储文件的绝对路径调用外部工具，换取一条完整的元数据记录。
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<DicomMetadata>;
}

/// 层级仓库接口
///
/// 在单个事务内对 Modality、Patient、Study、Series、File 逐级
/// find-or-create，全部成功才提交。
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    async fn commit_ingest(&self, record: &IngestRecord) -> Result<IngestOutcome>;
}
