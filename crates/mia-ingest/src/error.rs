//! 摄取失败分类

use thiserror::Error;

/// 单次摄取的终态失败
///
/// 三类失败都对本次调用终结；重试是一次全新调用。
#[derive(Error, Debug)]
pub enum IngestError {
    /// 原始字节持久化失败，未写入任何行
    #[error("文件存储失败: {0}")]
    StoreFailed(String),

    /// 外部工具未能产出完整合法的元数据；已存储的文件保留用于诊断
    #[error("元数据提取失败: {0}")]
    ExtractFailed(String),

    /// 层级事务失败并已整体回滚，任何部分子集都不会残留
    #[error("数据库提交失败: {0}")]
    CommitFailed(String),
}

impl IngestError {
    /// 失败类别名，用于对外报告
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::StoreFailed(_) => "store_failed",
            IngestError::ExtractFailed(_) => "extract_failed",
            IngestError::CommitFailed(_) => "commit_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(IngestError::StoreFailed("x".into()).kind(), "store_failed");
        assert_eq!(
            IngestError::ExtractFailed("x".into()).kind(),
            "extract_failed"
        );
        assert_eq!(
            IngestError::CommitFailed("x".into()).kind(),
            "commit_failed"
        );
    }
}
