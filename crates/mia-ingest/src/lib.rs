//! # MIA摄取模块
//!
//! 摄取编排器：驱动单次上传走完 存储 → 提取 → 提交 三个阶段，
//! 以及与之配套的状态机和失败分类。

pub mod error;
pub mod orchestrator;
pub mod state;

// 重新导出主要类型
pub use error::IngestError;
pub use orchestrator::IngestOrchestrator;
pub use state::{IngestEvent, IngestState, IngestStateMachine};
