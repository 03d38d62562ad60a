//! # MIA Web模块
//!
//! HTTP边界：上传入口、读模型查询、文件下载与健康检查。

pub mod handlers;
pub mod server;

pub use server::{AppState, ArchiveOrchestrator, WebServer};
