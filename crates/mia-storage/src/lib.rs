//! # MIA存储模块
//!
//! 负责上传文件原始字节的本地持久化。

pub mod content_store;

pub use content_store::{LocalContentStore, OverwritePolicy};
