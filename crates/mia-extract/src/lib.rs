//! # MIA提取模块
//!
//! 元数据提取器边界：以外部进程方式调用提取工具，并对其输出
//! 做严格的契约校验。

pub mod script;

pub use script::ScriptExtractor;
