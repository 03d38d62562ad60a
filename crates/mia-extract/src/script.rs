//! 外部元数据提取工具调用
//!
//! 提取器是不可信边界：非零退出、任何诊断输出、超时或不完整的
//! 输出记录一律按失败处理，绝不使用部分stdout。

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use mia_core::config::ExtractorConfig;
use mia_core::models::DicomMetadata;
use mia_core::ports::MetadataExtractor;
use mia_core::{ArchiveError, Result};

/// 基于外部脚本的元数据提取器
///
/// 调用形如`<program> <args...> <已存储文件的绝对路径>`，成功时
/// stdout为一条JSON元数据记录。
#[derive(Debug, Clone)]
pub struct ScriptExtractor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ScriptExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.timeout())
    }
}

#[async_trait]
impl MetadataExtractor for ScriptExtractor {
    async fn extract(&self, path: &Path) -> Result<DicomMetadata> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(path).kill_on_drop(true);

        tracing::debug!(
            program = %self.program,
            path = %path.display(),
            "invoking metadata extractor"
        );

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                ArchiveError::Extractor(format!(
                    "extractor timed out after {}s",
                    self.timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| ArchiveError::Extractor(format!("failed to launch extractor: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ArchiveError::Extractor(format!(
                "extractor exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        // 退出码为零但写了诊断输出，同样不可信
        if !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ArchiveError::Extractor(format!(
                "extractor wrote diagnostics: {}",
                stderr.trim()
            )));
        }

        let metadata: DicomMetadata = serde_json::from_slice(&output.stdout)
            .map_err(|e| ArchiveError::Extractor(format!("malformed extractor output: {e}")))?;
        metadata.validate()?;

        tracing::debug!(
            patient = %metadata.patient_name,
            modality = %metadata.modality,
            "metadata extracted"
        );
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETE_JSON: &str = r#"{
        "Modality": "CT",
        "PatientName": "Jane Doe",
        "StudyDescription": "Chest",
        "StudyDate": "20240115",
        "StudyTime": "093000",
        "SeriesDescription": "Axial",
        "SeriesDate": "20240115",
        "SeriesTime": "093500"
    }"#;

    // sh -c的脚本里$0是追加的文件路径参数
    fn fake(script: &str, timeout: Duration) -> ScriptExtractor {
        ScriptExtractor::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    #[tokio::test]
    async fn test_extract_complete_output() {
        let extractor = fake(
            &format!("printf '%s' '{}'", COMPLETE_JSON.replace('\n', " ")),
            Duration::from_secs(5),
        );
        let metadata = extractor.extract(Path::new("/dev/null")).await.unwrap();
        assert_eq!(metadata.patient_name, "Jane Doe");
        assert_eq!(metadata.series_description, "Axial");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let extractor = fake("exit 3", Duration::from_secs(5));
        match extractor.extract(Path::new("/dev/null")).await {
            Err(ArchiveError::Extractor(_)) => {}
            other => panic!("expected extractor error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stderr_with_zero_exit_is_failure() {
        let script = format!(
            "printf '%s' '{}'; echo 'cannot read pixel data' >&2",
            COMPLETE_JSON.replace('\n', " ")
        );
        let extractor = fake(&script, Duration::from_secs(5));
        assert!(extractor.extract(Path::new("/dev/null")).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_stdout_is_failure() {
        let extractor = fake("printf 'not-json'", Duration::from_secs(5));
        assert!(extractor.extract(Path::new("/dev/null")).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_field_is_failure() {
        // 提取器自身失败时输出{"error": ...}，同样落在缺字段分支
        let extractor = fake(
            r#"printf '%s' '{"error": "unreadable dataset"}'"#,
            Duration::from_secs(5),
        );
        assert!(extractor.extract(Path::new("/dev/null")).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_field_is_failure() {
        let script = format!(
            "printf '%s' '{}'",
            COMPLETE_JSON.replace('\n', " ").replace("093000", "")
        );
        let extractor = fake(&script, Duration::from_secs(5));
        assert!(extractor.extract(Path::new("/dev/null")).await.is_err());
    }

    #[tokio::test]
    async fn test_hanging_extractor_times_out() {
        let extractor = fake("sleep 30", Duration::from_millis(200));
        match extractor.extract(Path::new("/dev/null")).await {
            Err(ArchiveError::Extractor(message)) => {
                assert!(message.contains("timed out"), "unexpected: {message}")
            }
            other => panic!("expected timeout error, got {other:?}"),
        }
    }
}
