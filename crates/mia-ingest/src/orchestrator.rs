//! 摄取编排器
//!
//! 驱动单次上传走完 存储 → 提取 → 提交 三个阶段：要么产出一条
//! 完整的层级记录，要么以明确的失败类别干净退出，不留下读者
//! 可见的部分状态。

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use mia_core::models::{IngestOutcome, IngestRecord};
use mia_core::ports::{ContentStore, HierarchyStore, MetadataExtractor};

use crate::error::IngestError;
use crate::state::{IngestEvent, IngestState, IngestStateMachine};

/// 摄取编排器
///
/// 并发摄取之间不共享任何可变进程内状态，所有协调都发生在
/// 事务性数据库上。
pub struct IngestOrchestrator<S, E, H> {
    store: Arc<S>,
    extractor: Arc<E>,
    hierarchy: Arc<H>,
    state_machine: IngestStateMachine,
}

impl<S, E, H> IngestOrchestrator<S, E, H>
where
    S: ContentStore + 'static,
    E: MetadataExtractor + 'static,
    H: HierarchyStore + 'static,
{
    pub fn new(store: Arc<S>, extractor: Arc<E>, hierarchy: Arc<H>) -> Self {
        Self {
            store,
            extractor,
            hierarchy,
            state_machine: IngestStateMachine::new(),
        }
    }

    /// 摄取一次上传
    ///
    /// 三个阶段严格顺序执行，单次调用内没有重试环；调用方的重试
    /// 是一次全新调用。
    pub async fn ingest(
        &self,
        file_name: &str,
        data: &[u8],
    ) -> std::result::Result<IngestOutcome, IngestError> {
        let mut state = IngestState::Received;

        if file_name.is_empty() {
            return Err(self.fail(
                &mut state,
                IngestEvent::StoreError,
                "file name must not be empty".to_string(),
            ));
        }

        // 阶段一：完整持久化原始字节
        let stored_path = match self.store.put(file_name, data).await {
            Ok(path) => path,
            Err(e) => return Err(self.fail(&mut state, IngestEvent::StoreError, e.to_string())),
        };
        state = self.advance(state, IngestEvent::FileStored);
        info!(file_name, path = %stored_path.display(), "upload stored");

        // 阶段二：外部提取器产出元数据；失败时已存储的文件保留用于诊断
        let metadata = match self.extractor.extract(&stored_path).await {
            Ok(metadata) => metadata,
            Err(e) => return Err(self.fail(&mut state, IngestEvent::ExtractError, e.to_string())),
        };
        let study_created_at = match metadata.study_timestamp() {
            Ok(ts) => ts,
            Err(e) => return Err(self.fail(&mut state, IngestEvent::ExtractError, e.to_string())),
        };
        let series_created_at = match metadata.series_timestamp() {
            Ok(ts) => ts,
            Err(e) => return Err(self.fail(&mut state, IngestEvent::ExtractError, e.to_string())),
        };
        state = self.advance(state, IngestEvent::MetadataExtracted);

        let record = IngestRecord {
            modality_name: metadata.modality,
            patient_name: metadata.patient_name,
            study_name: metadata.study_description,
            study_created_at,
            series_name: metadata.series_description,
            series_created_at,
            file_name: file_name.to_string(),
            file_path: stored_path.to_string_lossy().into_owned(),
            ingested_at: Utc::now(),
        };

        // 阶段三：层级事务在独立任务上运行。调用方被取消（如客户端
        // 断开）不会把已开启的事务丢在半途，事务总会走到提交或回滚。
        let hierarchy = Arc::clone(&self.hierarchy);
        let commit = tokio::spawn(async move { hierarchy.commit_ingest(&record).await });

        let outcome = match commit.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                return Err(self.fail(&mut state, IngestEvent::CommitError, e.to_string()))
            }
            Err(e) => {
                return Err(self.fail(
                    &mut state,
                    IngestEvent::CommitError,
                    format!("commit task aborted: {e}"),
                ))
            }
        };
        state = self.advance(state, IngestEvent::HierarchyCommitted);

        if !outcome.file_created {
            warn!(
                file_name,
                file_id = %outcome.file_id,
                "duplicate file resolved to existing row"
            );
        }
        info!(file_name, file_id = %outcome.file_id, ?state, "ingest committed");
        Ok(outcome)
    }

    /// 管线只沿状态机定义的边前进
    fn advance(&self, state: IngestState, event: IngestEvent) -> IngestState {
        debug_assert!(self.state_machine.can_transition(state, event));
        self.state_machine.transition(state, event).unwrap_or(state)
    }

    fn fail(&self, state: &mut IngestState, event: IngestEvent, cause: String) -> IngestError {
        *state = self.state_machine.transition(*state, event).unwrap_or(*state);
        let err = match event {
            IngestEvent::StoreError => IngestError::StoreFailed(cause),
            IngestEvent::ExtractError => IngestError::ExtractFailed(cause),
            _ => IngestError::CommitFailed(cause),
        };
        error!(state = ?*state, error = %err, "ingest failed");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mia_core::models::DicomMetadata;
    use mia_core::{ArchiveError, Result};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct MemoryStore {
        puts: AtomicUsize,
        fail: bool,
    }

    impl MemoryStore {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                puts: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl ContentStore for MemoryStore {
        async fn put(&self, name: &str, _data: &[u8]) -> Result<PathBuf> {
            if self.fail {
                return Err(ArchiveError::Storage("disk full".to_string()));
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(PathBuf::from(format!("/uploads/{name}")))
        }

        async fn exists(&self, _path: &Path) -> bool {
            true
        }

        async fn get(&self, _path: &Path) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct FixedExtractor {
        metadata: Option<DicomMetadata>,
        calls: AtomicUsize,
    }

    impl FixedExtractor {
        fn new(metadata: Option<DicomMetadata>) -> Arc<Self> {
            Arc::new(Self {
                metadata,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MetadataExtractor for FixedExtractor {
        async fn extract(&self, _path: &Path) -> Result<DicomMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.metadata
                .clone()
                .ok_or_else(|| ArchiveError::Extractor("extractor exited with 1".to_string()))
        }
    }

    struct RecordingSink {
        records: Mutex<Vec<IngestRecord>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl HierarchyStore for RecordingSink {
        async fn commit_ingest(&self, record: &IngestRecord) -> Result<IngestOutcome> {
            if self.fail {
                return Err(ArchiveError::Database("connection reset".to_string()));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(IngestOutcome {
                patient_id: Uuid::new_v4(),
                study_id: Uuid::new_v4(),
                series_id: Uuid::new_v4(),
                file_id: Uuid::new_v4(),
                file_created: true,
            })
        }
    }

    fn sample_metadata() -> DicomMetadata {
        DicomMetadata {
            modality: "CT".to_string(),
            patient_name: "Jane Doe".to_string(),
            study_description: "Chest".to_string(),
            study_date: "20240115".to_string(),
            study_time: "093000".to_string(),
            series_description: "Axial".to_string(),
            series_date: "20240115".to_string(),
            series_time: "093500".to_string(),
        }
    }

    #[tokio::test]
    async fn test_success_commits_full_chain() {
        let store = MemoryStore::new(false);
        let extractor = FixedExtractor::new(Some(sample_metadata()));
        let sink = RecordingSink::new(false);
        let orchestrator =
            IngestOrchestrator::new(Arc::clone(&store), extractor, Arc::clone(&sink));

        let outcome = orchestrator.ingest("scan001.dcm", b"bytes").await.unwrap();
        assert!(outcome.file_created);
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.patient_name, "Jane Doe");
        assert_eq!(record.study_name, "Chest");
        assert_eq!(record.series_name, "Axial");
        assert_eq!(record.file_path, "/uploads/scan001.dcm");
        assert_eq!(
            record.study_created_at.to_rfc3339(),
            "2024-01-15T09:30:00+00:00"
        );
        assert_eq!(
            record.series_created_at.to_rfc3339(),
            "2024-01-15T09:35:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_store_failure_skips_extraction() {
        let store = MemoryStore::new(true);
        let extractor = FixedExtractor::new(Some(sample_metadata()));
        let sink = RecordingSink::new(false);
        let orchestrator =
            IngestOrchestrator::new(store, Arc::clone(&extractor), Arc::clone(&sink));

        let err = orchestrator
            .ingest("scan001.dcm", b"bytes")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "store_failed");
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_failure_skips_commit_but_keeps_file() {
        let store = MemoryStore::new(false);
        let extractor = FixedExtractor::new(None);
        let sink = RecordingSink::new(false);
        let orchestrator =
            IngestOrchestrator::new(Arc::clone(&store), extractor, Arc::clone(&sink));

        let err = orchestrator
            .ingest("scan001.dcm", b"bytes")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "extract_failed");
        // 文件已存储且保留
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_study_time_is_extract_failure() {
        let mut metadata = sample_metadata();
        metadata.study_time = "93000".to_string();

        let orchestrator = IngestOrchestrator::new(
            MemoryStore::new(false),
            FixedExtractor::new(Some(metadata)),
            RecordingSink::new(false),
        );

        let err = orchestrator
            .ingest("scan001.dcm", b"bytes")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "extract_failed");
    }

    #[tokio::test]
    async fn test_commit_failure_reports_commit_failed() {
        let orchestrator = IngestOrchestrator::new(
            MemoryStore::new(false),
            FixedExtractor::new(Some(sample_metadata())),
            RecordingSink::new(true),
        );

        let err = orchestrator
            .ingest("scan001.dcm", b"bytes")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "commit_failed");
    }

    #[tokio::test]
    async fn test_empty_file_name_rejected_before_side_effects() {
        let store = MemoryStore::new(false);
        let extractor = FixedExtractor::new(Some(sample_metadata()));
        let orchestrator = IngestOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&extractor),
            RecordingSink::new(false),
        );

        let err = orchestrator.ingest("", b"bytes").await.unwrap_err();
        assert_eq!(err.kind(), "store_failed");
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }
}
