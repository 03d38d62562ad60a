//! 摄取状态机
//!
//! 单次上传的线性生命周期：Received → Stored → Extracted →
//! Committed，外加三个失败出口。任何状态不会重入，失败状态
//! 均为终态。

use std::collections::HashMap;

use mia_core::{ArchiveError, Result};

/// 摄取管线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestState {
    Received,
    Stored,
    Extracted,
    Committed,
    StoreFailed,
    ExtractFailed,
    CommitFailed,
}

impl IngestState {
    /// 是否为终态（成功或失败）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestState::Committed
                | IngestState::StoreFailed
                | IngestState::ExtractFailed
                | IngestState::CommitFailed
        )
    }
}

/// 状态转换事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestEvent {
    FileStored,
    StoreError,
    MetadataExtracted,
    ExtractError,
    HierarchyCommitted,
    CommitError,
}

/// 摄取状态机
#[derive(Debug)]
pub struct IngestStateMachine {
    transitions: HashMap<(IngestState, IngestEvent), IngestState>,
}

impl IngestStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则
        transitions.insert(
            (IngestState::Received, IngestEvent::FileStored),
            IngestState::Stored,
        );
        transitions.insert(
            (IngestState::Received, IngestEvent::StoreError),
            IngestState::StoreFailed,
        );
        transitions.insert(
            (IngestState::Stored, IngestEvent::MetadataExtracted),
            IngestState::Extracted,
        );
        transitions.insert(
            (IngestState::Stored, IngestEvent::ExtractError),
            IngestState::ExtractFailed,
        );
        transitions.insert(
            (IngestState::Extracted, IngestEvent::HierarchyCommitted),
            IngestState::Committed,
        );
        transitions.insert(
            (IngestState::Extracted, IngestEvent::CommitError),
            IngestState::CommitFailed,
        );

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: IngestState, event: IngestEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: IngestState, event: IngestEvent) -> Result<IngestState> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| ArchiveError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }
}

impl Default for IngestStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_success_path() {
        let sm = IngestStateMachine::new();

        let state = sm
            .transition(IngestState::Received, IngestEvent::FileStored)
            .unwrap();
        assert_eq!(state, IngestState::Stored);

        let state = sm
            .transition(state, IngestEvent::MetadataExtracted)
            .unwrap();
        assert_eq!(state, IngestState::Extracted);

        let state = sm
            .transition(state, IngestEvent::HierarchyCommitted)
            .unwrap();
        assert_eq!(state, IngestState::Committed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_failure_exits() {
        let sm = IngestStateMachine::new();

        assert_eq!(
            sm.transition(IngestState::Received, IngestEvent::StoreError)
                .unwrap(),
            IngestState::StoreFailed
        );
        assert_eq!(
            sm.transition(IngestState::Stored, IngestEvent::ExtractError)
                .unwrap(),
            IngestState::ExtractFailed
        );
        assert_eq!(
            sm.transition(IngestState::Extracted, IngestEvent::CommitError)
                .unwrap(),
            IngestState::CommitFailed
        );
    }

    #[test]
    fn test_no_stage_skipping() {
        let sm = IngestStateMachine::new();

        // 不允许跳过存储阶段直接提取或提交
        assert!(!sm.can_transition(IngestState::Received, IngestEvent::MetadataExtracted));
        assert!(!sm.can_transition(IngestState::Received, IngestEvent::HierarchyCommitted));
        assert!(!sm.can_transition(IngestState::Stored, IngestEvent::HierarchyCommitted));
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        let sm = IngestStateMachine::new();
        let events = [
            IngestEvent::FileStored,
            IngestEvent::StoreError,
            IngestEvent::MetadataExtracted,
            IngestEvent::ExtractError,
            IngestEvent::HierarchyCommitted,
            IngestEvent::CommitError,
        ];

        for state in [
            IngestState::Committed,
            IngestState::StoreFailed,
            IngestState::ExtractFailed,
            IngestState::CommitFailed,
        ] {
            assert!(state.is_terminal());
            for event in events {
                assert!(!sm.can_transition(state, event));
                assert!(sm.transition(state, event).is_err());
            }
        }
    }
}
