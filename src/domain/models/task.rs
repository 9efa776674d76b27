// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::extraction::{ExtractionRequest, ExtractionResult};

/// 任务实体
///
/// 表示一次待编排的提取请求。任务在提交时创建，由工作器
/// 认领执行，最终进入终态（成功、失败或被撤销）。任务记录
/// 由持有它的工作器独占修改，其他观察者只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// 任务唯一标识符
    pub id: Uuid,
    /// 任务状态，跟踪任务在其生命周期中的当前阶段
    pub state: TaskState,
    /// 提取请求的独立副本
    pub request: ExtractionRequest,
    /// 提取结果，仅在任务成功后存在
    pub result: Option<ExtractionResult>,
    /// 错误详情，仅在任务失败后存在
    pub error_detail: Option<String>,
    /// 所属批次ID，批量提交的任务会携带此字段
    pub batch_id: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 开始执行时间
    pub started_at: Option<DateTime<Utc>>,
    /// 完成时间（到达终态的时间）
    pub completed_at: Option<DateTime<Utc>>,
}

/// 任务状态枚举
///
/// 状态转换遵循以下流程：
/// Pending → Started → Success/Failure
/// Pending/Started → Revoked
///
/// Success、Failure 和 Revoked 为终态，任何转换都不能离开终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// 待处理，任务已创建但尚未被工作器认领
    #[default]
    Pending,
    /// 执行中，任务已被某个工作器认领
    Started,
    /// 已成功，任务执行完成且结果可用
    Success,
    /// 已失败，任务执行遇到不可恢复的错误
    Failure,
    /// 已撤销，任务在完成前被显式取消
    Revoked,
}

impl TaskState {
    /// 判断是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Revoked
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "PENDING"),
            TaskState::Started => write!(f, "STARTED"),
            TaskState::Success => write!(f, "SUCCESS"),
            TaskState::Failure => write!(f, "FAILURE"),
            TaskState::Revoked => write!(f, "REVOKED"),
        }
    }
}

impl FromStr for TaskState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskState::Pending),
            "STARTED" => Ok(TaskState::Started),
            "SUCCESS" => Ok(TaskState::Success),
            "FAILURE" => Ok(TaskState::Failure),
            "REVOKED" => Ok(TaskState::Revoked),
            _ => Err(()),
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 无效的状态转换，当任务状态转换不符合生命周期规则时发生
    #[error("Invalid state transition")]
    InvalidStateTransition,

    /// 验证错误，当输入数据不符合领域规则时发生
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl Task {
    /// 创建一个新的任务
    ///
    /// # 参数
    ///
    /// * `request` - 提取请求
    ///
    /// # 返回值
    ///
    /// 返回处于 Pending 状态的新任务实例
    pub fn new(request: ExtractionRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TaskState::Pending,
            request,
            result: None,
            error_detail: None,
            batch_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 启动任务
    ///
    /// 将任务状态从 Pending 变更为 Started
    pub fn start(mut self) -> Result<Self, DomainError> {
        match self.state {
            TaskState::Pending => {
                self.state = TaskState::Started;
                self.started_at = Some(Utc::now());
                Ok(self)
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 完成任务
    ///
    /// 将任务状态从 Started 变更为 Success 并记录结果
    pub fn succeed(mut self, result: ExtractionResult) -> Result<Self, DomainError> {
        match self.state {
            TaskState::Started => {
                self.state = TaskState::Success;
                self.result = Some(result);
                self.completed_at = Some(Utc::now());
                Ok(self)
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 标记任务失败
    ///
    /// 将任务状态从 Started 变更为 Failure 并记录错误详情
    pub fn fail(mut self, error_detail: String) -> Result<Self, DomainError> {
        match self.state {
            TaskState::Started => {
                self.state = TaskState::Failure;
                self.error_detail = Some(error_detail);
                self.completed_at = Some(Utc::now());
                Ok(self)
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }

    /// 撤销任务
    ///
    /// 将 Pending 或 Started 状态的任务变更为 Revoked
    pub fn revoke(mut self) -> Result<Self, DomainError> {
        match self.state {
            TaskState::Pending | TaskState::Started => {
                self.state = TaskState::Revoked;
                self.completed_at = Some(Utc::now());
                Ok(self)
            }
            _ => Err(DomainError::InvalidStateTransition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::extraction::ExtractionRequest;

    fn request() -> ExtractionRequest {
        ExtractionRequest {
            raw_text: Some("Acme Corporation sued Beta LLC.".to_string()),
            ..ExtractionRequest::default()
        }
    }

    #[test]
    fn test_lifecycle_success_path() {
        let task = Task::new(request());
        assert_eq!(task.state, TaskState::Pending);

        let task = task.start().unwrap();
        assert_eq!(task.state, TaskState::Started);
        assert!(task.started_at.is_some());
    }

    #[test]
    fn test_revoke_from_pending() {
        let task = Task::new(request()).revoke().unwrap();
        assert_eq!(task.state, TaskState::Revoked);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_terminal_states_absorb() {
        let task = Task::new(request()).revoke().unwrap();
        assert!(task.clone().start().is_err());
        assert!(task.clone().fail("boom".to_string()).is_err());
        assert!(task.revoke().is_err());
    }

    #[test]
    fn test_state_round_trip() {
        for state in ["PENDING", "STARTED", "SUCCESS", "FAILURE", "REVOKED"] {
            let parsed: TaskState = state.parse().unwrap();
            assert_eq!(parsed.to_string(), state);
        }
        assert!("ACTIVE".parse::<TaskState>().is_err());
    }
}
