use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::OrchestratorResult;
use crate::models::{Node, Task};

/// 任务执行结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CompletionOutcome {
    Succeeded,
    Failed(String),
}

/// 分发能力异步回报的完成信号，按任务ID关联
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCompletion {
    pub task_id: String,
    pub outcome: CompletionOutcome,
    pub finished_at: DateTime<Utc>,
}

impl TaskCompletion {
    pub fn succeeded(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: CompletionOutcome::Succeeded,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: CompletionOutcome::Failed(reason.into()),
            finished_at: Utc::now(),
        }
    }
}

pub type CompletionSender = mpsc::UnboundedSender<TaskCompletion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<TaskCompletion>;

/// 任务分发能力
///
/// `Ok(())`表示节点接受了任务，返回错误表示拒绝。任务结束后通过`completion`回报结果。
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        task: &Task,
        node: &Node,
        completion: CompletionSender,
    ) -> OrchestratorResult<()>;

    /// 分发器名称
    fn name(&self) -> &str;
}
