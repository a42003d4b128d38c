use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{error, info, warn};

use orchestrator_core::models::{FailoverReport, NodeStatus, Task};
use orchestrator_core::traits::NodeFailureHandler;
use orchestrator_core::OrchestratorResult;

use crate::node_manager::NodeManager;
use crate::task_manager::TaskManager;

/// 故障转移协调器
///
/// 节点故障时将其标记为down，并为节点上已放置且未结束的任务创建替代任务。
/// 故障标记由节点管理器保存，同一次故障的重复通知为空操作；节点以任何方式离开down状态后标记清除。
pub struct FailoverCoordinator {
    node_manager: Arc<NodeManager>,
    task_manager: Arc<TaskManager>,
}

impl FailoverCoordinator {
    pub fn new(node_manager: Arc<NodeManager>, task_manager: Arc<TaskManager>) -> Self {
        Self {
            node_manager,
            task_manager,
        }
    }

    /// 节点当前是否带有故障标记
    pub async fn is_marked(&self, node_id: &str) -> bool {
        self.node_manager.has_failover_mark(node_id).await
    }

    fn needs_failover(task: &Task) -> bool {
        task.status.is_active() && task.status.requires_node()
    }

    /// 将节点上的任务迁走，不检查故障标记
    pub async fn evacuate_node(&self, node_id: &str) -> OrchestratorResult<FailoverReport> {
        let mut report = FailoverReport {
            node_id: node_id.to_string(),
            ..Default::default()
        };

        let tasks = self.task_manager.get_tasks_by_node(node_id).await?;
        for task in tasks.iter().filter(|t| Self::needs_failover(t)) {
            info!("从节点 {} 迁移任务 {}", node_id, task.id);
            match self.task_manager.failover_task(&task.id).await {
                Ok(replacement) => {
                    report.restarted.push(task.id.clone());
                    report.replacements.push(replacement.id);
                }
                Err(e) => {
                    error!("迁移任务 {} 失败: {}", task.id, e);
                    report.errors.push(format!("{}: {}", task.id, e));
                }
            }
        }
        counter!("orchestrator_failover_tasks_total").increment(report.restarted.len() as u64);
        Ok(report)
    }
}

#[async_trait]
impl NodeFailureHandler for FailoverCoordinator {
    async fn handle_node_failure(&self, node_id: &str) -> OrchestratorResult<FailoverReport> {
        // 先确认节点存在，避免为未知节点留下标记
        self.node_manager.get_node(node_id).await?;

        if !self.node_manager.mark_failover(node_id).await {
            info!("节点 {} 的故障已处理过，跳过", node_id);
            return Ok(FailoverReport {
                node_id: node_id.to_string(),
                already_handled: true,
                ..Default::default()
            });
        }

        warn!("处理节点故障: {}", node_id);
        if let Err(e) = self
            .node_manager
            .update_node_status(node_id, NodeStatus::Down)
            .await
        {
            warn!("更新节点 {} 状态失败: {}", node_id, e);
        }

        let report = self.evacuate_node(node_id).await?;
        info!(
            "节点 {} 故障处理完成: 迁移 {} 个任务，失败 {} 个",
            node_id,
            report.restarted.len(),
            report.errors.len()
        );
        Ok(report)
    }

    async fn handle_node_recovery(&self, node_id: &str) -> OrchestratorResult<()> {
        if self.node_manager.clear_failover_mark(node_id).await {
            info!("节点 {} 已恢复，清除故障标记", node_id);
        }
        Ok(())
    }
}
