use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument, warn};

use orchestrator_core::config::SchedulerConfig;
use orchestrator_core::models::TaskStatus;
use orchestrator_core::{OrchestratorError, OrchestratorResult};

use crate::lifecycle::{shutdown_requested, LoopLifecycle};
use crate::node_manager::NodeManager;
use crate::task_manager::TaskManager;

/// 单轮调度结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePass {
    /// 补偿入队的New任务数
    pub requeued: usize,
    /// 本轮检查的Pending任务数
    pub pending: usize,
    /// 本轮由调度器完成分配的任务数
    pub assigned: usize,
    /// 暂无可用节点、保持Pending的任务数
    pub unplaced: usize,
    /// 处理出错而跳过的任务数
    pub errors: usize,
}

/// 调度器
///
/// 周期性兜底：补偿入队因队列已满而延后的任务，并为停留在Pending的任务重新尝试放置。
/// 放置失败的任务保持Pending，留待下一轮。
pub struct TaskScheduler {
    node_manager: Arc<NodeManager>,
    task_manager: Arc<TaskManager>,
    config: SchedulerConfig,
    lifecycle: LoopLifecycle,
}

impl TaskScheduler {
    pub fn new(
        node_manager: Arc<NodeManager>,
        task_manager: Arc<TaskManager>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            node_manager,
            task_manager,
            config,
            lifecycle: LoopLifecycle::new(),
        }
    }

    pub async fn start(self: &Arc<Self>) -> OrchestratorResult<()> {
        let scheduler = Arc::clone(self);
        self.lifecycle
            .start("TaskScheduler", move |mut shutdown_rx| {
                vec![tokio::spawn(async move {
                    info!("启动调度循环，间隔 {} 秒", scheduler.config.interval_seconds);
                    let mut interval = tokio::time::interval(Duration::from_secs(
                        scheduler.config.interval_seconds,
                    ));
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                if let Err(e) = scheduler.run_pass().await {
                                    error!("调度扫描失败: {}", e);
                                }
                            }
                            _ = shutdown_requested(&mut shutdown_rx) => {
                                info!("收到停止信号，退出调度循环");
                                break;
                            }
                        }
                    }
                })]
            })
            .await
    }

    pub async fn stop(&self) {
        self.lifecycle.stop("TaskScheduler").await;
    }

    /// 执行一轮调度
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> OrchestratorResult<SchedulePass> {
        let start = Instant::now();
        let mut pass = SchedulePass {
            requeued: self.task_manager.requeue_deferred().await,
            ..Default::default()
        };

        let pending = self
            .task_manager
            .get_tasks_by_status(TaskStatus::Pending)
            .await?;
        pass.pending = pending.len();

        for task in pending {
            let node = match self.node_manager.select_node_for_task(&task).await {
                Ok(node) => node,
                Err(OrchestratorError::NoCapacity(_)) => {
                    debug!("任务 {} 暂无可用节点，保持Pending", task.id);
                    pass.unplaced += 1;
                    continue;
                }
                Err(e) => {
                    warn!("任务 {} 放置出错，本轮跳过: {}", task.id, e);
                    pass.errors += 1;
                    continue;
                }
            };
            match self.task_manager.assign_and_dispatch(&task, &node).await {
                Ok(true) => pass.assigned += 1,
                Ok(false) => {}
                Err(OrchestratorError::TaskNotFound { .. }) => {
                    debug!("任务 {} 已被删除，跳过", task.id);
                }
                Err(e) => {
                    warn!("任务 {} 分配出错，本轮跳过: {}", task.id, e);
                    pass.errors += 1;
                }
            }
        }

        histogram!("orchestrator_schedule_pass_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        counter!("orchestrator_scheduler_assigned_total").increment(pass.assigned as u64);

        if pass.pending > 0 || pass.requeued > 0 {
            info!(
                "调度扫描完成: requeued={}, pending={}, assigned={}, unplaced={}, errors={}",
                pass.requeued, pass.pending, pass.assigned, pass.unplaced, pass.errors
            );
        }
        Ok(pass)
    }
}
