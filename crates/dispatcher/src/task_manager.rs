use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use orchestrator_core::config::{QueueFullPolicy, TaskManagerConfig};
use orchestrator_core::models::{
    Node, Task, TaskPatch, TaskStats, TaskStatus, TaskUpdate,
};
use orchestrator_core::traits::{
    CompletionOutcome, CompletionReceiver, CompletionSender, TaskCompletion, TaskDispatcher,
    TaskRepository,
};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_infrastructure::{BoundedTaskQueue, EnqueueError};

use crate::lifecycle::{shutdown_requested, LoopLifecycle};
use crate::node_manager::NodeManager;

/// 并发迁移冲突时的最大重试次数
const TRANSITION_RETRIES: usize = 3;

/// 任务管理器
///
/// 负责任务注册表、状态机、有界分发队列、分发工作协程池以及完成信号监听。
pub struct TaskManager {
    repo: Arc<dyn TaskRepository>,
    node_manager: Arc<NodeManager>,
    dispatcher: Arc<dyn TaskDispatcher>,
    queue: BoundedTaskQueue,
    /// 因队列已满而未入队的任务，按提交顺序排列
    deferred: Mutex<VecDeque<String>>,
    completion_tx: CompletionSender,
    completion_rx: Arc<Mutex<CompletionReceiver>>,
    config: TaskManagerConfig,
    dispatch_timeout: Duration,
    lifecycle: LoopLifecycle,
}

impl TaskManager {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        node_manager: Arc<NodeManager>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: TaskManagerConfig,
        dispatch_timeout: Duration,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            repo,
            node_manager,
            dispatcher,
            queue: BoundedTaskQueue::new(config.queue_capacity),
            deferred: Mutex::new(VecDeque::new()),
            completion_tx,
            completion_rx: Arc::new(Mutex::new(completion_rx)),
            config,
            dispatch_timeout,
            lifecycle: LoopLifecycle::new(),
        }
    }

    /// 启动分发工作协程池与完成信号监听
    pub async fn start(self: &Arc<Self>) -> OrchestratorResult<()> {
        let manager = Arc::clone(self);
        let worker_count = self.config.worker_count;
        self.lifecycle
            .start("TaskManager", move |shutdown_rx| {
                let mut handles = Vec::with_capacity(worker_count + 1);
                for worker_id in 0..worker_count {
                    let manager = Arc::clone(&manager);
                    let shutdown_rx = shutdown_rx.clone();
                    handles.push(tokio::spawn(async move {
                        manager.worker_loop(worker_id, shutdown_rx).await;
                    }));
                }
                let listener = Arc::clone(&manager);
                handles.push(tokio::spawn(async move {
                    listener.completion_loop(shutdown_rx).await;
                }));
                handles
            })
            .await?;
        info!("任务管理器已启动，工作协程数: {}", worker_count);
        Ok(())
    }

    pub async fn stop(&self) {
        if self.lifecycle.stop("TaskManager").await {
            info!("任务管理器已停止");
        }
    }

    /// 提交新任务
    ///
    /// 校验通过后以New状态存入注册表并放入分发队列。队列已满时按配置的策略处理：
    /// `defer`保留任务等待调度器补偿入队，`reject`删除任务并返回Backpressure。
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn create_task(&self, mut task: Task) -> OrchestratorResult<Task> {
        task.validate()?;

        let now = Utc::now();
        task.status = TaskStatus::New;
        task.desired_state = TaskStatus::Running;
        task.node_id.clear();
        task.created_at = now;
        task.updated_at = now;
        task.started_at = None;
        task.completed_at = None;

        let task = self.repo.insert(task).await?;
        counter!("orchestrator_tasks_created_total").increment(1);
        info!("创建任务: id={}, name={}, image={}", task.id, task.name, task.image);

        self.enqueue_or_defer(&task.id).await?;
        Ok(task)
    }

    async fn enqueue_or_defer(&self, task_id: &str) -> OrchestratorResult<()> {
        let wait = Duration::from_millis(self.config.enqueue_timeout_ms);
        match self.queue.enqueue(task_id.to_string(), wait).await {
            Ok(()) => {
                self.record_queue_depth();
                Ok(())
            }
            Err(EnqueueError::Full(id)) => match self.config.queue_full_policy {
                QueueFullPolicy::Defer => {
                    warn!("分发队列已满，任务 {} 延后入队", id);
                    counter!("orchestrator_tasks_deferred_total").increment(1);
                    self.deferred.lock().await.push_back(id);
                    Ok(())
                }
                QueueFullPolicy::Reject => {
                    warn!("分发队列已满，拒绝任务 {}", id);
                    self.repo.remove_unless(&id, &[]).await?;
                    Err(OrchestratorError::Backpressure(format!(
                        "队列容量 {} 已满",
                        self.queue.capacity()
                    )))
                }
            },
            Err(EnqueueError::Closed(id)) => Err(OrchestratorError::Internal(format!(
                "分发队列已关闭，任务 {id} 无法入队"
            ))),
        }
    }

    /// 将延后的任务重新放入队列，返回成功入队的数量
    pub async fn requeue_deferred(&self) -> usize {
        let mut deferred = self.deferred.lock().await;
        let mut requeued = 0;
        while let Some(id) = deferred.front().cloned() {
            match self.queue.try_enqueue(id.clone()) {
                Ok(()) => {
                    deferred.pop_front();
                    requeued += 1;
                }
                Err(EnqueueError::Full(_)) => break,
                Err(EnqueueError::Closed(_)) => {
                    error!("分发队列已关闭，停止补偿入队");
                    break;
                }
            }
        }
        if requeued > 0 {
            self.record_queue_depth();
            info!("补偿入队 {} 个任务，剩余 {} 个", requeued, deferred.len());
        }
        requeued
    }

    fn record_queue_depth(&self) {
        gauge!("orchestrator_task_queue_depth").set(self.queue.len() as f64);
    }

    pub async fn deferred_count(&self) -> usize {
        self.deferred.lock().await.len()
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        debug!("分发工作协程 {} 启动", worker_id);
        loop {
            tokio::select! {
                next = self.queue.dequeue() => {
                    match next {
                        Some(task_id) => {
                            self.record_queue_depth();
                            self.process_task(&task_id).await
                        }
                        None => break,
                    }
                }
                _ = shutdown_requested(&mut shutdown_rx) => break,
            }
        }
        debug!("分发工作协程 {} 退出", worker_id);
    }

    /// 处理出队的任务：New -> Pending -> 选择节点 -> 分配并分发
    async fn process_task(&self, task_id: &str) {
        let task = match self
            .repo
            .transition(task_id, TaskStatus::New, TaskStatus::Pending, TaskPatch::default())
            .await
        {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!("任务 {} 已不是New状态，跳过", task_id);
                return;
            }
            Err(OrchestratorError::TaskNotFound { .. }) => {
                debug!("任务 {} 已被删除，跳过", task_id);
                return;
            }
            Err(e) => {
                error!("任务 {} 进入Pending失败: {}", task_id, e);
                return;
            }
        };

        let node = match self.node_manager.select_node_for_task(&task).await {
            Ok(node) => node,
            Err(e) => {
                warn!("任务 {} 放置失败: {}", task.id, e);
                self.mark_failed(&task.id, TaskStatus::Pending).await;
                return;
            }
        };

        if let Err(e) = self.assign_and_dispatch(&task, &node).await {
            error!("任务 {} 分发出错: {}", task.id, e);
        }
    }

    /// 原子地将Pending任务分配到节点并调用分发能力
    ///
    /// 返回`Ok(false)`表示任务已被其他执行者抢先处理。分发被拒绝时任务变为Failed。
    pub async fn assign_and_dispatch(&self, task: &Task, node: &Node) -> OrchestratorResult<bool> {
        let assigned = match self
            .repo
            .transition(
                &task.id,
                TaskStatus::Pending,
                TaskStatus::Assigned,
                TaskPatch::assign(node.id.clone()),
            )
            .await?
        {
            Some(task) => task,
            None => {
                debug!("任务 {} 已被其他执行者分配", task.id);
                return Ok(false);
            }
        };
        info!("任务 {} 分配到节点 {}", assigned.id, node.id);

        let start = Instant::now();
        let result = tokio::time::timeout(
            self.dispatch_timeout,
            self.dispatcher
                .dispatch(&assigned, node, self.completion_tx.clone()),
        )
        .await
        .unwrap_or_else(|_| {
            Err(OrchestratorError::Timeout(format!(
                "分发任务 {} 超过 {:?}",
                assigned.id, self.dispatch_timeout
            )))
        });
        histogram!("orchestrator_dispatch_duration_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                let running = self
                    .repo
                    .transition(
                        &assigned.id,
                        TaskStatus::Assigned,
                        TaskStatus::Running,
                        TaskPatch::started(),
                    )
                    .await?;
                if running.is_some() {
                    counter!("orchestrator_tasks_started_total").increment(1);
                    debug!("任务 {} 在节点 {} 上运行", assigned.id, node.id);
                } else {
                    debug!("任务 {} 在标记Running前已结束", assigned.id);
                }
            }
            Err(e) => {
                warn!("节点 {} 拒绝任务 {}: {}", node.id, assigned.id, e);
                self.mark_failed(&assigned.id, TaskStatus::Assigned).await;
            }
        }
        Ok(true)
    }

    async fn mark_failed(&self, task_id: &str, from: TaskStatus) {
        match self
            .repo
            .transition(task_id, from, TaskStatus::Failed, TaskPatch::completed())
            .await
        {
            Ok(Some(_)) => {
                counter!("orchestrator_tasks_failed_total").increment(1);
            }
            Ok(None) => debug!("任务 {} 状态已变化，未标记Failed", task_id),
            Err(e) => error!("标记任务 {} 失败状态出错: {}", task_id, e),
        }
    }

    async fn completion_loop(self: Arc<Self>, mut shutdown_rx: tokio::sync::watch::Receiver<bool>) {
        let mut receiver = self.completion_rx.lock().await;
        debug!("完成信号监听启动");
        loop {
            tokio::select! {
                completion = receiver.recv() => {
                    match completion {
                        Some(completion) => {
                            if let Err(e) = self.handle_completion(completion).await {
                                warn!("处理任务完成信号失败: {}", e);
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown_requested(&mut shutdown_rx) => break,
            }
        }
        debug!("完成信号监听退出");
    }

    /// 应用分发能力回报的完成信号
    ///
    /// 任务可能仍处于Assigned，此时一并补记started_at。已结束或不可迁移的任务忽略该信号。
    pub async fn handle_completion(&self, completion: TaskCompletion) -> OrchestratorResult<()> {
        let target = match completion.outcome {
            CompletionOutcome::Succeeded => TaskStatus::Complete,
            CompletionOutcome::Failed(ref reason) => {
                warn!("任务 {} 执行失败: {}", completion.task_id, reason);
                TaskStatus::Failed
            }
        };
        let patch = TaskPatch {
            node_id: None,
            started_at: Some(completion.finished_at),
            completed_at: Some(completion.finished_at),
        };

        for _ in 0..TRANSITION_RETRIES {
            let current = self.get_task(&completion.task_id).await?.status;
            if !current.can_transition_to(target) {
                debug!(
                    "任务 {} 当前状态 {} 不接受完成信号 {}",
                    completion.task_id, current, target
                );
                return Ok(());
            }
            if self
                .repo
                .transition(&completion.task_id, current, target, patch.clone())
                .await?
                .is_some()
            {
                match target {
                    TaskStatus::Complete => {
                        counter!("orchestrator_tasks_completed_total").increment(1)
                    }
                    _ => counter!("orchestrator_tasks_failed_total").increment(1),
                }
                info!("任务 {} 结束: {}", completion.task_id, target);
                return Ok(());
            }
        }
        Err(OrchestratorError::Internal(format!(
            "任务 {} 完成状态写入冲突",
            completion.task_id
        )))
    }

    /// 管理操作：按状态机推进任务到指定状态
    pub async fn advance_task(&self, id: &str, next: TaskStatus) -> OrchestratorResult<Task> {
        let task = self.get_task(id).await?;
        if !task.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: task.status.to_string(),
                to: next.to_string(),
            });
        }
        if next.requires_node() && task.node_id.is_empty() {
            return Err(OrchestratorError::Constraint(format!(
                "任务 {id} 尚未分配节点，不能进入 {next}"
            )));
        }

        let mut patch = TaskPatch::default();
        if next == TaskStatus::Running {
            patch.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            patch.completed_at = Some(Utc::now());
        }

        self.repo
            .transition(id, task.status, next, patch)
            .await?
            .ok_or_else(|| OrchestratorError::InvalidTransition {
                from: task.status.to_string(),
                to: next.to_string(),
            })
    }

    /// 重启任务：原任务期望状态设为Complete，以相同配置创建并入队一个新任务
    pub async fn restart_task(&self, id: &str) -> OrchestratorResult<Task> {
        let original = self.get_task(id).await?;
        self.repo
            .update(
                id,
                TaskUpdate {
                    desired_state: Some(TaskStatus::Complete),
                    ..Default::default()
                },
            )
            .await?;

        let replacement = original.restart_clone(Uuid::new_v4().to_string());
        let replacement = self.repo.insert(replacement).await?;
        counter!("orchestrator_tasks_restarted_total").increment(1);
        info!("重启任务 {} -> {}", id, replacement.id);

        self.enqueue_or_defer(&replacement.id).await?;
        Ok(replacement)
    }

    /// 故障转移单个任务：重启后将原任务标记为Orphaned
    pub async fn failover_task(&self, id: &str) -> OrchestratorResult<Task> {
        let original = self.get_task(id).await?;
        let replacement = self.restart_task(id).await?;
        if original.status.can_transition_to(TaskStatus::Orphaned) {
            let orphaned = self
                .repo
                .transition(id, original.status, TaskStatus::Orphaned, TaskPatch::default())
                .await?;
            if orphaned.is_none() {
                debug!("任务 {} 状态已变化，未标记Orphaned", id);
            }
        }
        Ok(replacement)
    }

    /// 删除任务，运行中的任务不能删除
    pub async fn remove_task(&self, id: &str) -> OrchestratorResult<Task> {
        let removed = self.repo.remove_unless(id, &[TaskStatus::Running]).await?;
        info!("删除任务: {}", id);
        Ok(removed)
    }

    pub async fn start_task(&self, id: &str) -> OrchestratorResult<Task> {
        self.set_desired_state(id, TaskStatus::Running).await
    }

    pub async fn stop_task(&self, id: &str) -> OrchestratorResult<Task> {
        self.set_desired_state(id, TaskStatus::Complete).await
    }

    async fn set_desired_state(&self, id: &str, desired: TaskStatus) -> OrchestratorResult<Task> {
        self.repo
            .update(
                id,
                TaskUpdate {
                    desired_state: Some(desired),
                    ..Default::default()
                },
            )
            .await
    }

    /// 更新名称、期望状态与标签
    pub async fn update_task(&self, id: &str, update: TaskUpdate) -> OrchestratorResult<Task> {
        if let Some(ref name) = update.name {
            if name.trim().is_empty() {
                return Err(OrchestratorError::Validation("任务名称不能为空".to_string()));
            }
        }
        self.repo.update(id, update).await
    }

    pub async fn get_task(&self, id: &str) -> OrchestratorResult<Task> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound { id: id.to_string() })
    }

    /// 所有任务，按创建时间排序
    pub async fn list_tasks(&self) -> OrchestratorResult<Vec<Task>> {
        self.repo.list().await
    }

    pub async fn get_tasks_by_node(&self, node_id: &str) -> OrchestratorResult<Vec<Task>> {
        self.repo.find_by_node(node_id).await
    }

    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> OrchestratorResult<Vec<Task>> {
        self.repo.find_by_status(status).await
    }

    pub async fn get_stats(&self) -> OrchestratorResult<TaskStats> {
        let tasks = self.repo.list().await?;
        let mut stats = TaskStats {
            total_tasks: tasks.len(),
            queue_length: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            deferred_tasks: self.deferred_count().await,
            workers: self.config.worker_count,
            ..Default::default()
        };
        for task in &tasks {
            *stats.tasks_by_status.entry(task.status).or_insert(0) += 1;
        }
        Ok(stats)
    }
}
