use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use orchestrator_core::models::{Node, Task};
use orchestrator_core::traits::{CompletionSender, TaskCompletion, TaskDispatcher};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

/// 回环分发器
///
/// 不执行任何进程，接受任务后在固定时长后回报成功，用于空跑和演示。
#[derive(Debug, Clone)]
pub struct LoopbackDispatcher {
    run_time: Duration,
}

impl LoopbackDispatcher {
    pub fn new(run_time: Duration) -> Self {
        Self { run_time }
    }
}

#[async_trait]
impl TaskDispatcher for LoopbackDispatcher {
    async fn dispatch(
        &self,
        task: &Task,
        node: &Node,
        completion: CompletionSender,
    ) -> OrchestratorResult<()> {
        debug!("loopback dispatch: task={} node={}", task.id, node.id);
        counter!("orchestrator_dispatch_total", "dispatcher" => "loopback").increment(1);

        let task_id = task.id.clone();
        let run_time = self.run_time;
        tokio::spawn(async move {
            tokio::time::sleep(run_time).await;
            if completion.send(TaskCompletion::succeeded(task_id)).is_err() {
                debug!("completion channel closed");
            }
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

/// 本地进程分发器
///
/// 以子进程方式执行任务的`command`，`env`中的`KEY=VALUE`作为环境变量传入，
/// 退出码为0回报成功，否则回报失败。
#[derive(Debug, Clone, Default)]
pub struct ProcessDispatcher {
    /// 任务ID -> 进程ID
    running_processes: Arc<RwLock<HashMap<String, u32>>>,
}

impl ProcessDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前正在运行的进程数
    pub async fn running_count(&self) -> usize {
        self.running_processes.read().await.len()
    }

    fn parse_env(env: &[String]) -> Vec<(String, String)> {
        env.iter()
            .filter_map(|entry| {
                entry
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl TaskDispatcher for ProcessDispatcher {
    async fn dispatch(
        &self,
        task: &Task,
        node: &Node,
        completion: CompletionSender,
    ) -> OrchestratorResult<()> {
        let (program, args) = task.command.split_first().ok_or_else(|| {
            OrchestratorError::Dispatch(format!("任务 {} 没有可执行的命令", task.id))
        })?;

        info!(
            "执行任务进程: task={}, node={}, command={}, args={:?}",
            task.id, node.id, program, args
        );

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        for (key, value) in Self::parse_env(&task.env) {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            counter!("orchestrator_dispatch_rejected_total", "dispatcher" => "process").increment(1);
            OrchestratorError::Dispatch(format!("启动任务进程失败: {e}"))
        })?;
        counter!("orchestrator_dispatch_total", "dispatcher" => "process").increment(1);

        let task_id = task.id.clone();
        if let Some(pid) = child.id() {
            self.running_processes
                .write()
                .await
                .insert(task_id.clone(), pid);
        }

        let running = Arc::clone(&self.running_processes);
        tokio::spawn(async move {
            let completion_msg = match child.wait_with_output().await {
                Ok(output) if output.status.success() => {
                    debug!(
                        "任务 {} 进程正常退出, stdout {} 字节",
                        task_id,
                        output.stdout.len()
                    );
                    TaskCompletion::succeeded(&task_id)
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!("任务 {} 进程退出异常: {}, stderr: {}", task_id, output.status, stderr.trim());
                    TaskCompletion::failed(&task_id, format!("进程退出码: {}", output.status))
                }
                Err(e) => {
                    error!("等待任务 {} 进程失败: {}", task_id, e);
                    TaskCompletion::failed(&task_id, format!("等待进程失败: {e}"))
                }
            };
            running.write().await.remove(&task_id);
            if completion.send(completion_msg).is_err() {
                debug!("completion channel closed");
            }
        });

        Ok(())
    }

    fn name(&self) -> &str {
        "process"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::models::{NodeRole, Resources};
    use orchestrator_core::traits::CompletionOutcome;
    use tokio::sync::mpsc;

    fn node() -> Node {
        Node::new("n1", "n1", "127.0.0.1", 2376, NodeRole::Worker, Resources::new(1000, 1024, 1024))
    }

    #[tokio::test]
    async fn test_loopback_reports_success() {
        let dispatcher = LoopbackDispatcher::new(Duration::from_millis(5));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = Task::new("t1", "t1", "busybox", Resources::new(100, 64, 0));

        dispatcher.dispatch(&task, &node(), tx).await.unwrap();
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.task_id, "t1");
        assert_eq!(completion.outcome, CompletionOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_process_rejects_empty_command() {
        let dispatcher = ProcessDispatcher::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let task = Task::new("t1", "t1", "busybox", Resources::new(100, 64, 0));

        let err = dispatcher.dispatch(&task, &node(), tx).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Dispatch(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_reports_exit_status() {
        let dispatcher = ProcessDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut ok = Task::new("ok", "ok", "local", Resources::new(100, 64, 0));
        ok.command = vec!["sh".to_string(), "-c".to_string(), "exit 0".to_string()];
        dispatcher.dispatch(&ok, &node(), tx.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().outcome, CompletionOutcome::Succeeded);

        let mut bad = Task::new("bad", "bad", "local", Resources::new(100, 64, 0));
        bad.command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        dispatcher.dispatch(&bad, &node(), tx).await.unwrap();
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.task_id, "bad");
        assert!(matches!(completion.outcome, CompletionOutcome::Failed(_)));
    }

    #[test]
    fn test_parse_env() {
        let env = vec!["A=1".to_string(), "broken".to_string(), "B=x=y".to_string()];
        let parsed = ProcessDispatcher::parse_env(&env);
        assert_eq!(
            parsed,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "x=y".to_string())
            ]
        );
    }
}
