use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use orchestrator_core::{OrchestratorError, OrchestratorResult};

struct RunningLoops {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// 后台循环的启停控制
///
/// 每次启动创建新的关闭信号，因此组件可以停止后再次启动。
#[derive(Default)]
pub struct LoopLifecycle {
    inner: Mutex<Option<RunningLoops>>,
}

impl LoopLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动后台循环，`spawn`接收关闭信号并返回所有任务句柄
    pub async fn start<F>(&self, component: &str, spawn: F) -> OrchestratorResult<()>
    where
        F: FnOnce(watch::Receiver<bool>) -> Vec<JoinHandle<()>>,
    {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            return Err(OrchestratorError::Constraint(format!(
                "{component} 已经在运行"
            )));
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = spawn(shutdown_rx);
        debug!("{} 启动了 {} 个后台任务", component, handles.len());
        *inner = Some(RunningLoops {
            shutdown_tx,
            handles,
        });
        Ok(())
    }

    /// 发送关闭信号并等待所有后台任务退出，未运行时返回false
    pub async fn stop(&self, component: &str) -> bool {
        let running = self.inner.lock().await.take();
        let Some(running) = running else {
            return false;
        };
        let _ = running.shutdown_tx.send(true);
        for handle in running.handles {
            if let Err(e) = handle.await {
                warn!("{} 后台任务异常退出: {}", component, e);
            }
        }
        debug!("{} 后台任务已全部退出", component);
        true
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

/// 等待关闭信号，发送端被丢弃也视为关闭
pub async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_stop_restart() {
        let lifecycle = LoopLifecycle::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = Arc::clone(&ticks);
            lifecycle
                .start("test", move |mut shutdown_rx| {
                    vec![tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_millis(5)) => {
                                    counter.fetch_add(1, Ordering::SeqCst);
                                }
                                _ = shutdown_requested(&mut shutdown_rx) => break,
                            }
                        }
                    })]
                })
                .await
                .unwrap();
            assert!(lifecycle.is_running().await);
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(lifecycle.stop("test").await);
            assert!(!lifecycle.is_running().await);
        }

        assert!(ticks.load(Ordering::SeqCst) > 0);
        assert!(!lifecycle.stop("test").await);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let lifecycle = LoopLifecycle::new();
        lifecycle.start("test", |_| Vec::new()).await.unwrap();
        assert!(lifecycle.start("test", |_| Vec::new()).await.is_err());
    }
}
