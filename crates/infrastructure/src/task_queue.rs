use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// 入队失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    /// 队列已满（等待超时后仍然已满）
    Full(String),
    /// 队列已关闭
    Closed(String),
}

/// 有界任务分发队列
///
/// 队列元素为任务ID。接收端以 `Arc<Mutex<Receiver>>` 形式由多个工作协程共享，
/// 每个任务ID只会被一个工作协程取到。
#[derive(Debug, Clone)]
pub struct BoundedTaskQueue {
    sender: mpsc::Sender<String>,
    receiver: Arc<Mutex<mpsc::Receiver<String>>>,
    capacity: usize,
}

impl BoundedTaskQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            capacity,
        }
    }

    /// 非阻塞入队
    pub fn try_enqueue(&self, task_id: String) -> Result<(), EnqueueError> {
        self.sender.try_send(task_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(id) => EnqueueError::Full(id),
            mpsc::error::TrySendError::Closed(id) => EnqueueError::Closed(id),
        })
    }

    /// 入队，队列满时最多等待`wait`
    pub async fn enqueue(&self, task_id: String, wait: Duration) -> Result<(), EnqueueError> {
        if wait.is_zero() {
            return self.try_enqueue(task_id);
        }
        match self.sender.send_timeout(task_id, wait).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(id)) => {
                warn!("任务 {} 入队等待超时", id);
                Err(EnqueueError::Full(id))
            }
            Err(mpsc::error::SendTimeoutError::Closed(id)) => Err(EnqueueError::Closed(id)),
        }
    }

    /// 取出下一个任务ID，所有发送端关闭后返回None
    pub async fn dequeue(&self) -> Option<String> {
        let mut receiver = self.receiver.lock().await;
        let task_id = receiver.recv().await;
        if let Some(ref id) = task_id {
            debug!("从分发队列取出任务 {}", id);
        }
        task_id
    }

    /// 当前排队数量
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 剩余空位
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_and_len() {
        let queue = BoundedTaskQueue::new(4);
        queue.try_enqueue("a".to_string()).unwrap();
        queue.try_enqueue("b".to_string()).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.available(), 2);

        assert_eq!(queue.dequeue().await.as_deref(), Some("a"));
        assert_eq!(queue.dequeue().await.as_deref(), Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_wait() {
        let queue = BoundedTaskQueue::new(1);
        queue.try_enqueue("a".to_string()).unwrap();
        assert_eq!(
            queue.try_enqueue("b".to_string()),
            Err(EnqueueError::Full("b".to_string()))
        );
    }

    #[tokio::test]
    async fn test_enqueue_waits_for_room() {
        let queue = BoundedTaskQueue::new(1);
        queue.try_enqueue("a".to_string()).unwrap();

        let consumer = queue.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            consumer.dequeue().await
        });

        queue
            .enqueue("b".to_string(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(handle.await.unwrap().as_deref(), Some("a"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_times_out_when_full() {
        let queue = BoundedTaskQueue::new(1);
        queue.try_enqueue("a".to_string()).unwrap();
        let result = queue.enqueue("b".to_string(), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(EnqueueError::Full(_))));
    }
}
