//! Mock implementations of the dispatch, probe and failure-handler seams
//!
//! State lives behind `Arc<Mutex<..>>` so clones handed to the system under
//! test and the clone kept by the test observe the same data.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::models::{FailoverReport, Node, ProbeResult, ProbeStatus, Task};
use orchestrator_core::traits::{
    CompletionSender, HealthProbe, NodeFailureHandler, TaskCompletion, TaskDispatcher,
};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

/// How `MockDispatcher` answers dispatch calls
#[derive(Debug, Clone, PartialEq)]
pub enum MockDispatchMode {
    /// Accept and keep the completion handle until the test completes the task
    Hold,
    /// Accept and report success right away
    CompleteImmediately,
    /// Refuse the task
    Reject(String),
}

/// Mock implementation of TaskDispatcher for testing
#[derive(Debug, Clone)]
pub struct MockDispatcher {
    mode: Arc<Mutex<MockDispatchMode>>,
    dispatched: Arc<Mutex<Vec<(String, String)>>>,
    pending: Arc<Mutex<HashMap<String, CompletionSender>>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::with_mode(MockDispatchMode::Hold)
    }

    pub fn completing() -> Self {
        Self::with_mode(MockDispatchMode::CompleteImmediately)
    }

    pub fn rejecting(reason: &str) -> Self {
        Self::with_mode(MockDispatchMode::Reject(reason.to_string()))
    }

    pub fn with_mode(mode: MockDispatchMode) -> Self {
        Self {
            mode: Arc::new(Mutex::new(mode)),
            dispatched: Arc::new(Mutex::new(Vec::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn set_mode(&self, mode: MockDispatchMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// (task_id, node_id) pairs in dispatch order
    pub fn dispatched(&self) -> Vec<(String, String)> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }

    pub fn dispatch_count_for(&self, task_id: &str) -> usize {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == task_id)
            .count()
    }

    /// Report success for a held task; false if nothing is held for it
    pub fn complete(&self, task_id: &str) -> bool {
        self.finish(TaskCompletion::succeeded(task_id))
    }

    /// Report failure for a held task
    pub fn fail(&self, task_id: &str, reason: &str) -> bool {
        self.finish(TaskCompletion::failed(task_id, reason))
    }

    fn finish(&self, completion: TaskCompletion) -> bool {
        let sender = self.pending.lock().unwrap().remove(&completion.task_id);
        match sender {
            Some(sender) => sender.send(completion).is_ok(),
            None => false,
        }
    }
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskDispatcher for MockDispatcher {
    async fn dispatch(
        &self,
        task: &Task,
        node: &Node,
        completion: CompletionSender,
    ) -> OrchestratorResult<()> {
        let mode = self.mode.lock().unwrap().clone();
        if let MockDispatchMode::Reject(reason) = mode {
            return Err(OrchestratorError::Dispatch(reason));
        }

        self.dispatched
            .lock()
            .unwrap()
            .push((task.id.clone(), node.id.clone()));

        match mode {
            MockDispatchMode::CompleteImmediately => {
                let _ = completion.send(TaskCompletion::succeeded(&task.id));
            }
            _ => {
                self.pending
                    .lock()
                    .unwrap()
                    .insert(task.id.clone(), completion);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Probe returning a configurable status, optionally per node and after a delay
#[derive(Debug, Clone)]
pub struct StaticProbe {
    name: String,
    default_status: Arc<Mutex<ProbeStatus>>,
    per_node: Arc<Mutex<HashMap<String, ProbeStatus>>>,
    delay: Option<Duration>,
    calls: Arc<Mutex<usize>>,
}

impl StaticProbe {
    pub fn new(name: &str, status: ProbeStatus) -> Self {
        Self {
            name: name.to_string(),
            default_status: Arc::new(Mutex::new(status)),
            per_node: Arc::new(Mutex::new(HashMap::new())),
            delay: None,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn passing(name: &str) -> Self {
        Self::new(name, ProbeStatus::Passed)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_status(&self, status: ProbeStatus) {
        *self.default_status.lock().unwrap() = status;
    }

    pub fn set_node_status(&self, node_id: &str, status: ProbeStatus) {
        self.per_node
            .lock()
            .unwrap()
            .insert(node_id.to_string(), status);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self, node: &Node) -> ProbeResult {
        *self.calls.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let status = self
            .per_node
            .lock()
            .unwrap()
            .get(&node.id)
            .copied()
            .unwrap_or(*self.default_status.lock().unwrap());
        match status {
            ProbeStatus::Passed => ProbeResult::passed(&self.name, "ok"),
            ProbeStatus::Warning => ProbeResult::warning(&self.name, "degraded"),
            ProbeStatus::Failed => ProbeResult::failed(&self.name, "unhealthy"),
        }
    }
}

/// Failure handler that only records the calls it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingFailureHandler {
    failures: Arc<Mutex<Vec<String>>>,
    recoveries: Arc<Mutex<Vec<String>>>,
}

impl RecordingFailureHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }

    pub fn recoveries(&self) -> Vec<String> {
        self.recoveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeFailureHandler for RecordingFailureHandler {
    async fn handle_node_failure(&self, node_id: &str) -> OrchestratorResult<FailoverReport> {
        self.failures.lock().unwrap().push(node_id.to_string());
        Ok(FailoverReport {
            node_id: node_id.to_string(),
            ..Default::default()
        })
    }

    async fn handle_node_recovery(&self, node_id: &str) -> OrchestratorResult<()> {
        self.recoveries.lock().unwrap().push(node_id.to_string());
        Ok(())
    }
}
