//! Test data builders for nodes and tasks

use orchestrator_core::models::{
    Constraint, Node, NodeRole, NodeStatus, Resources, Task, TaskStatus, TaskType,
};

pub const GIB: i64 = 1024 * 1024 * 1024;

/// Builder for creating test Node entities
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            node: Node::new(
                "node-1",
                "node-1",
                "127.0.0.1",
                2376,
                NodeRole::Worker,
                Resources::new(2000, 4 * GIB, 50 * GIB),
            ),
        }
    }

    /// Manager node with 4000 millicores / 8Gi / 100Gi
    pub fn manager(id: &str) -> Self {
        Self::new()
            .with_id(id)
            .with_role(NodeRole::Manager)
            .with_resources(4000, 8 * GIB, 100 * GIB)
    }

    /// Worker node with 2000 millicores / 4Gi / 50Gi
    pub fn worker(id: &str) -> Self {
        Self::new().with_id(id).with_role(NodeRole::Worker)
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.node.id = id.to_string();
        self.node.name = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.node.name = name.to_string();
        self
    }

    pub fn with_address(mut self, address: &str, port: u32) -> Self {
        self.node.address = address.to_string();
        self.node.port = port;
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.node.role = role;
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.node.status = status;
        self
    }

    pub fn with_resources(mut self, cpu: i64, memory: i64, disk: i64) -> Self {
        self.node.resources = Resources::new(cpu, memory, disk);
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.node.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task::new("task-1", "test_task", "busybox:latest", Resources::new(1000, GIB, 0)),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.task.image = image.to_string();
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task.task_type = task_type;
        self
    }

    pub fn with_resources(mut self, cpu: i64, memory: i64) -> Self {
        self.task.resources.cpu = cpu;
        self.task.resources.memory = memory;
        self
    }

    pub fn with_disk(mut self, disk: i64) -> Self {
        self.task.resources.disk = disk;
        self
    }

    pub fn with_command(mut self, command: &[&str]) -> Self {
        self.task.command = command.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_constraint(mut self, key: &str, operator: &str, value: &str) -> Self {
        self.task.constraints.push(Constraint::new(key, operator, value));
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.task.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Presets status and node id, for seeding repositories directly
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn on_node(mut self, node_id: &str) -> Self {
        self.task.node_id = node_id.to_string();
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
