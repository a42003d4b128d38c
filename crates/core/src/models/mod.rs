pub mod health;
pub mod node;
pub mod peer;
pub mod response;
pub mod stats;
pub mod task;

pub use health::{HealthStats, NodeHealth, NodeUsage, ProbeResult, ProbeStatus};
pub use node::{NetworkResources, Node, NodeRole, NodeStatus, Resources};
pub use peer::{Heartbeat, Peer, PeerStatus};
pub use response::ApiResponse;
pub use stats::{ClusterInfo, ClusterStats, ClusterStatus, FailoverReport, ScaleReport, TaskStats};
pub use task::{
    Constraint, NetworkAttachment, Placement, Preference, RestartPolicy, Task, TaskPatch,
    TaskStatus, TaskType, TaskUpdate, VolumeMount,
};
