//! 编排器基础设施：内存注册表、有界分发队列、分发器与健康探测实现

pub mod dispatchers;
pub mod probes;
pub mod repositories;
pub mod task_queue;

pub use dispatchers::{LoopbackDispatcher, ProcessDispatcher};
pub use probes::{
    default_probes, DiskSpaceProbe, NetworkLatencyProbe, NodeUsageRegistry, ReachabilityProbe,
    ResourceHeadroomProbe,
};
pub use repositories::{InMemoryNodeRepository, InMemoryTaskRepository};
pub use task_queue::{BoundedTaskQueue, EnqueueError};
