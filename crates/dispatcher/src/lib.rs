//! Orchestrator control plane
//!
//! This crate assembles the cluster components: node registry and placement,
//! task lifecycle and dispatch workers, the periodic scheduler, node health
//! checking with failover, peer discovery, and the `ClusterManager` that owns
//! them all.

pub mod cluster_manager;
pub mod discovery;
pub mod failover;
pub mod health_checker;
pub mod lifecycle;
pub mod node_manager;
pub mod scheduler;
pub mod task_manager;

pub use cluster_manager::{ClusterManager, CLUSTER_VERSION};
pub use discovery::DiscoveryService;
pub use failover::FailoverCoordinator;
pub use health_checker::{HealthChecker, HealthRegistry};
pub use node_manager::NodeManager;
pub use scheduler::{SchedulePass, TaskScheduler};
pub use task_manager::TaskManager;
