//! Cluster federation (C1, C2): per-cluster transport, the cluster table,
//! health scoring, and selection.

pub mod client;
pub mod registry;
pub mod types;
pub mod wire;

pub use client::{ClusterClient, MockClusterClient, ZmqClusterTransport};
pub use registry::ClusterRegistry;
pub use types::{
    Capabilities, Cluster, ClusterHealthState, ClusterStatus, Criteria, HealthTransition, Region,
    SelectionPriority, TlsMaterial,
};
