//! Per-host event-driven run engine for waypost.
//!
//! This crate provides the core of a single host's flow orchestration:
//!
//! - **Event Bus**: single-observer, FIFO in-process event queue
//! - **Run Store**: the pending/active/archive run collections and their
//!   persistence-backed mutations
//! - **Hub**: the engine that classifies inbound events, admits pending
//!   runs, dispatches to nodes, and ends runs
//! - **Contracts**: the node, flow-catalog, peer-host, workspace, and
//!   persistence traits this crate consumes but does not implement

pub mod bus;
pub mod clock;
pub mod conflict;
pub mod config;
pub mod contracts;
pub mod error;
pub mod hub;
pub mod model;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use bus::{EventBus, EventBusDriver, Observer};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ClusterConfig, ConfigError, HostConfig};
pub use contracts::{
    DataNode, EndNode, FindNodeResult, FlowCatalog, FlowHandle, MergeNode, MergeType, NodeError,
    NodeHandle, PeerConfig, PeerHostClient, PersistenceError, PersistenceStore, RefNode, TaskNode,
    UpdateReceiver, UpdateSender, Workspace, WorkspaceError, WorkspaceManager,
};
pub use error::{BusError, HubError, StoreError};
pub use hub::Hub;
pub use model::{Event, MergeAccumulator, NodeExecRecord, NodeRef, Opts, Pend, Run, RunRef, RunStatus};
pub use store::{FoundRun, RunStore};
