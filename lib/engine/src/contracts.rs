//! Consumed external collaborators (§4.4, §6): node capability traits, the
//! flow catalog, the peer-host client, the workspace manager, and the
//! opaque persistence store. None of these are implemented by this crate in
//! production — the engine only defines the shape it needs from them.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use waypost_core::{FlowRef, HostId, NodeId, RunId};

use crate::model::{NodeRef, Opts, RunRef};

/// Error returned by a node's `execute` method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeError(pub String);

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node execution error: {}", self.0)
    }
}

impl std::error::Error for NodeError {}

/// A filesystem workspace allocated for a run, per the flow's `ReuseSpace`
/// policy (§5, §9 "Back-references").
#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
}

/// The producer side of a task node's update stream (§4.3.7, §9 "Update streams").
pub type UpdateSender = tokio::sync::mpsc::Sender<String>;
/// The consumer side of a task node's update stream.
pub type UpdateReceiver = tokio::sync::mpsc::Receiver<String>;

/// Capacity of the bounded update-stream channel opened per task execution.
pub const UPDATE_CHANNEL_CAPACITY: usize = 16;

/// Behavior shared by every node kind: its identity and its emission-tag
/// naming scheme (§6 "Node contract").
pub trait RefNode: Send + Sync {
    fn node_ref(&self) -> NodeRef;
    fn get_tag(&self, sub: &str) -> String;
}

/// A task node: the default executable unit of a flow (§4.3.7).
#[async_trait]
pub trait TaskNode: RefNode {
    /// Runs the node's work. `workspace` is `None` when the flow's
    /// `ReuseSpace` policy and dispatch context do not provide one.
    async fn execute(
        &self,
        workspace: Option<Workspace>,
        opts: Opts,
        updates: UpdateSender,
    ) -> Result<(i32, Opts), NodeError>;

    /// Maps an `execute` exit status to `(tagBit, good)`.
    fn status(&self, status: i32) -> (String, bool);
}

/// The declared synchronization type of a merge node (§3, §4.3.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeType {
    Any,
    All,
}

impl fmt::Display for MergeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::All => write!(f, "all"),
        }
    }
}

/// A merge node: a synchronization barrier over one or more predecessor tags (§4.3.8).
pub trait MergeNode: RefNode {
    fn node_type(&self) -> MergeType;
    /// The number of distinct input tags an "all" merge must see before firing.
    fn waits(&self) -> usize;
}

/// A data/form gate node (§4.3.6). Status codes: `0` accepted-good, `1`
/// accepted-bad, `2` needs-more-data.
#[async_trait]
pub trait DataNode: RefNode {
    async fn execute(&self, opts: Opts) -> Result<(i32, Opts), NodeError>;
}

/// A terminator node: reaching it always ends the run (§4.3.5).
pub trait EndNode: RefNode {}

/// The tagged variant replacing the structural subtype groups of the
/// original node hierarchy (§9 "Node polymorphism").
#[derive(Clone)]
pub enum NodeHandle {
    Task(Arc<dyn TaskNode>),
    Merge(Arc<dyn MergeNode>),
    Data(Arc<dyn DataNode>),
    End(Arc<dyn EndNode>),
}

impl NodeHandle {
    #[must_use]
    pub fn node_ref(&self) -> NodeRef {
        match self {
            Self::Task(n) => n.node_ref(),
            Self::Merge(n) => n.node_ref(),
            Self::Data(n) => n.node_ref(),
            Self::End(n) => n.node_ref(),
        }
    }
}

/// A flow definition as exposed by the catalog: enough to drive dispatch
/// and scheduling without this crate owning the graph itself (§6 "Flow
/// catalog contract").
#[derive(Clone)]
pub struct FlowHandle {
    pub flow_ref: FlowRef,
    pub resource_tags: Vec<String>,
    pub host_tags: Vec<String>,
    pub reuse_space: bool,
    pub nodes: HashMap<NodeId, NodeHandle>,
}

impl FlowHandle {
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&NodeHandle> {
        self.nodes.get(id)
    }
}

/// The outcome of looking up nodes subscribed to a tag within a flow
/// (§4.3.5, §6 `FindNodeInFlow`).
pub enum FindNodeResult {
    /// The flow itself is not known to the catalog.
    FlowMissing,
    /// The flow is known; zero or more nodes subscribe to the tag.
    Found(Vec<NodeHandle>),
}

/// Lookup of flow definitions by reference, trigger tag, and event options
/// (§6 "Flow catalog contract"). Implemented externally; this crate only
/// consumes it.
#[async_trait]
pub trait FlowCatalog: Send + Sync {
    /// Finds every flow subscribed to `trigger_type`, optionally narrowed to
    /// a single flow, returning the first matching subscription node per flow.
    async fn find_flows_by_triggers(
        &self,
        trigger_type: &str,
        flow_ref: Option<&FlowRef>,
        opts: &Opts,
    ) -> HashMap<FlowRef, NodeRef>;

    /// Re-resolves a flow at admission time by `(flowRef, tag, opts)`. The
    /// returned handle's `nodes` is scoped to the subscription node(s)
    /// matching `tag`, not the flow's complete node map — admission fires
    /// one `trigger.good` per matched subscription, never per node in the
    /// flow.
    async fn find_flow(&self, flow_ref: &FlowRef, tag: &str, opts: &Opts) -> Option<FlowHandle>;

    /// Looks up a flow by reference alone (used for active-flow conflict checks).
    async fn flow(&self, flow_ref: &FlowRef) -> Option<FlowHandle>;

    /// Finds all nodes within a flow that subscribe to `tag`.
    async fn find_node_in_flow(&self, flow_ref: &FlowRef, tag: &str) -> FindNodeResult;
}

/// This host's advertised configuration, and the shape returned by a peer's
/// `GetConfig` (§4.4).
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub host_id: HostId,
    pub tags: Vec<String>,
    pub base_url: String,
}

/// A peer host reachable over the (external) inter-host RPC transport (§4.4).
#[async_trait]
pub trait PeerHostClient: Send + Sync {
    fn host_id(&self) -> HostId;
    async fn get_config(&self) -> PeerConfig;
    /// True iff this peer's advertised tags are a superset of `required`.
    async fn tags_match(&self, required: &[String]) -> bool;
    /// The remote mirror of `ExecutePending`: true iff the peer admitted and
    /// activated the pend.
    async fn attempt_execute(&self, run_ref: RunRef, event: crate::model::Event) -> bool;
}

/// Error returned by a `WorkspaceManager`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceError(pub String);

impl fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workspace allocation failed: {}", self.0)
    }
}

impl std::error::Error for WorkspaceError {}

/// Allocates or reuses a filesystem workspace per run (§5).
#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// `reuse = true` means a single workspace is shared across every task
    /// node of the run; `false` means a fresh workspace per call.
    async fn acquire(&self, run: RunId, reuse: bool) -> Result<Workspace, WorkspaceError>;
}

/// Error returned by a `PersistenceStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceError(pub String);

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "persistence error: {}", self.0)
    }
}

impl std::error::Error for PersistenceError {}

/// The opaque key-value store the run store persists through (§6 "Persisted
/// state layout").
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save(&self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError>;
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, PersistenceError>;
}
