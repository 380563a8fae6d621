//! In-memory test doubles for every external collaborator trait, following
//! the `InMemoryEventStore` / `EchoExecutor` / `MockExecutor` pattern used
//! throughout this workspace's lower crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use waypost_core::{FlowRef, HostId, NodeId, RunId};

use crate::contracts::{
    DataNode, EndNode, FindNodeResult, FlowCatalog, FlowHandle, MergeNode, MergeType, NodeError,
    NodeHandle, PeerConfig, PeerHostClient, PersistenceError, PersistenceStore, RefNode,
    TaskNode, UpdateSender, Workspace, WorkspaceError, WorkspaceManager,
};
use crate::model::{Event, NodeRef, Opts, RunRef};

/// A task node that always succeeds with a fixed status, echoing its input opts.
pub struct StubTaskNode {
    pub node_ref: NodeRef,
    pub status: i32,
}

impl StubTaskNode {
    #[must_use]
    pub fn good(node_ref: NodeRef) -> Self {
        Self { node_ref, status: 0 }
    }
}

impl RefNode for StubTaskNode {
    fn node_ref(&self) -> NodeRef {
        self.node_ref.clone()
    }

    fn get_tag(&self, sub: &str) -> String {
        format!("{}.{}", self.node_ref.node, sub)
    }
}

#[async_trait]
impl TaskNode for StubTaskNode {
    async fn execute(
        &self,
        _workspace: Option<Workspace>,
        opts: Opts,
        _updates: UpdateSender,
    ) -> Result<(i32, Opts), NodeError> {
        Ok((self.status, opts))
    }

    fn status(&self, status: i32) -> (String, bool) {
        if status == 0 {
            ("good".to_string(), true)
        } else {
            ("bad".to_string(), false)
        }
    }
}

/// A task node whose `execute` always returns an error.
pub struct FailingTaskNode {
    pub node_ref: NodeRef,
}

impl RefNode for FailingTaskNode {
    fn node_ref(&self) -> NodeRef {
        self.node_ref.clone()
    }

    fn get_tag(&self, sub: &str) -> String {
        format!("{}.{}", self.node_ref.node, sub)
    }
}

#[async_trait]
impl TaskNode for FailingTaskNode {
    async fn execute(
        &self,
        _workspace: Option<Workspace>,
        _opts: Opts,
        _updates: UpdateSender,
    ) -> Result<(i32, Opts), NodeError> {
        Err(NodeError("boom".to_string()))
    }

    fn status(&self, _status: i32) -> (String, bool) {
        ("bad".to_string(), false)
    }
}

/// A task node that emits a fixed sequence of updates before completing good.
pub struct UpdatingTaskNode {
    pub node_ref: NodeRef,
    pub updates: Vec<String>,
}

impl RefNode for UpdatingTaskNode {
    fn node_ref(&self) -> NodeRef {
        self.node_ref.clone()
    }

    fn get_tag(&self, sub: &str) -> String {
        format!("{}.{}", self.node_ref.node, sub)
    }
}

#[async_trait]
impl TaskNode for UpdatingTaskNode {
    async fn execute(
        &self,
        _workspace: Option<Workspace>,
        opts: Opts,
        updates: UpdateSender,
    ) -> Result<(i32, Opts), NodeError> {
        for update in &self.updates {
            let _ = updates.send(update.clone()).await;
        }
        Ok((0, opts))
    }

    fn status(&self, _status: i32) -> (String, bool) {
        ("good".to_string(), true)
    }
}

/// A merge node with a fixed type and wait count.
pub struct StubMergeNode {
    pub node_ref: NodeRef,
    pub node_type: MergeType,
    pub waits: usize,
}

impl RefNode for StubMergeNode {
    fn node_ref(&self) -> NodeRef {
        self.node_ref.clone()
    }

    fn get_tag(&self, sub: &str) -> String {
        format!("{}.{}", self.node_ref.node, sub)
    }
}

impl MergeNode for StubMergeNode {
    fn node_type(&self) -> MergeType {
        self.node_type
    }

    fn waits(&self) -> usize {
        self.waits
    }
}

/// A data node that returns `needs-more-data` until it has been called
/// `calls_before_accept` times, after which it accepts as good.
pub struct SequencedDataNode {
    pub node_ref: NodeRef,
    pub calls_before_accept: usize,
    calls: AtomicUsize,
}

impl SequencedDataNode {
    #[must_use]
    pub fn new(node_ref: NodeRef, calls_before_accept: usize) -> Self {
        Self {
            node_ref,
            calls_before_accept,
            calls: AtomicUsize::new(0),
        }
    }
}

impl RefNode for SequencedDataNode {
    fn node_ref(&self) -> NodeRef {
        self.node_ref.clone()
    }

    fn get_tag(&self, sub: &str) -> String {
        format!("{}.{}", self.node_ref.node, sub)
    }
}

#[async_trait]
impl DataNode for SequencedDataNode {
    async fn execute(&self, opts: Opts) -> Result<(i32, Opts), NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call + 1 < self.calls_before_accept {
            Ok((2, opts))
        } else {
            Ok((0, opts))
        }
    }
}

/// An end node: reaching it always terminates the run.
pub struct StubEndNode(pub NodeRef);

impl RefNode for StubEndNode {
    fn node_ref(&self) -> NodeRef {
        self.0.clone()
    }

    fn get_tag(&self, sub: &str) -> String {
        format!("{}.{}", self.0.node, sub)
    }
}

impl EndNode for StubEndNode {}

/// A hand-populated flow catalog: no parsing, no dynamic reconciliation,
/// just a fixed set of flows and subscriptions configured by the test.
#[derive(Default)]
pub struct FakeFlowCatalog {
    flows: HashMap<FlowRef, FlowHandle>,
    trigger_subs: HashMap<String, HashMap<FlowRef, NodeRef>>,
    tag_subs: HashMap<(FlowRef, String), Vec<NodeHandle>>,
}

impl FakeFlowCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_flow(&mut self, flow: FlowHandle) {
        self.flows.insert(flow.flow_ref.clone(), flow);
    }

    pub fn subscribe_trigger(&mut self, trigger_type: &str, flow: FlowRef, node: NodeRef) {
        self.trigger_subs
            .entry(trigger_type.to_string())
            .or_default()
            .insert(flow, node);
    }

    pub fn subscribe_tag(&mut self, flow: FlowRef, tag: &str, node: NodeHandle) {
        self.tag_subs
            .entry((flow, tag.to_string()))
            .or_default()
            .push(node);
    }
}

#[async_trait]
impl FlowCatalog for FakeFlowCatalog {
    async fn find_flows_by_triggers(
        &self,
        trigger_type: &str,
        flow_ref: Option<&FlowRef>,
        _opts: &Opts,
    ) -> HashMap<FlowRef, NodeRef> {
        let Some(candidates) = self.trigger_subs.get(trigger_type) else {
            return HashMap::new();
        };
        match flow_ref {
            Some(specific) => candidates
                .get(specific)
                .map(|n| HashMap::from([(specific.clone(), n.clone())]))
                .unwrap_or_default(),
            None => candidates.clone(),
        }
    }

    async fn find_flow(&self, flow_ref: &FlowRef, tag: &str, _opts: &Opts) -> Option<FlowHandle> {
        let flow = self.flows.get(flow_ref)?;
        let matched = self.trigger_subs.get(tag).and_then(|subs| subs.get(flow_ref));
        let nodes = matched
            .and_then(|node_ref| flow.nodes.get(&node_ref.node).map(|handle| (node_ref.node.clone(), handle.clone())))
            .into_iter()
            .collect();
        Some(FlowHandle { nodes, ..flow.clone() })
    }

    async fn flow(&self, flow_ref: &FlowRef) -> Option<FlowHandle> {
        self.flows.get(flow_ref).cloned()
    }

    async fn find_node_in_flow(&self, flow_ref: &FlowRef, tag: &str) -> FindNodeResult {
        if !self.flows.contains_key(flow_ref) {
            return FindNodeResult::FlowMissing;
        }
        let nodes = self
            .tag_subs
            .get(&(flow_ref.clone(), tag.to_string()))
            .cloned()
            .unwrap_or_default();
        FindNodeResult::Found(nodes)
    }
}

/// An in-memory key-value store standing in for the opaque persistence interface.
#[derive(Default)]
pub struct InMemoryPersistenceStore {
    data: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryPersistenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistenceStore {
    async fn save(&self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError> {
        self.data.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }
}

/// A workspace manager that hands out a fresh temp directory per call
/// (or memoizes one per run id when `reuse` is requested).
pub struct TempWorkspaceManager {
    root: tempfile::TempDir,
    reused: Mutex<HashMap<RunId, Workspace>>,
}

impl TempWorkspaceManager {
    /// # Panics
    /// Panics if a temp directory cannot be created; acceptable in test helpers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("create temp workspace root"),
            reused: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for TempWorkspaceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkspaceManager for TempWorkspaceManager {
    async fn acquire(&self, run: RunId, reuse: bool) -> Result<Workspace, WorkspaceError> {
        if reuse {
            let mut reused = self.reused.lock().unwrap();
            if let Some(ws) = reused.get(&run) {
                return Ok(ws.clone());
            }
            let path = self.root.path().join(run.to_string());
            std::fs::create_dir_all(&path).map_err(|e| WorkspaceError(e.to_string()))?;
            let ws = Workspace { path };
            reused.insert(run, ws.clone());
            Ok(ws)
        } else {
            let path = self.root.path().join(format!("{run}-{}", ulid::Ulid::new()));
            std::fs::create_dir_all(&path).map_err(|e| WorkspaceError(e.to_string()))?;
            Ok(Workspace { path })
        }
    }
}

/// A peer host client whose `attempt_execute` outcome and advertised tags
/// are fixed by the test.
pub struct MockPeerHostClient {
    pub host_id: HostId,
    pub tags: Vec<String>,
    pub accepts: bool,
    pub calls: Mutex<Vec<RunId>>,
}

impl MockPeerHostClient {
    #[must_use]
    pub fn new(host_id: impl Into<HostId>, tags: Vec<String>, accepts: bool) -> Self {
        Self {
            host_id: host_id.into(),
            tags,
            accepts,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PeerHostClient for MockPeerHostClient {
    fn host_id(&self) -> HostId {
        self.host_id.clone()
    }

    async fn get_config(&self) -> PeerConfig {
        PeerConfig {
            host_id: self.host_id.clone(),
            tags: self.tags.clone(),
            base_url: format!("http://{}", self.host_id),
        }
    }

    async fn tags_match(&self, required: &[String]) -> bool {
        required.iter().all(|t| self.tags.contains(t))
    }

    async fn attempt_execute(&self, run_ref: RunRef, _event: Event) -> bool {
        self.calls.lock().unwrap().push(run_ref.run);
        self.accepts
    }
}
