//! The core data model: references, events, pends, and runs (§3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waypost_core::{FlowRef, HostId, NodeId, RunId};

/// Opaque event/flow options: a JSON object of arbitrary shape.
pub type Opts = serde_json::Map<String, serde_json::Value>;

/// Reserved system event tags, emitted only by the engine (§6, §7).
pub mod tag {
    pub const SYS_PREFIX: &str = "sys.";
    pub const INBOUND_PREFIX: &str = "inbound.";

    pub const SYS_END_ALL: &str = "sys.end.all";
    pub const SYS_NODE_UPDATE: &str = "sys.node.update";
    pub const SYS_NODE_START: &str = "sys.node.start";
    pub const SYS_STATE: &str = "sys.state";
    pub const SYS_DATA_REQUIRED: &str = "sys.data.required";
    pub const TRIGGER_GOOD: &str = "trigger.good";
}

/// `(FlowRef, NodeID)` — identifies a single node inside a single flow definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub flow: FlowRef,
    pub node: NodeId,
}

impl NodeRef {
    #[must_use]
    pub fn new(flow: FlowRef, node: NodeId) -> Self {
        Self { flow, node }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.flow, self.node)
    }
}

/// `(FlowRef, HostID, RunID, AdoptedFlag)`.
///
/// A `RunRef` whose `adopted` flag is cleared designates a free trigger
/// event; setting it marks the event as belonging to an existing run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunRef {
    pub flow: FlowRef,
    pub host: HostId,
    pub run: RunId,
    pub adopted: bool,
}

impl RunRef {
    /// Builds a fresh, unadopted `RunRef` for a trigger event that has not
    /// yet been matched to any flow.
    #[must_use]
    pub fn unadopted(flow: FlowRef, host: HostId) -> Self {
        Self {
            flow,
            host,
            run: RunId::new(),
            adopted: false,
        }
    }

    /// Returns a copy of this ref with the adopted flag set, pinned to the
    /// given host and run id.
    #[must_use]
    pub fn adopt(&self, host: HostId, run: RunId) -> Self {
        Self {
            flow: self.flow.clone(),
            host,
            run,
            adopted: true,
        }
    }

    /// True iff this ref names an existing run rather than a free trigger.
    #[must_use]
    pub fn is_adopted(&self) -> bool {
        self.adopted
    }
}

impl std::fmt::Display for RunRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.flow, self.run, self.host)
    }
}

/// `(RunRef, SourceNode, Tag, Opts, Good)` — the single message type routed
/// by the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub run_ref: RunRef,
    pub source_node: NodeRef,
    pub tag: String,
    pub opts: Opts,
    pub good: bool,
}

impl Event {
    #[must_use]
    pub fn new(run_ref: RunRef, source_node: NodeRef, tag: impl Into<String>, opts: Opts, good: bool) -> Self {
        Self {
            run_ref,
            source_node,
            tag: tag.into(),
            opts,
            good,
        }
    }

    /// True iff this event's tag begins with `sys.` — such events are never
    /// re-routed to nodes (§3, §7 invariant 8).
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.tag.starts_with(tag::SYS_PREFIX)
    }

    /// True iff this event's tag begins with `inbound.` — a data-push event.
    #[must_use]
    pub fn is_inbound(&self) -> bool {
        self.tag.starts_with(tag::INBOUND_PREFIX)
    }
}

/// `(Ref, InitiatingEvent, EnqueuedAt)` — a flow instance waiting for admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pend {
    pub run_ref: RunRef,
    pub initiating_event: Event,
    pub enqueued_at: DateTime<Utc>,
}

/// Per-node timing/outcome record tracked while a run is active (§3, §4.2 `updateExecNode`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeExecRecord {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub good: bool,
    pub update: String,
}

/// Per-merge-node accumulator: which tags have contributed, and the shallow
/// merge of their opts (§4.2 `updateWithMergeEvent`, §4.3.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeAccumulator {
    pub tags_seen: std::collections::HashSet<String>,
    pub merged_opts: Opts,
}

/// The terminal disposition of a run (§3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Incomplete,
}

/// A `Pend` promoted to active: everything `RunStore` tracks while a flow
/// instance is executing (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_ref: RunRef,
    pub initiating_event: Event,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub node_execs: HashMap<NodeId, NodeExecRecord>,
    pub merges: HashMap<NodeId, MergeAccumulator>,
    pub data_forms: HashMap<NodeId, Opts>,
    pub status: Option<RunStatus>,
    pub good: Option<bool>,
    pub host: HostId,
}

impl Run {
    /// Promotes a `Pend` to an active `Run`, owned by `host`.
    #[must_use]
    pub fn activate(pend: Pend, host: HostId, started_at: DateTime<Utc>) -> Self {
        Self {
            run_ref: pend.run_ref,
            initiating_event: pend.initiating_event,
            enqueued_at: pend.enqueued_at,
            started_at,
            ended_at: None,
            node_execs: HashMap::new(),
            merges: HashMap::new(),
            data_forms: HashMap::new(),
            status: None,
            good: None,
            host,
        }
    }

    /// True once `end()` has stamped a terminal status.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}
