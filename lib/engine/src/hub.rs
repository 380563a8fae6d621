//! The Hub engine (§4.3): classifies inbound events, admits pending runs,
//! dispatches events to active-run nodes, and ends runs. Grounded directly
//! on the original `Hub.Notify` / `ExecutePending` / `distributeAllPending`
//! / `dispatchToActive` / `setFormData` / `executeNode` / `mergeEvent` /
//! `endRun` behavior.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};
use waypost_core::{FlowRef, HostId, NodeId};

use crate::bus::{EventBus, Observer};
use crate::config::HostConfig;
use crate::conflict::any_tags;
use crate::contracts::{
    FindNodeResult, FlowCatalog, MergeType, NodeHandle, PeerHostClient, WorkspaceManager,
    UPDATE_CHANNEL_CAPACITY,
};
use crate::error::HubError;
use crate::model::{tag, Event, NodeRef, Opts, Pend, Run, RunRef, RunStatus};
use crate::store::RunStore;

/// The per-host orchestration engine (§4.3). Owns no network surface of its
/// own: it is driven by the event bus on one side and the scheduler's 1 Hz
/// tick on the other.
///
/// Cheaply cloneable: every field is an `Arc` or an already-shared handle
/// (`EventBus` wraps an `mpsc::UnboundedSender`), so a clone can be moved
/// into a spawned task to run a single node execution concurrently with the
/// rest of dispatch, mirroring the original's `go h.executeNode(...)`.
#[derive(Clone)]
pub struct Hub {
    config: HostConfig,
    catalog: Arc<dyn FlowCatalog>,
    bus: EventBus,
    store: Arc<RunStore>,
    workspace: Arc<dyn WorkspaceManager>,
    peers: Vec<Arc<dyn PeerHostClient>>,
}

impl Hub {
    #[must_use]
    pub fn new(
        config: HostConfig,
        catalog: Arc<dyn FlowCatalog>,
        bus: EventBus,
        store: Arc<RunStore>,
        workspace: Arc<dyn WorkspaceManager>,
        peers: Vec<Arc<dyn PeerHostClient>>,
    ) -> Self {
        Self {
            config,
            catalog,
            bus,
            store,
            workspace,
            peers,
        }
    }

    #[must_use]
    pub fn host_id(&self) -> HostId {
        HostId::new(self.config.host_id.clone())
    }

    fn publish(&self, event: Event) {
        if let Err(e) = self.bus.publish(event) {
            error!(error = %e, "failed to publish event");
        }
    }

    /// Publishes `event` only if its run is still active (§4.3.7 `publishIfActive`).
    async fn publish_if_active(&self, event: Event) {
        if self.store.find_active_run(event.run_ref.run).is_some() {
            self.publish(event);
        }
    }

    /// §4.3.1: classifies an inbound event as a fresh trigger or a run-scoped
    /// event and routes it accordingly.
    pub async fn notify(&self, event: Event) {
        if !event.run_ref.is_adopted() {
            if let Err(e) = self.pend_flow_from_trigger(event).await {
                error!(error = %e, "trigger handling failed");
            }
            return;
        }
        self.dispatch_to_active(event).await;
    }

    /// §4.3.2: matches an inbound trigger event against the catalog's
    /// subscriptions and adds one pend per matching flow.
    async fn pend_flow_from_trigger(&self, mut event: Event) -> Result<(), HubError> {
        let Some(trigger_type) = event.tag.strip_prefix(tag::INBOUND_PREFIX) else {
            return Err(HubError::NotATrigger { tag: event.tag.clone() });
        };
        let trigger_type = trigger_type.trim_start_matches('.').to_string();

        // An unadopted event whose `RunRef.flow.name` is empty means "not
        // narrowed to a specific flow"; a non-empty name targets one flow,
        // mirroring the original's zero-value `FlowRef` sentinel.
        let specified_flow = if event.run_ref.flow.name.is_empty() {
            None
        } else {
            Some(event.run_ref.flow.clone())
        };

        let found = self
            .catalog
            .find_flows_by_triggers(&trigger_type, specified_flow.as_ref(), &event.opts)
            .await;
        if found.is_empty() {
            debug!(trigger_type = %trigger_type, "no matching flow for trigger");
            return Ok(());
        }

        event.tag = trigger_type.clone();

        for (flow, source_node) in found {
            let mut pend_event = event.clone();
            pend_event.source_node = source_node;
            let run_ref = self.add_to_pending(flow, self.host_id(), pend_event).await?;
            debug!(run_ref = %run_ref, trigger_type = %trigger_type, "added to pending from trigger");
        }
        Ok(())
    }

    async fn add_to_pending(&self, flow: FlowRef, host: HostId, event: Event) -> Result<RunRef, HubError> {
        let run_ref = self.store.add_to_pending(flow, host, event).await?;
        self.publish(Event::new(
            run_ref.clone(),
            NodeRef::new(run_ref.flow.clone(), NodeId::new("")),
            tag::SYS_STATE,
            opts_with_action("add-pend"),
            true,
        ));
        Ok(run_ref)
    }

    async fn remove_pend(&self, pend: &Pend) -> Result<(), HubError> {
        let removed = self.store.remove_pend(pend).await?;
        if removed {
            self.publish(Event::new(
                pend.run_ref.clone(),
                NodeRef::new(pend.run_ref.flow.clone(), NodeId::new("")),
                tag::SYS_STATE,
                opts_with_action("remove-pend"),
                true,
            ));
        }
        Ok(())
    }

    async fn activate(&self, pend: &Pend) -> Result<(), HubError> {
        self.store.activate(pend, self.host_id()).await?;
        self.publish(Event::new(
            pend.run_ref.clone(),
            NodeRef::new(pend.run_ref.flow.clone(), NodeId::new("")),
            tag::SYS_STATE,
            opts_with_action("activate"),
            true,
        ));
        Ok(())
    }

    /// §4.3.4: attempts to admit and activate a pend on this host. Returns
    /// `Ok(true)` iff the pend was dealt with here (admitted, or rejected as
    /// a permanent catalog miss); `Ok(false)` means retry later (conflict).
    pub async fn execute_pending(&self, pend: Pend) -> Result<bool, HubError> {
        debug!(run_ref = %pend.run_ref, tag = %pend.initiating_event.tag, "attempting to execute pending");

        let Some(flow) = self
            .catalog
            .find_flow(&pend.run_ref.flow, &pend.initiating_event.tag, &pend.initiating_event.opts)
            .await
        else {
            return Err(HubError::FlowNotFound { flow: pend.run_ref.flow.clone() });
        };

        let active_flows = self.store.active_flows();
        for active_flow_ref in &active_flows {
            let Some(active_flow) = self.catalog.flow(active_flow_ref).await else {
                error!(flow = %active_flow_ref, "active flow has no matching catalog entry");
                continue;
            };
            if any_tags(&active_flow.resource_tags, &flow.resource_tags) {
                debug!(
                    run_ref = %pend.run_ref,
                    candidate_tags = ?flow.resource_tags,
                    active_tags = ?active_flow.resource_tags,
                    "resource tag conflict, deferring",
                );
                return Ok(false);
            }
        }

        // Provision the workspace up front so a later allocation failure
        // during node execution cannot happen after the run is marked active.
        self.workspace.acquire(pend.run_ref.run, flow.reuse_space).await?;

        self.activate(&pend).await?;

        debug!(run_ref = %pend.run_ref, nodes = flow.nodes.len(), "triggering flow nodes");
        for node in flow.nodes.values() {
            self.publish(Event::new(
                pend.run_ref.clone(),
                node.node_ref(),
                tag::TRIGGER_GOOD,
                pend.initiating_event.opts.clone(),
                true,
            ));
        }

        Ok(true)
    }

    /// §4.3.3: the body the scheduler's 1 Hz ticker invokes. Walks every
    /// pending run and either executes it locally (standalone mode) or
    /// offers it to a peer (cluster mode).
    pub async fn distribute_all_pending(&self) {
        for pend in self.store.all_pends() {
            debug!(run_ref = %pend.run_ref, "pending - attempt dispatch");

            if self.peers.is_empty() {
                match self.execute_pending(pend.clone()).await {
                    Ok(true) => {
                        debug!(run_ref = %pend.run_ref, "job started locally");
                        if let Err(e) = self.remove_pend(&pend).await {
                            error!(error = %e, "could not save pending removal");
                        }
                    }
                    Ok(false) => debug!(run_ref = %pend.run_ref, "could not run job locally yet"),
                    Err(HubError::FlowNotFound { .. }) => {
                        error!(run_ref = %pend.run_ref, "pending flow not known, dropping pend");
                        if let Err(e) = self.remove_pend(&pend).await {
                            error!(error = %e, "could not save pending removal");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, run_ref = %pend.run_ref, "transient failure executing pending, will retry");
                    }
                }
                continue;
            }

            let Some(flow) = self
                .catalog
                .find_flow(&pend.run_ref.flow, &pend.initiating_event.tag, &pend.initiating_event.opts)
                .await
            else {
                error!(run_ref = %pend.run_ref, "pending flow not found, removing from pending");
                if let Err(e) = self.remove_pend(&pend).await {
                    error!(error = %e, "could not save pending removal");
                }
                continue;
            };

            let mut candidates = Vec::new();
            for peer in &self.peers {
                if peer.tags_match(&flow.host_tags).await {
                    candidates.push(peer.clone());
                }
            }
            debug!(run_ref = %pend.run_ref, candidates = candidates.len(), "found candidate hosts");

            let mut launched = false;
            for peer in candidates {
                if peer
                    .attempt_execute(pend.run_ref.clone(), pend.initiating_event.clone())
                    .await
                {
                    debug!(run_ref = %pend.run_ref, host = %peer.host_id(), "executed on peer");
                    if let Err(e) = self.remove_pend(&pend).await {
                        error!(error = %e, "could not save pending removal");
                    }
                    launched = true;
                    break;
                }
            }
            if !launched {
                debug!(run_ref = %pend.run_ref, "no available host yet");
            }
        }

        for stale in self.store.pends_older_than(chrono::Duration::seconds(
            self.config.pending_age_alert_secs as i64,
        )) {
            warn!(run_ref = %stale.run_ref, enqueued_at = %stale.enqueued_at, "pending run exceeds age alert threshold");
        }
    }

    /// §4.3.5: routes a run-scoped event to whatever in the flow subscribes to its tag.
    async fn dispatch_to_active(&self, event: Event) {
        if event.is_system() {
            return;
        }

        let Some(run) = self.store.find_active_run(event.run_ref.run) else {
            debug!(run_ref = %event.run_ref, tag = %event.tag, "event received but run not active, ignoring");
            return;
        };

        if event.is_inbound() {
            self.dispatch_inbound_data(run, event).await;
            return;
        }

        match self.catalog.find_node_in_flow(&run.run_ref.flow, &event.tag).await {
            FindNodeResult::FlowMissing => {
                error!(run_ref = %run.run_ref, tag = %event.tag, "no flow for event");
                self.end_run(&run, event.source_node, event.opts, RunStatus::Incomplete, false)
                    .await;
            }
            FindNodeResult::Found(nodes) if nodes.is_empty() => {
                self.dispatch_dangling(&run, event).await;
            }
            FindNodeResult::Found(nodes) => {
                self.dispatch_found_nodes(&run, nodes, event).await;
            }
        }
    }

    async fn dispatch_inbound_data(&self, run: Run, mut event: Event) {
        let Some(flow) = self.catalog.flow(&run.run_ref.flow).await else {
            error!(run_ref = %run.run_ref, flow = %run.run_ref.flow, "no flow for inbound data event");
            return;
        };
        let Some(stripped) = event.tag.strip_prefix(tag::INBOUND_PREFIX) else {
            return;
        };
        event.tag = stripped.trim_start_matches('.').to_string();

        let Some(node) = flow.node(&event.source_node.node) else {
            error!(run_ref = %run.run_ref, node = %event.source_node.node, "no node in flow for inbound data event");
            return;
        };
        let NodeHandle::Data(data_node) = node else {
            error!(run_ref = %run.run_ref, node = %event.source_node.node, "inbound data event targets a non-data node");
            return;
        };
        self.set_form_data(&run, data_node.clone(), event.opts).await;
    }

    /// A good event with no listener is end-of-run-incomplete or left
    /// dangling per `dangling_good_ends_run`; a bad event with no listener
    /// always ends the run as complete-but-bad (§9 open question 2).
    async fn dispatch_dangling(&self, run: &Run, event: Event) {
        if event.good {
            if self.config.dangling_good_ends_run {
                warn!(run_ref = %run.run_ref, tag = %event.tag, "nothing listening to good event, prematurely ending run");
                self.end_run(run, event.source_node, event.opts, RunStatus::Incomplete, true)
                    .await;
            } else {
                debug!(run_ref = %run.run_ref, tag = %event.tag, "nothing listening to good event, leaving dangling");
            }
        } else {
            debug!(run_ref = %run.run_ref, tag = %event.tag, "nothing listening to bad event, ending run as bad");
            self.end_run(run, event.source_node, event.opts, RunStatus::Complete, false)
                .await;
        }
    }

    async fn dispatch_found_nodes(&self, run: &Run, nodes: Vec<NodeHandle>, event: Event) {
        for node in nodes {
            match node {
                NodeHandle::End(end_node) => {
                    self.end_run(run, end_node.node_ref(), event.opts.clone(), RunStatus::Complete, event.good)
                        .await;
                    return;
                }
                NodeHandle::Data(data_node) => {
                    self.set_form_data(run, data_node, event.opts.clone()).await;
                }
                NodeHandle::Task(task_node) => {
                    let run = run.clone();
                    let event = event.clone();
                    let hub = self.clone();
                    tokio::spawn(async move {
                        hub.execute_node(&run, task_node, event).await;
                    });
                }
                NodeHandle::Merge(merge_node) => {
                    self.merge_event(run, merge_node, &event).await;
                }
            }
        }
    }

    /// §4.3.6: feeds inbound data to a data/form node, advancing it through
    /// `accepted-good` / `accepted-bad` / `needs-more-data`.
    async fn set_form_data(&self, run: &Run, node: Arc<dyn crate::contracts::DataNode>, opts: Opts) {
        let mut wrapped = Opts::new();
        wrapped.insert("values".to_string(), serde_json::Value::Object(opts));

        let (status, out_opts) = match node.execute(wrapped).await {
            Ok(result) => result,
            Err(e) => {
                error!(run_ref = %run.run_ref, error = %e, "data node execute failed");
                return;
            }
        };

        if let Err(e) = self.store.update_data_node(&run.run_ref, node.node_ref().node, out_opts.clone()).await {
            error!(run_ref = %run.run_ref, error = %e, "failed to persist data node state");
        }

        let event = match status {
            0 => Event::new(run.run_ref.clone(), node.node_ref(), node.get_tag("good"), out_opts, true),
            1 => Event::new(run.run_ref.clone(), node.node_ref(), node.get_tag("bad"), out_opts, false),
            _ => Event::new(run.run_ref.clone(), node.node_ref(), tag::SYS_DATA_REQUIRED, out_opts, true),
        };
        self.publish(event);
    }

    /// §4.3.7: runs a task node's `execute`, forwarding its update stream and
    /// publishing start/terminal events.
    async fn execute_node(&self, run: &Run, node: Arc<dyn crate::contracts::TaskNode>, event: Event) {
        let node_ref = node.node_ref();
        debug!(run_ref = %run.run_ref, tag = %event.tag, node = %node_ref.node, "executing node");

        let flow = self.catalog.flow(&run.run_ref.flow).await;
        let reuse = flow.as_ref().is_some_and(|f| f.reuse_space);
        let workspace = match self.workspace.acquire(run.run_ref.run, reuse).await {
            Ok(ws) => Some(ws),
            Err(e) => {
                debug!(run_ref = %run.run_ref, error = %e, "error getting workspace");
                return;
            }
        };

        let (tx, mut rx) = tokio::sync::mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let update_hub = self.clone();
        let update_run_ref = run.run_ref.clone();
        let update_node_ref = node_ref.clone();
        let forward_updates = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                update_hub
                    .publish_if_active(Event::new(
                        update_run_ref.clone(),
                        update_node_ref.clone(),
                        tag::SYS_NODE_UPDATE,
                        opts_with_update(&update),
                        true,
                    ))
                    .await;
                if let Err(e) = update_hub
                    .store
                    .update_exec_node(&update_run_ref, update_node_ref.node.clone(), None, None, false, update)
                    .await
                {
                    error!(error = %e, "failed to persist node update");
                }
            }
        });

        self.publish_if_active(Event::new(run.run_ref.clone(), node_ref.clone(), tag::SYS_NODE_START, Opts::new(), true))
            .await;

        let start = chrono::Utc::now();
        if let Err(e) = self
            .store
            .update_exec_node(&run.run_ref, node_ref.node.clone(), Some(start), None, false, String::new())
            .await
        {
            error!(error = %e, "failed to persist node start");
        }

        let result = node.execute(workspace, event.opts.clone(), tx).await;
        let _ = forward_updates.await;

        match result {
            Err(e) => {
                error!(run_ref = %run.run_ref, node = %node_ref.node, error = %e, "node execute produced error");
                self.publish_if_active(Event::new(
                    run.run_ref.clone(),
                    node_ref.clone(),
                    node.get_tag("error"),
                    Opts::new(),
                    false,
                ))
                .await;
                let end = chrono::Utc::now();
                if let Err(e) = self
                    .store
                    .update_exec_node(&run.run_ref, node_ref.node.clone(), None, Some(end), false, String::new())
                    .await
                {
                    error!(error = %e, "failed to persist node failure");
                }
            }
            Ok((status, out_opts)) => {
                let (tag_bit, good) = node.status(status);
                let end = chrono::Utc::now();
                if let Err(e) = self
                    .store
                    .update_exec_node(&run.run_ref, node_ref.node.clone(), None, Some(end), good, String::new())
                    .await
                {
                    error!(error = %e, "failed to persist node completion");
                }
                self.publish_if_active(Event::new(run.run_ref.clone(), node_ref.clone(), node.get_tag(&tag_bit), out_opts, good))
                    .await;
            }
        }
    }

    /// §4.3.8: records a merge node's inbound tag, firing the merge's good
    /// event once its `any`/`all` condition is satisfied.
    async fn merge_event(&self, run: &Run, node: Arc<dyn crate::contracts::MergeNode>, event: &Event) {
        let node_ref = node.node_ref();
        let (waits_done, opts) = match self
            .store
            .update_with_merge_event(&run.run_ref, node_ref.node.clone(), event.tag.clone(), event.opts.clone())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(run_ref = %run.run_ref, error = %e, "failed to persist merge event");
                return;
            }
        };

        let fires = match node.node_type() {
            MergeType::Any => waits_done == 1,
            MergeType::All => waits_done == node.waits(),
        };
        if fires {
            self.publish_if_active(Event::new(run.run_ref.clone(), node_ref.clone(), node.get_tag("good"), opts, true))
                .await;
        }
    }

    /// §4.3.9: marks a run ended, idempotently. Only the call that performs
    /// the transition publishes `sys.end.all`.
    async fn end_run(&self, run: &Run, source: NodeRef, opts: Opts, status: RunStatus, good: bool) {
        debug!(run_ref = %run.run_ref, ?status, good, "ending run");
        let did_end = match self.store.end(&run.run_ref, status, good).await {
            Ok(did_end) => did_end,
            Err(e) => {
                error!(run_ref = %run.run_ref, error = %e, "failed to persist run end");
                return;
            }
        };
        if !did_end {
            return;
        }
        self.publish(Event::new(run.run_ref.clone(), source, tag::SYS_END_ALL, opts, good));
    }
}

fn opts_with_action(action: &str) -> Opts {
    let mut opts = Opts::new();
    opts.insert("action".to_string(), serde_json::Value::String(action.to_string()));
    opts
}

fn opts_with_update(update: &str) -> Opts {
    let mut opts = Opts::new();
    opts.insert("update".to_string(), serde_json::Value::String(update.to_string()));
    opts
}

#[async_trait]
impl Observer for Hub {
    async fn notify(&self, event: Event) {
        Hub::notify(self, event).await;
    }
}
