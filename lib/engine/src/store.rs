//! The run store (§4.2): the authoritative in-memory collection of
//! pending/active/archive runs, serialised through an opaque persistence
//! interface after every mutation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use waypost_core::{FlowRef, HostId, NodeId, RunId};

use crate::clock::SharedClock;
use crate::contracts::PersistenceStore;
use crate::error::StoreError;
use crate::model::{Event, MergeAccumulator, NodeExecRecord, Opts, Pend, Run, RunRef, RunStatus};

/// The three ordered collections tracked for a single flow definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FlowRuns {
    pending: Vec<Pend>,
    active: Vec<Run>,
    archive: Vec<Run>,
}

/// The result of `RunStore::find`: which collection a run was located in.
#[derive(Debug, Clone)]
pub enum FoundRun {
    Pending(Pend),
    Active(Run),
    Archived(Run),
}

fn persistence_key(flow: &FlowRef) -> String {
    format!("runstore:{flow}")
}

/// The authoritative, in-memory source of truth for run state. All
/// mutations are serialised through an internal lock and followed by a
/// persistence write; a failed write rolls the in-memory state back so
/// callers never observe a mutation that was not durably recorded.
pub struct RunStore {
    persistence: Arc<dyn PersistenceStore>,
    clock: SharedClock,
    state: Mutex<HashMap<FlowRef, FlowRuns>>,
}

impl RunStore {
    #[must_use]
    pub fn new(persistence: Arc<dyn PersistenceStore>, clock: SharedClock) -> Self {
        Self {
            persistence,
            clock,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Applies `mutate` to the flow's collections, persists the resulting
    /// document, and rolls back in memory if persistence fails.
    async fn mutate_and_persist<T>(
        &self,
        flow: &FlowRef,
        mutate: impl FnOnce(&mut FlowRuns) -> T,
    ) -> Result<T, StoreError> {
        let (result, snapshot, previous) = {
            let mut state = self.state.lock().unwrap();
            let entry = state.entry(flow.clone()).or_default();
            let previous = entry.clone();
            let result = mutate(entry);
            let snapshot = entry.clone();
            (result, snapshot, previous)
        };

        let doc = serde_json::to_value(&snapshot)
            .map_err(|e| StoreError::PersistenceFailed { reason: e.to_string() })?;

        match self.persistence.save(&persistence_key(flow), doc).await {
            Ok(()) => Ok(result),
            Err(e) => {
                let mut state = self.state.lock().unwrap();
                state.insert(flow.clone(), previous);
                Err(StoreError::PersistenceFailed { reason: e.to_string() })
            }
        }
    }

    /// Assigns a fresh `RunId`, builds a `Pend` from `event`, and appends it
    /// to `flow`'s pending list.
    pub async fn add_to_pending(
        &self,
        flow: FlowRef,
        host: HostId,
        mut event: Event,
    ) -> Result<RunRef, StoreError> {
        let run_ref = RunRef {
            flow: flow.clone(),
            host,
            run: RunId::new(),
            adopted: true,
        };
        event.run_ref = run_ref.clone();
        let enqueued_at = self.clock.now();
        let pend = Pend {
            run_ref: run_ref.clone(),
            initiating_event: event,
            enqueued_at,
        };

        self.mutate_and_persist(&flow, |runs| runs.pending.push(pend))
            .await?;
        Ok(run_ref)
    }

    /// An ordered snapshot of every pending run across all flows, oldest first.
    #[must_use]
    pub fn all_pends(&self) -> Vec<Pend> {
        let state = self.state.lock().unwrap();
        let mut pends: Vec<Pend> = state.values().flat_map(|r| r.pending.clone()).collect();
        pends.sort_by_key(|p| p.enqueued_at);
        pends
    }

    /// Removes `pend` from its flow's pending list. `removed = false` means
    /// it was already gone (no-op, no persistence write).
    pub async fn remove_pend(&self, pend: &Pend) -> Result<bool, StoreError> {
        let flow = pend.run_ref.flow.clone();
        let run_id = pend.run_ref.run;

        let already_present = {
            let state = self.state.lock().unwrap();
            state
                .get(&flow)
                .is_some_and(|runs| runs.pending.iter().any(|p| p.run_ref.run == run_id))
        };
        if !already_present {
            return Ok(false);
        }

        self.mutate_and_persist(&flow, |runs| {
            let before = runs.pending.len();
            runs.pending.retain(|p| p.run_ref.run != run_id);
            runs.pending.len() != before
        })
        .await
    }

    /// Moves a pend from pending to active. Fails if the run id is already
    /// active or the pend is not present in the pending list.
    pub async fn activate(&self, pend: &Pend, host: HostId) -> Result<(), StoreError> {
        let flow = pend.run_ref.flow.clone();
        let run_id = pend.run_ref.run;
        let started_at = self.clock.now();

        let already_active = {
            let state = self.state.lock().unwrap();
            state
                .values()
                .any(|runs| runs.active.iter().any(|r| r.run_ref.run == run_id))
        };
        if already_active {
            return Err(StoreError::AlreadyActive { run: run_id });
        }

        self.mutate_and_persist(&flow, |runs| -> Result<(), StoreError> {
            let idx = runs
                .pending
                .iter()
                .position(|p| p.run_ref.run == run_id)
                .ok_or(StoreError::PendNotFound { run: run_id })?;
            let removed = runs.pending.remove(idx);
            let run = Run::activate(removed, host, started_at);
            runs.active.push(run);
            Ok(())
        })
        .await?
    }

    /// The `FlowRef` of every currently active run (duplicates included),
    /// used for resource-tag conflict checks.
    #[must_use]
    pub fn active_flows(&self) -> Vec<FlowRef> {
        let state = self.state.lock().unwrap();
        state
            .iter()
            .flat_map(|(flow, runs)| std::iter::repeat_n(flow.clone(), runs.active.len()))
            .collect()
    }

    /// Finds an active run by id alone, searching every flow.
    #[must_use]
    pub fn find_active_run(&self, run_id: RunId) -> Option<Run> {
        let state = self.state.lock().unwrap();
        state
            .values()
            .find_map(|runs| runs.active.iter().find(|r| r.run_ref.run == run_id).cloned())
    }

    /// Records start/end timestamps, the good flag, and the latest update
    /// string for a node execution. `start`/`end` of `None` mean "leave
    /// unchanged".
    pub async fn update_exec_node(
        &self,
        run_ref: &RunRef,
        node: NodeId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        good: bool,
        update: String,
    ) -> Result<(), StoreError> {
        let run_id = run_ref.run;
        self.mutate_and_persist(&run_ref.flow, |runs| {
            if let Some(run) = runs.active.iter_mut().find(|r| r.run_ref.run == run_id) {
                let record = run.node_execs.entry(node).or_insert_with(NodeExecRecord::default);
                if let Some(start) = start {
                    record.start = Some(start);
                }
                if let Some(end) = end {
                    record.end = Some(end);
                }
                record.good = good;
                record.update = update;
            }
        })
        .await
    }

    /// Persists captured form state for a data node.
    pub async fn update_data_node(&self, run_ref: &RunRef, node: NodeId, opts: Opts) -> Result<(), StoreError> {
        let run_id = run_ref.run;
        self.mutate_and_persist(&run_ref.flow, |runs| {
            if let Some(run) = runs.active.iter_mut().find(|r| r.run_ref.run == run_id) {
                run.data_forms.insert(node, opts);
            }
        })
        .await
    }

    /// Records that `tag` arrived for the given merge node (idempotent per
    /// unique tag), shallow-merges `opts` into the node's accumulator, and
    /// returns the updated `(waitsDone, mergedOpts)`.
    pub async fn update_with_merge_event(
        &self,
        run_ref: &RunRef,
        node: NodeId,
        tag: String,
        opts: Opts,
    ) -> Result<(usize, Opts), StoreError> {
        let run_id = run_ref.run;
        self.mutate_and_persist(&run_ref.flow, |runs| {
            let Some(run) = runs.active.iter_mut().find(|r| r.run_ref.run == run_id) else {
                return (0, Opts::new());
            };
            let acc = run.merges.entry(node).or_insert_with(MergeAccumulator::default);
            if acc.tags_seen.insert(tag) {
                for (k, v) in opts {
                    acc.merged_opts.insert(k, v);
                }
            }
            (acc.tags_seen.len(), acc.merged_opts.clone())
        })
        .await
    }

    /// Atomically moves an active run to the archive and stamps its final
    /// status. Returns `true` iff this call effected the transition.
    pub async fn end(&self, run_ref: &RunRef, status: RunStatus, good: bool) -> Result<bool, StoreError> {
        let run_id = run_ref.run;
        let ended_at = self.clock.now();

        let was_active = {
            let state = self.state.lock().unwrap();
            state
                .get(&run_ref.flow)
                .is_some_and(|runs| runs.active.iter().any(|r| r.run_ref.run == run_id))
        };
        if !was_active {
            return Ok(false);
        }

        self.mutate_and_persist(&run_ref.flow, |runs| {
            let Some(idx) = runs.active.iter().position(|r| r.run_ref.run == run_id) else {
                return false;
            };
            let mut run = runs.active.remove(idx);
            run.ended_at = Some(ended_at);
            run.status = Some(status);
            run.good = Some(good);
            runs.archive.push(run);
            true
        })
        .await
    }

    /// Snapshots a flow's three collections.
    #[must_use]
    pub fn all_runs(&self, flow: &FlowRef) -> (Vec<Pend>, Vec<Run>, Vec<Run>) {
        let state = self.state.lock().unwrap();
        match state.get(flow) {
            Some(runs) => (runs.pending.clone(), runs.active.clone(), runs.archive.clone()),
            None => (Vec::new(), Vec::new(), Vec::new()),
        }
    }

    /// Searches all three collections of `flow` for `run_id`.
    #[must_use]
    pub fn find(&self, flow: &FlowRef, run_id: RunId) -> Option<FoundRun> {
        let state = self.state.lock().unwrap();
        let runs = state.get(flow)?;
        if let Some(p) = runs.pending.iter().find(|p| p.run_ref.run == run_id) {
            return Some(FoundRun::Pending(p.clone()));
        }
        if let Some(r) = runs.active.iter().find(|r| r.run_ref.run == run_id) {
            return Some(FoundRun::Active(r.clone()));
        }
        if let Some(r) = runs.archive.iter().find(|r| r.run_ref.run == run_id) {
            return Some(FoundRun::Archived(r.clone()));
        }
        None
    }

    /// Pending items older than `threshold` as of `now` — a hook for
    /// alerting, not for cancellation (§5 "Cancellation / timeouts").
    #[must_use]
    pub fn pends_older_than(&self, threshold: Duration) -> Vec<Pend> {
        let now = self.clock.now();
        self.all_pends()
            .into_iter()
            .filter(|p| now - p.enqueued_at > threshold)
            .collect()
    }
}
