//! Error types for the engine crate.
//!
//! Each subsystem gets its own plain enum with manual `Display`/`Error`
//! impls; higher-level errors wrap the lower ones for context rather than
//! flattening them into strings.

use std::fmt;

use waypost_core::{FlowRef, RunId};

use crate::contracts::WorkspaceError;

/// Errors from the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus's delivery task has shut down; no further events can be published.
    Closed,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "event bus is closed"),
        }
    }
}

impl std::error::Error for BusError {}

/// Errors from run store operations (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `activate` was called for a pend that is not in the pending set.
    PendNotFound { run: RunId },
    /// `activate` was called for a run id that is already active.
    AlreadyActive { run: RunId },
    /// The configured `PersistenceStore` failed to save or load a document.
    PersistenceFailed { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendNotFound { run } => write!(f, "pend not found: {run}"),
            Self::AlreadyActive { run } => write!(f, "run already active: {run}"),
            Self::PersistenceFailed { reason } => write!(f, "persistence failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors surfaced by the Hub engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The flow catalog has no flow matching the given reference/tag/opts.
    FlowNotFound { flow: FlowRef },
    /// A run store operation failed.
    Store(StoreError),
    /// The event bus could not accept a publish.
    Bus(BusError),
    /// Workspace allocation failed for a run.
    Workspace(WorkspaceError),
    /// An unadopted event was handed to trigger matching without an
    /// `inbound.` tag prefix.
    NotATrigger { tag: String },
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlowNotFound { flow } => write!(f, "flow not found: {flow}"),
            Self::Store(e) => write!(f, "run store operation failed: {e}"),
            Self::Bus(e) => write!(f, "event bus operation failed: {e}"),
            Self::Workspace(e) => write!(f, "workspace operation failed: {e}"),
            Self::NotATrigger { tag } => {
                write!(f, "event dispatched to triggers does not have inbound tag prefix: {tag}")
            }
        }
    }
}

impl std::error::Error for HubError {}

impl From<StoreError> for HubError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<BusError> for HubError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<WorkspaceError> for HubError {
    fn from(e: WorkspaceError) -> Self {
        Self::Workspace(e)
    }
}
