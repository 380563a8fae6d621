//! Core identifier types and error handling shared across the waypost workspace.
//!
//! This crate provides the foundational types used throughout the flow
//! orchestrator: strongly-typed identifiers and a cross-cutting `Result`
//! alias. It is intentionally small and has no opinions about flows, runs,
//! or events — those live in `waypost-engine`.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{FlowRef, HostId, NodeId, ParseIdError, RunId};
