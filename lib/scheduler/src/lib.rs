//! The 1 Hz scheduler ticker for a waypost host (§4.3.3).
//!
//! This crate owns nothing but the timer loop: it wraps a `waypost_engine::Hub`
//! and repeatedly calls `distribute_all_pending` on a fixed interval, the way
//! the original host's `serviceLists` goroutine drove `distributeAllPending`
//! off `time.Tick(time.Second)`.

pub mod error;
pub mod ticker;

pub use error::SchedulerError;
pub use ticker::Ticker;
