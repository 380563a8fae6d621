//! The in-process event bus (§4.1).
//!
//! A single-writer-safe, multi-publisher queue with exactly one registered
//! observer in this engine (the Hub). `publish` enqueues; a dedicated
//! delivery task invokes `Observer::notify` on the registered observer one
//! event at a time, in the order publishers enqueued them, so observers
//! never see two events concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::model::Event;

/// Receives events from the bus, one at a time, in FIFO order.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn notify(&self, event: Event);
}

/// The publish side of the bus. Cheaply cloneable; every clone enqueues onto
/// the same delivery queue.
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventBus {
    /// Creates a fresh bus along with the driver that will deliver its
    /// events once an observer registers.
    #[must_use]
    pub fn new() -> (Self, EventBusDriver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, EventBusDriver { receiver })
    }

    /// Enqueues an event for delivery. Returns an error only if the bus's
    /// delivery task has already shut down.
    pub fn publish(&self, event: Event) -> Result<(), BusError> {
        self.sender.send(event).map_err(|_| BusError::Closed)
    }
}

/// Owns the receiving half of the bus until an observer registers.
///
/// Splitting construction this way lets the observer (the Hub) hold a clone
/// of the `EventBus` it publishes through while also being the thing the bus
/// delivers to, without a circular initialization.
pub struct EventBusDriver {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventBusDriver {
    /// Registers `observer` and spawns the delivery task. Consumes the
    /// driver: a bus has exactly one observer for its lifetime.
    pub fn register(self, observer: Arc<dyn Observer>) -> tokio::task::JoinHandle<()> {
        let mut receiver = self.receiver;
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                observer.notify(event).await;
            }
        })
    }
}
