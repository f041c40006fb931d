//! Typed notification queues for channel and pipeline lifecycle.
//!
//! Collaborators observe the pipeline by draining queues of plain enum
//! values rather than registering callbacks. Each channel owns one event
//! sender; the matching receiver is handed out at construction time.
//! Emission never blocks and never fails the emitting stage: if the
//! receiver is gone, the event is dropped.

use crate::channel::ChannelState;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events emitted by a channel over its lifetime.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The channel finished opening and is ready to send.
    Opened { id: Uuid, name: String },

    /// The channel closed. Emitted at most once per open/close cycle.
    Closed { id: Uuid, name: String },

    /// Any state transition, including the ones that also emit
    /// `Opened`/`Closed`.
    StateChanged {
        id: Uuid,
        name: String,
        from: ChannelState,
        to: ChannelState,
    },

    /// A send or receive operation failed, or an inbound message was not
    /// understood. Whether this also faults the pipeline context is the
    /// channel's configured error policy, not a property of the event.
    Error {
        id: Uuid,
        name: String,
        message: String,
    },

    /// An inbound payload was received and reconstructed.
    Received {
        id: Uuid,
        name: String,
        payload: Vec<u8>,
        content_type: String,
    },
}

/// Events emitted once per pipeline execution.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A filter reported an error. Fatal errors also fault the context.
    FilterError {
        filter: String,
        is_fatal: bool,
        message: String,
    },

    /// The binding failed. Always fatal for the execution.
    BindingError { binding: String, message: String },

    /// The binding completed and replaced the response content.
    BindingComplete { binding: String, status: u16 },

    /// The execution finished and a response was materialized.
    Completed { status: u16 },

    /// An unexpected failure was contained at the top boundary.
    Failed { message: String },
}

/// Sender half of an event queue. Cheap to clone; emission is best-effort.
#[derive(Debug, Clone)]
pub struct EventSink<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> EventSink<E> {
    /// Create a queue, returning the sink and the draining receiver.
    pub fn queue() -> (Self, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. A dropped receiver is not an error.
    pub fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }
}
