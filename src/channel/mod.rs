//! Stateful channel endpoints and their lifecycle.
//!
//! A [`Channel`] is a named, long-lived endpoint that sends payloads out
//! through a [`Transport`] and, when subscribed, delivers inbound payloads
//! back as [`ChannelEvent::Received`] notifications. One channel instance
//! serves many concurrent pipeline executions; every state mutation runs
//! under a single async mutex so the open/reopen/send sequence is
//! serialized per instance.
//!
//! The offload protocol is implemented once, in [`crate::offload`], and
//! applied here to every transport uniformly.

pub mod http;
pub mod memory;
pub mod transport;

pub use http::HttpTransport;
pub use memory::InMemoryTransport;
pub use transport::{Transport, TransportMessage};

use crate::error::{PipelineError, Result};
use crate::events::{ChannelEvent, EventSink};
use crate::filter::ExecutionRequirement;
use crate::offload::OffloadCodec;
use crate::store::BulkStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Lifecycle states of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    /// Constructed, never opened.
    None,
    /// Connect in progress.
    Opening,
    /// Ready to send and receive.
    Open,
    /// Disconnect in progress.
    Closing,
    /// Disconnected. Reopenable.
    Closed,
    /// A send or connect failed; the next send closes and reopens.
    Faulted,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::None => "None",
            ChannelState::Opening => "Opening",
            ChannelState::Open => "Open",
            ChannelState::Closing => "Closing",
            ChannelState::Closed => "Closed",
            ChannelState::Faulted => "Faulted",
        };
        f.write_str(s)
    }
}

/// What a channel error does to the pipeline context.
///
/// This choice is part of the channel's configuration so fail-open vs.
/// fail-closed is always an explicit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Log and emit the error; the pipeline continues.
    #[default]
    FailOpen,

    /// Log and emit the error, and mark the context fatal.
    FailClosed,
}

/// Size tier of the backing transport. Determines the default in-band
/// message ceiling; the exact numbers are defaults only, never load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SizeTier {
    #[default]
    Standard,
    Premium,
}

impl SizeTier {
    /// Default in-band ceiling in bytes for this tier.
    pub fn default_ceiling(self) -> usize {
        match self {
            SizeTier::Standard => 262_144,
            SizeTier::Premium => 1_048_576,
        }
    }
}

/// Configuration for one channel instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Stable channel name (for logs, events, and blob key prefixes).
    pub name: String,

    /// Gate deciding whether the orchestrator invokes this channel.
    #[serde(default)]
    pub execution_requirement: ExecutionRequirement,

    /// Size tier of the backing transport.
    #[serde(default)]
    pub size_tier: SizeTier,

    /// Explicit in-band ceiling override, in bytes.
    #[serde(default)]
    pub max_message_size: Option<usize>,

    /// Bulk store container for offloaded payloads.
    #[serde(default = "default_offload_container")]
    pub offload_container: String,

    /// Whether channel errors fault the pipeline context.
    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Descriptive capability metadata; not behavior-affecting here.
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_offload_container() -> String {
    "offload".to_string()
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            execution_requirement: ExecutionRequirement::default(),
            size_tier: SizeTier::default(),
            max_message_size: None,
            offload_container: default_offload_container(),
            error_policy: ErrorPolicy::default(),
            is_authenticated: false,
            is_encrypted: false,
            port: None,
        }
    }

    pub fn with_requirement(mut self, requirement: ExecutionRequirement) -> Self {
        self.execution_requirement = requirement;
        self
    }

    pub fn with_tier(mut self, tier: SizeTier) -> Self {
        self.size_tier = tier;
        self
    }

    /// Override the tier's default ceiling with an explicit byte count.
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = Some(bytes);
        self
    }

    pub fn with_offload_container(mut self, container: impl Into<String>) -> Self {
        self.offload_container = container.into();
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// The ceiling actually used: the explicit override if set, else the
    /// tier default.
    pub fn effective_ceiling(&self) -> usize {
        self.max_message_size
            .unwrap_or_else(|| self.size_tier.default_ceiling())
    }
}

struct Inner {
    state: ChannelState,
    transport: Box<dyn Transport>,
    shutdown: Option<watch::Sender<bool>>,
    listener: Option<JoinHandle<()>>,
}

/// A stateful endpoint shared across concurrent pipeline executions.
///
/// The orchestrator drives the lifecycle through [`send`](Self::send):
/// a channel found in `None` is opened, a channel found in any other
/// non-`Open` state is closed and reopened, and only then is the payload
/// encoded (offloading if oversized) and handed to the transport.
pub struct Channel {
    id: Uuid,
    config: ChannelConfig,
    codec: OffloadCodec,
    store: Arc<dyn BulkStore>,
    events: EventSink<ChannelEvent>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("ceiling", &self.codec.ceiling())
            .finish()
    }
}

impl Channel {
    /// Build a channel over a transport and bulk store.
    ///
    /// Returns the channel together with the receiver draining its event
    /// queue. Dropping the receiver silences events without affecting the
    /// channel.
    pub fn new(
        config: ChannelConfig,
        transport: Box<dyn Transport>,
        store: Arc<dyn BulkStore>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, events_rx) = EventSink::queue();
        let codec = OffloadCodec::new(
            config.name.clone(),
            config.effective_ceiling(),
            config.offload_container.clone(),
        );
        let channel = Self {
            id: Uuid::new_v4(),
            config,
            codec,
            store,
            events,
            inner: Mutex::new(Inner {
                state: ChannelState::None,
                transport,
                shutdown: None,
                listener: None,
            }),
        };
        (channel, events_rx)
    }

    /// Unique id of this instantiation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stable channel name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn execution_requirement(&self) -> ExecutionRequirement {
        self.config.execution_requirement
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.config.error_policy
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ChannelState {
        self.inner.lock().await.state
    }

    /// Open the channel. No-op when already open.
    pub async fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.open_locked(&mut inner).await
    }

    /// Close the channel, stopping any listen loop first.
    ///
    /// Idempotent: closing an already-closed (or never-opened) channel
    /// does nothing and fires no second `Closed` event.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.close_locked(&mut inner).await
    }

    /// Send a payload, opening or reopening the channel as needed.
    ///
    /// The payload is encoded per the offload protocol against this
    /// channel's ceiling. A failure is emitted once as an error event and
    /// faults the channel; it is not retried here.
    pub async fn send(&self, payload: Vec<u8>, content_type: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.heal_locked(&mut inner).await?;

        let message = match self
            .codec
            .encode(self.store.as_ref(), payload, content_type)
            .await
        {
            Ok(message) => message,
            Err(e) => return Err(self.fault_locked(&mut inner, e)),
        };

        match inner.transport.send(message).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fault_locked(&mut inner, e)),
        }
    }

    /// Start the asynchronous listen loop.
    ///
    /// Inbound transport messages are decoded per the offload protocol and
    /// surface as [`ChannelEvent::Received`]; a message with no
    /// recognizable tag surfaces as a non-fatal [`ChannelEvent::Error`]
    /// instead. The loop stops on [`close`](Self::close), finishing the
    /// message it already dequeued. Calling `receive` while already
    /// listening is a no-op.
    pub async fn receive(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.listener.is_some() {
            return Ok(());
        }
        self.heal_locked(&mut inner).await?;

        let rx = match inner.transport.subscribe().await {
            Ok(rx) => rx,
            Err(e) => return Err(self.fault_locked(&mut inner, e)),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(listen_loop(
            rx,
            shutdown_rx,
            self.codec.clone(),
            Arc::clone(&self.store),
            self.events.clone(),
            self.id,
            self.config.name.clone(),
        ));
        inner.shutdown = Some(shutdown_tx);
        inner.listener = Some(handle);
        Ok(())
    }

    /// Bring the channel to `Open` per the lifecycle rules: `None` opens
    /// directly, anything else non-`Open` closes then reopens.
    async fn heal_locked(&self, inner: &mut Inner) -> Result<()> {
        match inner.state {
            ChannelState::Open => Ok(()),
            ChannelState::None => self.open_locked(inner).await,
            _ => {
                self.close_locked(inner).await?;
                self.open_locked(inner).await
            }
        }
    }

    async fn open_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.state == ChannelState::Open {
            return Ok(());
        }
        self.transition(inner, ChannelState::Opening);
        match inner.transport.connect().await {
            Ok(()) => {
                self.transition(inner, ChannelState::Open);
                self.events.emit(ChannelEvent::Opened {
                    id: self.id,
                    name: self.config.name.clone(),
                });
                tracing::debug!(channel = %self.config.name, "channel opened");
                Ok(())
            }
            Err(e) => Err(self.fault_locked(inner, e)),
        }
    }

    async fn close_locked(&self, inner: &mut Inner) -> Result<()> {
        if matches!(inner.state, ChannelState::Closed | ChannelState::None) {
            return Ok(());
        }
        self.transition(inner, ChannelState::Closing);

        // Stop the listener before disconnecting so no Received event can
        // fire after the close notification.
        if let Some(shutdown) = inner.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(listener) = inner.listener.take() {
            let _ = listener.await;
        }

        let result = inner.transport.disconnect().await;
        self.transition(inner, ChannelState::Closed);
        self.events.emit(ChannelEvent::Closed {
            id: self.id,
            name: self.config.name.clone(),
        });
        tracing::debug!(channel = %self.config.name, "channel closed");
        result
    }

    /// Emit the error event once, move to `Faulted`, and hand the error back.
    fn fault_locked(&self, inner: &mut Inner, error: PipelineError) -> PipelineError {
        tracing::warn!(channel = %self.config.name, error = %error, "channel error");
        self.events.emit(ChannelEvent::Error {
            id: self.id,
            name: self.config.name.clone(),
            message: error.to_string(),
        });
        self.transition(inner, ChannelState::Faulted);
        error
    }

    fn transition(&self, inner: &mut Inner, to: ChannelState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        self.events.emit(ChannelEvent::StateChanged {
            id: self.id,
            name: self.config.name.clone(),
            from,
            to,
        });
    }
}

async fn listen_loop(
    mut rx: mpsc::Receiver<TransportMessage>,
    mut shutdown: watch::Receiver<bool>,
    codec: OffloadCodec,
    store: Arc<dyn BulkStore>,
    events: EventSink<ChannelEvent>,
    id: Uuid,
    name: String,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            message = rx.recv() => {
                let Some(message) = message else { break };
                match codec.decode(store.as_ref(), message).await {
                    Ok((payload, content_type)) => {
                        events.emit(ChannelEvent::Received {
                            id,
                            name: name.clone(),
                            payload,
                            content_type,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(channel = %name, error = %e, "inbound message dropped");
                        events.emit(ChannelEvent::Error {
                            id,
                            name: name.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }
    tracing::debug!(channel = %name, "listen loop stopped");
}
