//! # Relay Pipeline
//!
//! A request-processing pipeline that mediates between an inbound
//! HTTP-style request and a set of pluggable stages: **filters** that
//! inspect or transform the request/response context, **channels** that
//! fan the payload out to external endpoints, and an optional **binding**
//! — the single downstream call that produces the canonical response.
//!
//! ## Core Concepts
//!
//! - **[`Context`]** — mutable per-request unit of work (content, status,
//!   header directives, one-way fault flag) threaded through every stage.
//! - **[`Filter`]** — named stage transforming the context; errors are
//!   values ([`FilterError`]), advisory or fatal.
//! - **[`Channel`]** — long-lived, stateful endpoint (open/closed/faulted)
//!   shared across concurrent executions. Implements the offload protocol:
//!   payloads over the transport's size ceiling are parked in a
//!   [`BulkStore`] and sent as a reference envelope instead.
//! - **[`Binding`]** — the downstream invocation; [`HttpBinding`] forwards
//!   over HTTP via reqwest.
//! - **[`Pipeline`]** — sequences input filters → input channels →
//!   binding → output filters → output channels, applies per-stage
//!   [`ExecutionRequirement`] gating, and always returns a well-formed
//!   response.
//!
//! ## Quick Start
//!
//! ```no_run
//! use relay_pipeline::{
//!     Channel, ChannelConfig, FnFilter, InMemoryTransport, MemoryBulkStore,
//!     Pipeline, PipelineRequest,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (channel, _events) = Channel::new(
//!         ChannelConfig::new("audit"),
//!         Box::new(InMemoryTransport::new()),
//!         Arc::new(MemoryBulkStore::new()),
//!     );
//!
//!     let pipeline = Pipeline::builder()
//!         .input_filter(Arc::new(FnFilter::new("tag", |ctx| {
//!             ctx.set_content_text(ctx.content_text().to_uppercase());
//!             Ok(())
//!         })))
//!         .input_channel(Arc::new(channel))
//!         .build();
//!
//!     let request = PipelineRequest::new("POST", "/orders").with_body(b"hello".to_vec());
//!     let response = pipeline.execute(request).await;
//!     println!("{} {}", response.status, response.body_text());
//! }
//! ```
//!
//! ## Offloading
//!
//! Channels whose transport has an in-band message-size ceiling send small
//! payloads "by value" and large ones "by reference": the payload goes to
//! a bulk store under a fresh time-ordered key and a small JSON envelope
//! travels instead, discriminated by an explicit out-of-band tag. The
//! receiving side trusts only the tag, so sender and receiver never need
//! to agree on a ceiling.

pub mod binding;
pub mod channel;
pub mod context;
pub mod error;
pub mod events;
pub mod filter;
pub mod headers;
pub mod offload;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod types;

pub use binding::{Binding, BindingError, FnBinding, HttpBinding};
pub use channel::{
    Channel, ChannelConfig, ChannelState, ErrorPolicy, HttpTransport, InMemoryTransport,
    SizeTier, Transport, TransportMessage,
};
pub use context::Context;
pub use error::{PipelineError, Result};
pub use events::{ChannelEvent, EventSink, PipelineEvent};
pub use filter::{ExecutionRequirement, Filter, FilterError, FnFilter};
pub use headers::{HeaderDirective, HeaderDirectives, HeaderScope};
pub use offload::{OffloadCodec, OffloadEnvelope, PassedBy, PASSED_BY_PROPERTY};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use registry::Registry;
pub use store::{BulkStore, FsBulkStore, MemoryBulkStore};
pub use types::{PipelineRequest, PipelineResponse};
