//! Pipeline orchestrator.
//!
//! Sequences input filters → input channels → binding → output filters →
//! output channels against one [`Context`] per request, applies per-stage
//! execution-requirement gating, and converts every stage failure into a
//! well-formed terminal response. Stages within a group run sequentially,
//! in registration order; the orchestrator awaits each before moving on.

use crate::binding::Binding;
use crate::channel::{Channel, ErrorPolicy};
use crate::context::Context;
use crate::events::{EventSink, PipelineEvent};
use crate::filter::Filter;
use crate::types::{PipelineRequest, PipelineResponse, STATUS_INTERNAL_ERROR, STATUS_OK};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Orchestrates one request through the configured stages.
///
/// The pipeline itself is immutable after build and safe to share across
/// concurrent executions; per-request state lives in the [`Context`], and
/// channels carry their own synchronization.
pub struct Pipeline {
    input_filters: Vec<Arc<dyn Filter>>,
    input_channels: Vec<Arc<Channel>>,
    binding: Option<Arc<dyn Binding>>,
    output_filters: Vec<Arc<dyn Filter>>,
    output_channels: Vec<Arc<Channel>>,
    events: Option<EventSink<PipelineEvent>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "input_filters",
                &self.input_filters.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field(
                "input_channels",
                &self.input_channels.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("binding", &self.binding.as_ref().map(|b| b.name()))
            .field(
                "output_filters",
                &self.output_filters.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field(
                "output_channels",
                &self.output_channels.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Execute one request to completion.
    ///
    /// This never fails and never panics outward: structured stage errors
    /// are folded into the context, and anything unexpected escaping a
    /// stage is caught here and degraded to a bare 500 response.
    pub async fn execute(&self, request: PipelineRequest) -> PipelineResponse {
        match AssertUnwindSafe(self.run(request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let message = panic_message(&panic);
                tracing::error!(error = %message, "pipeline execution panicked");
                self.emit(PipelineEvent::Failed { message });
                PipelineResponse::fault(STATUS_INTERNAL_ERROR)
            }
        }
    }

    async fn run(&self, request: PipelineRequest) -> PipelineResponse {
        let mut ctx = Context::new(request);

        self.run_filters(&mut ctx, &self.input_filters).await;
        self.run_channels(&mut ctx, &self.input_channels).await;
        self.run_binding(&mut ctx).await;
        self.run_filters(&mut ctx, &self.output_filters).await;
        self.run_channels(&mut ctx, &self.output_channels).await;

        let status = if ctx.is_fatal() {
            ctx.status().unwrap_or(STATUS_INTERNAL_ERROR)
        } else {
            ctx.status().unwrap_or(STATUS_OK)
        };
        let headers = ctx.headers.materialize_response(&ctx.claims);
        let body = ctx.content().to_vec();

        self.emit(PipelineEvent::Completed { status });
        tracing::debug!(status, fatal = ctx.is_fatal(), trail = ?ctx.trail(), "pipeline complete");
        PipelineResponse {
            status,
            headers,
            body,
        }
    }

    async fn run_filters(&self, ctx: &mut Context, filters: &[Arc<dyn Filter>]) {
        for filter in filters {
            if !filter.execution_requirement().allows(ctx.is_fatal()) {
                tracing::debug!(filter = %filter.name(), "skipped by execution requirement");
                continue;
            }
            ctx.record(filter.name());
            if let Err(e) = filter.execute(ctx).await {
                self.emit(PipelineEvent::FilterError {
                    filter: e.name.clone(),
                    is_fatal: e.is_fatal,
                    message: e.message.clone(),
                });
                if e.is_fatal {
                    tracing::error!(filter = %e.name, error = %e.message, "fatal filter error");
                    let status = e.effective_status();
                    if let Some(body) = e.response_body {
                        ctx.set_content(body);
                    }
                    ctx.mark_fatal(Some(status), e.message);
                } else {
                    tracing::warn!(filter = %e.name, error = %e.message, "filter error (advisory)");
                }
            }
        }
    }

    async fn run_channels(&self, ctx: &mut Context, channels: &[Arc<Channel>]) {
        for channel in channels {
            if !channel.execution_requirement().allows(ctx.is_fatal()) {
                tracing::debug!(channel = %channel.name(), "skipped by execution requirement");
                continue;
            }
            ctx.record(channel.name());
            let payload = ctx.content().to_vec();
            let content_type = ctx.content_type().to_string();
            if let Err(e) = channel.send(payload, &content_type).await {
                // The channel already emitted its own error event; here we
                // only decide what the failure means for this execution.
                match channel.error_policy() {
                    ErrorPolicy::FailClosed => {
                        ctx.mark_fatal(None, e.to_string());
                    }
                    ErrorPolicy::FailOpen => {
                        tracing::warn!(channel = %channel.name(), error = %e, "channel failure ignored (fail-open)");
                    }
                }
            }
        }
    }

    async fn run_binding(&self, ctx: &mut Context) {
        if ctx.is_fatal() {
            tracing::debug!("binding skipped: context is fatal");
            return;
        }
        let Some(binding) = &self.binding else {
            return;
        };
        ctx.record(binding.name());
        match binding.execute(ctx).await {
            Ok(()) => {
                let status = ctx.status().unwrap_or(STATUS_OK);
                self.emit(PipelineEvent::BindingComplete {
                    binding: binding.name().to_string(),
                    status,
                });
            }
            Err(e) => {
                tracing::error!(binding = %e.binding, error = %e.message, "binding failed");
                self.emit(PipelineEvent::BindingError {
                    binding: e.binding.clone(),
                    message: e.message.clone(),
                });
                ctx.mark_fatal(e.status_code, e.message);
            }
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for pipelines.
#[derive(Default)]
pub struct PipelineBuilder {
    input_filters: Vec<Arc<dyn Filter>>,
    input_channels: Vec<Arc<Channel>>,
    binding: Option<Arc<dyn Binding>>,
    output_filters: Vec<Arc<dyn Filter>>,
    output_channels: Vec<Arc<Channel>>,
    events: Option<EventSink<PipelineEvent>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an input filter. Filters run in the order they are added.
    pub fn input_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.input_filters.push(filter);
        self
    }

    /// Append an input channel.
    pub fn input_channel(mut self, channel: Arc<Channel>) -> Self {
        self.input_channels.push(channel);
        self
    }

    /// Set the binding. At most one; the last call wins.
    pub fn binding(mut self, binding: Arc<dyn Binding>) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Append an output filter.
    pub fn output_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.output_filters.push(filter);
        self
    }

    /// Append an output channel.
    pub fn output_channel(mut self, channel: Arc<Channel>) -> Self {
        self.output_channels.push(channel);
        self
    }

    /// Attach a sink for per-run pipeline events.
    pub fn events(mut self, events: EventSink<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            input_filters: self.input_filters,
            input_channels: self.input_channels,
            binding: self.binding,
            output_filters: self.output_filters,
            output_channels: self.output_channels,
            events: self.events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{BindingError, FnBinding};
    use crate::channel::{ChannelConfig, ChannelState, InMemoryTransport, Transport, TransportMessage};
    use crate::error::PipelineError;
    use crate::filter::{ExecutionRequirement, FilterError, FnFilter};
    use crate::headers::HeaderScope;
    use crate::store::MemoryBulkStore;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn trail_filter(name: &'static str) -> Arc<dyn Filter> {
        // Execution order is already recorded by the orchestrator; this
        // filter also appends to the content so tests can observe mutation
        // order end to end.
        Arc::new(FnFilter::new(name, move |ctx: &mut Context| {
            let mut text = ctx.content_text();
            text.push_str(name);
            text.push(';');
            ctx.set_content_text(text);
            Ok(())
        }))
    }

    fn request() -> PipelineRequest {
        PipelineRequest::new("POST", "/orders").with_body(b"".to_vec())
    }

    #[tokio::test]
    async fn test_filters_run_in_registration_order() {
        let pipeline = Pipeline::builder()
            .input_filter(trail_filter("A"))
            .input_filter(trail_filter("B"))
            .input_filter(trail_filter("C"))
            .build();

        let response = pipeline.execute(request()).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "A;B;C;");
    }

    #[tokio::test]
    async fn test_default_status_is_success() {
        let pipeline = Pipeline::builder().build();
        let response = pipeline.execute(request().with_body(b"echo".to_vec())).await;
        assert_eq!(response.status, 200);
        // With no binding, the context content (seeded from the request
        // body) passes through.
        assert_eq!(response.body, b"echo");
    }

    #[tokio::test]
    async fn test_explicit_status_survives() {
        let pipeline = Pipeline::builder()
            .input_filter(Arc::new(FnFilter::new("accepted", |ctx: &mut Context| {
                ctx.set_status(202);
                Ok(())
            })))
            .build();

        let response = pipeline.execute(request()).await;
        assert_eq!(response.status, 202);
    }

    #[tokio::test]
    async fn test_nonfatal_filter_error_continues() {
        let (sink, mut events) = EventSink::queue();
        let pipeline = Pipeline::builder()
            .events(sink)
            .input_filter(Arc::new(FnFilter::new("grumbler", |_: &mut Context| {
                Err(FilterError::advisory("grumbler", Uuid::new_v4(), "minor"))
            })))
            .input_filter(trail_filter("after"))
            .build();

        let response = pipeline.execute(request()).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "after;");

        let mut saw_filter_error = false;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::FilterError { is_fatal, .. } = event {
                assert!(!is_fatal);
                saw_filter_error = true;
            }
        }
        assert!(saw_filter_error);
    }

    #[tokio::test]
    async fn test_fatal_filter_sets_status_and_body() {
        let pipeline = Pipeline::builder()
            .input_filter(Arc::new(FnFilter::new("gate", |_: &mut Context| {
                Err(FilterError::fatal("gate", Uuid::new_v4(), "denied")
                    .with_status(403)
                    .with_response_body(b"forbidden".to_vec()))
            })))
            .build();

        let response = pipeline.execute(request()).await;
        assert_eq!(response.status, 403);
        assert_eq!(response.body, b"forbidden");
    }

    #[tokio::test]
    async fn test_gating_correctness() {
        let fatal_filter = Arc::new(FnFilter::new("bomb", |_: &mut Context| {
            Err(FilterError::fatal("bomb", Uuid::new_v4(), "boom"))
        }));
        let success_only = Arc::new(
            FnFilter::new("success-only", |ctx: &mut Context| {
                ctx.set_content_text("must not run");
                Ok(())
            })
            .with_requirement(ExecutionRequirement::OnlySuccess),
        );
        let fault_only = Arc::new(
            FnFilter::new("fault-only", |ctx: &mut Context| {
                ctx.claims.insert("ran".into(), "fault-only".into());
                Ok(())
            })
            .with_requirement(ExecutionRequirement::OnlyFault),
        );

        let pipeline = Pipeline::builder()
            .input_filter(fatal_filter)
            .input_filter(success_only)
            .input_filter(fault_only)
            .output_filter(Arc::new(
                FnFilter::new("fault-header", |ctx: &mut Context| {
                    let ran = ctx.claims.get("ran").cloned().unwrap_or_default();
                    ctx.headers.push("X-Ran", ran, HeaderScope::ResponseStatic);
                    Ok(())
                })
                .with_requirement(ExecutionRequirement::Any),
            ))
            .build();

        let response = pipeline.execute(request()).await;
        assert_eq!(response.status, 500);
        assert_ne!(response.body, b"must not run");
        assert_eq!(
            response.headers,
            vec![("X-Ran".to_string(), "fault-only".to_string())]
        );
    }

    #[tokio::test]
    async fn test_fault_only_never_runs_while_healthy() {
        let pipeline = Pipeline::builder()
            .input_filter(Arc::new(
                FnFilter::new("fault-only", |ctx: &mut Context| {
                    ctx.set_content_text("ran anyway");
                    Ok(())
                })
                .with_requirement(ExecutionRequirement::OnlyFault),
            ))
            .build();

        let response = pipeline.execute(request().with_body(b"orig".to_vec())).await;
        assert_eq!(response.body, b"orig");
    }

    #[tokio::test]
    async fn test_binding_replaces_content() {
        let (sink, mut events) = EventSink::queue();
        let pipeline = Pipeline::builder()
            .events(sink)
            .binding(Arc::new(FnBinding::new("canned", |ctx: &mut Context| {
                ctx.set_status(200);
                ctx.set_content_text("downstream-body");
                Ok(())
            })))
            .build();

        let response = pipeline.execute(request().with_body(b"in".to_vec())).await;
        assert_eq!(response.body, b"downstream-body");

        let mut saw_complete = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PipelineEvent::BindingComplete { .. }) {
                saw_complete = true;
            }
        }
        assert!(saw_complete);
    }

    #[tokio::test]
    async fn test_binding_error_is_fatal() {
        let pipeline = Pipeline::builder()
            .binding(Arc::new(FnBinding::new("broken", |_: &mut Context| {
                Err(BindingError::new("broken", "downstream gone").with_status(502))
            })))
            .output_filter(Arc::new(
                FnFilter::new("cleanup", |ctx: &mut Context| {
                    ctx.set_status(200);
                    Ok(())
                })
                .with_requirement(ExecutionRequirement::OnlySuccess),
            ))
            .build();

        let response = pipeline.execute(request()).await;
        // The cleanup filter was gated out and could not rescue the run.
        assert_eq!(response.status, 502);
    }

    #[tokio::test]
    async fn test_binding_skipped_when_fatal() {
        let pipeline = Pipeline::builder()
            .input_filter(Arc::new(FnFilter::new("bomb", |_: &mut Context| {
                Err(FilterError::fatal("bomb", Uuid::new_v4(), "boom").with_status(400))
            })))
            .binding(Arc::new(FnBinding::new("unreachable", |_: &mut Context| {
                panic!("binding must not run on a fatal context");
            })))
            .build();

        let response = pipeline.execute(request()).await;
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn test_panicking_binding_is_contained() {
        let (sink, mut events) = EventSink::queue();
        let pipeline = Pipeline::builder()
            .events(sink)
            .binding(Arc::new(FnBinding::new("explosive", |_: &mut Context| {
                panic!("kaboom");
            })))
            .build();

        let response = pipeline.execute(request()).await;
        assert_eq!(response.status, 500);
        assert!(response.body.is_empty());

        let mut saw_failed = false;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::Failed { message } = event {
                assert!(message.contains("kaboom"));
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn test_input_channel_receives_request_content() {
        let transport = InMemoryTransport::new();
        let sent = transport.sent_log();
        let (channel, _events) = Channel::new(
            ChannelConfig::new("audit"),
            Box::new(transport),
            Arc::new(MemoryBulkStore::new()),
        );

        let pipeline = Pipeline::builder()
            .input_channel(Arc::new(channel))
            .binding(Arc::new(FnBinding::new("canned", |ctx: &mut Context| {
                ctx.set_content_text("response");
                Ok(())
            })))
            .build();

        let response = pipeline
            .execute(request().with_body(b"request-payload".to_vec()))
            .await;
        assert_eq!(response.status, 200);

        // The input channel saw the pre-binding content.
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, b"request-payload");
    }

    #[tokio::test]
    async fn test_output_channel_receives_response_content() {
        let transport = InMemoryTransport::new();
        let sent = transport.sent_log();
        let (channel, _events) = Channel::new(
            ChannelConfig::new("notify"),
            Box::new(transport),
            Arc::new(MemoryBulkStore::new()),
        );

        let pipeline = Pipeline::builder()
            .binding(Arc::new(FnBinding::new("canned", |ctx: &mut Context| {
                ctx.set_content_text("final-response");
                Ok(())
            })))
            .output_channel(Arc::new(channel))
            .build();

        pipeline.execute(request()).await;
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].body, b"final-response");
    }

    struct DeadTransport;

    #[async_trait]
    impl Transport for DeadTransport {
        fn name(&self) -> &'static str {
            "dead"
        }
        async fn connect(&mut self) -> crate::error::Result<()> {
            Err(PipelineError::ChannelFailed {
                channel: "dead".into(),
                message: "unreachable".into(),
            })
        }
        async fn disconnect(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
        async fn send(&mut self, _message: TransportMessage) -> crate::error::Result<()> {
            Err(PipelineError::ChannelFailed {
                channel: "dead".into(),
                message: "unreachable".into(),
            })
        }
        async fn subscribe(&mut self) -> crate::error::Result<mpsc::Receiver<TransportMessage>> {
            Err(PipelineError::Other("send-only".into()))
        }
    }

    fn dead_channel(policy: crate::channel::ErrorPolicy) -> Arc<Channel> {
        let (channel, _events) = Channel::new(
            ChannelConfig::new("dead").with_error_policy(policy),
            Box::new(DeadTransport),
            Arc::new(MemoryBulkStore::new()),
        );
        Arc::new(channel)
    }

    #[tokio::test]
    async fn test_fail_open_channel_error_continues() {
        let pipeline = Pipeline::builder()
            .input_channel(dead_channel(ErrorPolicy::FailOpen))
            .binding(Arc::new(FnBinding::new("canned", |ctx: &mut Context| {
                ctx.set_content_text("still served");
                Ok(())
            })))
            .build();

        let response = pipeline.execute(request()).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"still served");
    }

    #[tokio::test]
    async fn test_fail_closed_channel_error_faults() {
        let pipeline = Pipeline::builder()
            .input_channel(dead_channel(ErrorPolicy::FailClosed))
            .binding(Arc::new(FnBinding::new("unreachable", |_: &mut Context| {
                panic!("binding must not run");
            })))
            .build();

        let response = pipeline.execute(request()).await;
        assert_eq!(response.status, 500);
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_abort_stage_siblings() {
        let transport = InMemoryTransport::new();
        let sent = transport.sent_log();
        let (healthy, _events) = Channel::new(
            ChannelConfig::new("healthy"),
            Box::new(transport),
            Arc::new(MemoryBulkStore::new()),
        );

        let pipeline = Pipeline::builder()
            .input_channel(dead_channel(ErrorPolicy::FailOpen))
            .input_channel(Arc::new(healthy))
            .build();

        pipeline.execute(request().with_body(b"x".to_vec())).await;
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_channel_stays_untouched() {
        let transport = InMemoryTransport::new();
        let sent = transport.sent_log();
        let (channel, _events) = Channel::new(
            ChannelConfig::new("fault-only")
                .with_requirement(ExecutionRequirement::OnlyFault),
            Box::new(transport),
            Arc::new(MemoryBulkStore::new()),
        );
        let channel = Arc::new(channel);

        let pipeline = Pipeline::builder()
            .input_channel(Arc::clone(&channel))
            .build();

        pipeline.execute(request()).await;
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(channel.state().await, ChannelState::None);
    }

    #[tokio::test]
    async fn test_response_headers_materialized_with_claims() {
        let pipeline = Pipeline::builder()
            .input_filter(Arc::new(FnFilter::new("identity", |ctx: &mut Context| {
                ctx.claims.insert("sub".into(), "user-7".into());
                ctx.headers.push("X-Caller", "sub", HeaderScope::ClaimDerived);
                ctx.headers
                    .push("X-Powered-By", "relay", HeaderScope::ResponseStatic);
                // Request-scoped directives must not leak into the response.
                ctx.headers
                    .push("X-Internal", "secret", HeaderScope::RequestStatic);
                Ok(())
            })))
            .build();

        let response = pipeline.execute(request()).await;
        assert_eq!(
            response.headers,
            vec![
                ("X-Caller".to_string(), "user-7".to_string()),
                ("X-Powered-By".to_string(), "relay".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_channel_across_executions() {
        let transport = InMemoryTransport::new();
        let sent = transport.sent_log();
        let (channel, _events) = Channel::new(
            ChannelConfig::new("shared"),
            Box::new(transport),
            Arc::new(MemoryBulkStore::new()),
        );
        let channel = Arc::new(channel);

        let pipeline = Arc::new(
            Pipeline::builder()
                .input_channel(Arc::clone(&channel))
                .build(),
        );

        let mut handles = Vec::new();
        for i in 0..8 {
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(async move {
                pipeline
                    .execute(request().with_body(format!("req-{}", i).into_bytes()))
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().status, 200);
        }

        assert_eq!(sent.lock().unwrap().len(), 8);
        assert_eq!(channel.state().await, ChannelState::Open);
    }
}
