//! Filter trait and the execution-requirement gate.
//!
//! Filters are named units that inspect or transform the [`Context`].
//! They run strictly in registration order and signal problems through
//! [`FilterError`] values rather than panics; a fatal error faults the
//! context, a non-fatal one is advisory.

use crate::context::Context;
use crate::types::STATUS_INTERNAL_ERROR;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gate deciding whether a stage runs for the current context state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionRequirement {
    /// Run regardless of the fault flag.
    #[default]
    Any,

    /// Run only while the context is healthy.
    OnlySuccess,

    /// Run only after the context has been marked fatal.
    OnlyFault,
}

impl ExecutionRequirement {
    /// Whether a stage with this requirement should run given the
    /// context's fault flag.
    pub fn allows(self, is_fatal: bool) -> bool {
        match self {
            ExecutionRequirement::Any => true,
            ExecutionRequirement::OnlySuccess => !is_fatal,
            ExecutionRequirement::OnlyFault => is_fatal,
        }
    }
}

/// Error raised by a filter instead of (or in addition to) mutating the
/// context.
#[derive(Debug, Clone)]
pub struct FilterError {
    /// Name of the filter that raised the error.
    pub name: String,

    /// Instance id of the filter.
    pub id: Uuid,

    /// Fatal errors fault the context; non-fatal ones are logged and the
    /// pipeline continues.
    pub is_fatal: bool,

    /// Human-readable description.
    pub message: String,

    /// Status to record on a fatal error. `None` defaults to 500.
    pub status_code: Option<u16>,

    /// Replacement response body for a fatal error, if the filter wants to
    /// control what the caller sees.
    pub response_body: Option<Vec<u8>>,
}

impl FilterError {
    /// A non-fatal, advisory error.
    pub fn advisory(name: impl Into<String>, id: Uuid, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id,
            is_fatal: false,
            message: message.into(),
            status_code: None,
            response_body: None,
        }
    }

    /// A fatal error with the default 500 status.
    pub fn fatal(name: impl Into<String>, id: Uuid, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id,
            is_fatal: true,
            message: message.into(),
            status_code: None,
            response_body: None,
        }
    }

    /// Set the status recorded when this error faults the context.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Set the replacement response body.
    pub fn with_response_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    /// The status this error resolves to (explicit or defaulted).
    pub fn effective_status(&self) -> u16 {
        self.status_code.unwrap_or(STATUS_INTERNAL_ERROR)
    }
}

/// A named, identifiable unit that transforms a [`Context`].
///
/// Implementations must be `Send + Sync`; the orchestrator does not
/// serialize access to them, so any internal state needs its own
/// synchronization. Errors cross back into the orchestrator as
/// [`FilterError`] values — catch your own panics-in-waiting before they
/// escape.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Instance name (for logging, events, and the execution trail).
    fn name(&self) -> &str;

    /// Instance id, unique per construction.
    fn id(&self) -> Uuid;

    /// Gate for this filter. Defaults to [`ExecutionRequirement::Any`].
    fn execution_requirement(&self) -> ExecutionRequirement {
        ExecutionRequirement::Any
    }

    /// Inspect or transform the context.
    async fn execute(&self, ctx: &mut Context) -> Result<(), FilterError>;
}

/// A [`Filter`] backed by a closure, for tests and inline deployments.
pub struct FnFilter<F> {
    name: String,
    id: Uuid,
    requirement: ExecutionRequirement,
    func: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&mut Context) -> Result<(), FilterError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            requirement: ExecutionRequirement::Any,
            func,
        }
    }

    /// Set the execution requirement (builder style).
    pub fn with_requirement(mut self, requirement: ExecutionRequirement) -> Self {
        self.requirement = requirement;
        self
    }
}

#[async_trait]
impl<F> Filter for FnFilter<F>
where
    F: Fn(&mut Context) -> Result<(), FilterError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn execution_requirement(&self) -> ExecutionRequirement {
        self.requirement
    }

    async fn execute(&self, ctx: &mut Context) -> Result<(), FilterError> {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PipelineRequest;

    #[test]
    fn test_gating_table() {
        assert!(ExecutionRequirement::Any.allows(false));
        assert!(ExecutionRequirement::Any.allows(true));
        assert!(ExecutionRequirement::OnlySuccess.allows(false));
        assert!(!ExecutionRequirement::OnlySuccess.allows(true));
        assert!(!ExecutionRequirement::OnlyFault.allows(false));
        assert!(ExecutionRequirement::OnlyFault.allows(true));
    }

    #[test]
    fn test_filter_error_effective_status() {
        let id = Uuid::new_v4();
        assert_eq!(FilterError::fatal("f", id, "x").effective_status(), 500);
        assert_eq!(
            FilterError::fatal("f", id, "x").with_status(429).effective_status(),
            429
        );
    }

    #[tokio::test]
    async fn test_fn_filter_mutates_context() {
        let filter = FnFilter::new("uppercase", |ctx: &mut Context| {
            let text = ctx.content_text().to_uppercase();
            ctx.set_content_text(text);
            Ok(())
        });

        let mut ctx = Context::new(PipelineRequest::new("POST", "/").with_body(b"hi".to_vec()));
        filter.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.content(), b"HI");
        assert_eq!(filter.name(), "uppercase");
    }

    #[tokio::test]
    async fn test_fn_filter_error_passthrough() {
        let filter = FnFilter::new("reject", |_: &mut Context| {
            Err(FilterError::fatal("reject", Uuid::new_v4(), "no").with_status(403))
        });

        let mut ctx = Context::new(PipelineRequest::new("GET", "/"));
        let err = filter.execute(&mut ctx).await.unwrap_err();
        assert!(err.is_fatal);
        assert_eq!(err.effective_status(), 403);
    }

    #[test]
    fn test_fn_filter_ids_are_unique() {
        let a = FnFilter::new("a", |_: &mut Context| Ok(()));
        let b = FnFilter::new("b", |_: &mut Context| Ok(()));
        assert_ne!(a.id(), b.id());
    }
}
