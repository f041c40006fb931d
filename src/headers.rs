//! Scoped header directives and their materialization onto wire messages.
//!
//! A [`HeaderDirective`] describes one custom header the pipeline should
//! attach to the request sent downstream or to the response returned to the
//! caller. Directives are kept in insertion order; when two directives in
//! the same scope share a name, the later one wins at materialization time
//! while keeping the earlier one's position.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a directive applies and how its value is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderScope {
    /// Fixed name/value attached to the outgoing downstream request.
    RequestStatic,

    /// Copies an inbound request header (named by the directive's `value`)
    /// onto the downstream request under the directive's `name`.
    RequestRename,

    /// Fixed name/value attached to the final response.
    ResponseStatic,

    /// Resolves the directive's `value` as a claim key against the
    /// context's claims map and attaches the claim value to the response.
    ClaimDerived,
}

/// One custom header instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderDirective {
    /// Header name to emit.
    pub name: String,

    /// Literal value, source header name, or claim key depending on scope.
    pub value: String,

    /// Which side of the exchange this directive applies to.
    pub scope: HeaderScope,
}

/// Ordered collection of header directives.
#[derive(Debug, Clone, Default)]
pub struct HeaderDirectives {
    entries: Vec<HeaderDirective>,
}

impl HeaderDirectives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a directive, preserving insertion order.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>, scope: HeaderScope) {
        self.entries.push(HeaderDirective {
            name: name.into(),
            value: value.into(),
            scope,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderDirective> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Headers to attach to the downstream request.
    ///
    /// `RequestStatic` directives emit their literal value. `RequestRename`
    /// directives look up the inbound header named by their `value` and are
    /// skipped when it is absent.
    pub fn materialize_request(&self, request_headers: &[(String, String)]) -> Vec<(String, String)> {
        self.materialize(|d| match d.scope {
            HeaderScope::RequestStatic => Some(d.value.clone()),
            HeaderScope::RequestRename => request_headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(&d.value))
                .map(|(_, v)| v.clone()),
            _ => None,
        })
    }

    /// Headers to attach to the final response.
    ///
    /// `ResponseStatic` directives emit their literal value. `ClaimDerived`
    /// directives resolve their `value` against `claims` and are skipped
    /// when the claim is absent.
    pub fn materialize_response(&self, claims: &HashMap<String, String>) -> Vec<(String, String)> {
        self.materialize(|d| match d.scope {
            HeaderScope::ResponseStatic => Some(d.value.clone()),
            HeaderScope::ClaimDerived => claims.get(&d.value).cloned(),
            _ => None,
        })
    }

    /// Shared materialization walk: insertion order, later same-name
    /// entries replace the earlier value in place.
    fn materialize<F>(&self, resolve: F) -> Vec<(String, String)>
    where
        F: Fn(&HeaderDirective) -> Option<String>,
    {
        let mut out: Vec<(String, String)> = Vec::new();
        for directive in &self.entries {
            let Some(value) = resolve(directive) else {
                continue;
            };
            match out
                .iter_mut()
                .find(|(n, _)| n.eq_ignore_ascii_case(&directive.name))
            {
                Some(existing) => existing.1 = value,
                None => out.push((directive.name.clone(), value)),
            }
        }
        out
    }
}
