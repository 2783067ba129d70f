//! Ordered batch of requests

use crate::error::GraphError;
use crate::request::{impl_operation, CancelFlag, Operation, Outcome, Request, RequestKind};

/// Ordered list of requests processed as one unit
///
/// Nested composites are flattened on construction. Embedded requests run in
/// order; a failure does not stop the remaining ones, only cancellation does.
#[derive(Debug, Clone)]
pub struct CompositeRequest {
    requests: Vec<Request>,
    outcome: Outcome<()>,
    cancel: CancelFlag,
}

impl CompositeRequest {
    pub fn new<I>(requests: I) -> Self
    where
        I: IntoIterator<Item = Request>,
    {
        let mut flat = Vec::new();
        for request in requests {
            match request {
                Request::Composite(nested) => flat.extend(nested.requests),
                other => flat.push(other),
            }
        }
        CompositeRequest {
            requests: flat,
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn requests_mut(&mut self) -> &mut [Request] {
        &mut self.requests
    }

    pub fn into_requests(self) -> Vec<Request> {
        self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn is_read_only(&self) -> bool {
        self.requests.iter().all(Request::is_read_only)
    }

    /// Cancel the composite and every embedded request
    pub fn cancel_all(&self) {
        self.cancel.cancel();
        for request in &self.requests {
            request.cancel();
        }
    }

    /// True if the composite or any embedded request was cancelled
    pub fn is_any_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.requests.iter().any(Request::is_cancelled)
    }

    /// Fold the embedded outcomes into the composite outcome
    ///
    /// No failures completes the composite; exactly one failure is hoisted
    /// verbatim; several become a `MultipleFailures` summary.
    pub fn check_for_errors(&mut self) {
        let failures: Vec<(usize, &GraphError)> = self
            .requests
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.error().map(|e| (i, e)))
            .collect();
        let total = self.requests.len();
        let outcome = match failures.as_slice() {
            [] => Outcome::Completed(()),
            [(_, single)] => Outcome::Failed((*single).clone()),
            many => {
                let summary = many
                    .iter()
                    .map(|(i, e)| format!("#{} {}: {}", i, self.requests[*i].kind(), e))
                    .collect::<Vec<_>>()
                    .join("; ");
                Outcome::Failed(GraphError::MultipleFailures {
                    failed: many.len(),
                    total,
                    summary,
                })
            }
        };
        self.outcome = outcome;
    }
}

impl_operation!(CompositeRequest, (), RequestKind::Composite);
