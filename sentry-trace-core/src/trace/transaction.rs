use crate::envelope::DynamicSamplingContext;
use crate::propagation::{parse_sentry_trace, Baggage, PropagationContext};
use crate::sdk_debug;
use crate::trace::span::{Span, TransactionMeta};
use crate::trace::{SpanId, TraceId};
use serde::Serialize;
use std::borrow::Cow;
use std::ops::Deref;

/// How a transaction's name was derived.
///
/// Consumers use this to judge the cardinality of the name; raw URL names
/// are excluded from the dynamic sampling context, for example.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TransactionSource {
    /// Set by the user.
    #[default]
    Custom,
    /// Taken from the raw request URL.
    Url,
    /// Derived from a framework route pattern.
    Route,
    /// Named after a UI component.
    Component,
    /// Named after a background task.
    Task,
}

/// Everything needed to start a transaction: naming plus the optional
/// continuation of an upstream trace.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TransactionContext {
    /// Name of the transaction.
    pub name: Cow<'static, str>,
    /// Operation label of the root span.
    pub op: Cow<'static, str>,
    /// How the name was derived.
    pub source: TransactionSource,
    /// Trace id to continue; a fresh id is minted when absent.
    pub trace_id: Option<TraceId>,
    /// Upstream span to attach the local root under.
    pub parent_span_id: Option<SpanId>,
    /// Upstream sampling decision, inherited verbatim when present.
    pub parent_sampled: Option<bool>,
    /// Frozen dynamic sampling context received from upstream.
    pub dsc: Option<DynamicSamplingContext>,
}

impl Default for TransactionContext {
    fn default() -> Self {
        TransactionContext {
            name: Cow::Borrowed(""),
            op: Cow::Borrowed(""),
            source: TransactionSource::Custom,
            trace_id: None,
            parent_span_id: None,
            parent_sampled: None,
            dsc: None,
        }
    }
}

impl TransactionContext {
    /// Context for a fresh root transaction.
    pub fn new(name: impl Into<Cow<'static, str>>, op: impl Into<Cow<'static, str>>) -> Self {
        TransactionContext {
            name: name.into(),
            op: op.into(),
            ..Default::default()
        }
    }

    /// Sets how the transaction name was derived.
    pub fn with_source(mut self, source: TransactionSource) -> Self {
        self.source = source;
        self
    }

    /// Context continuing the trace described by an extracted
    /// [`PropagationContext`].
    pub fn from_propagation(
        propagation: PropagationContext,
        name: impl Into<Cow<'static, str>>,
        op: impl Into<Cow<'static, str>>,
    ) -> Self {
        TransactionContext {
            name: name.into(),
            op: op.into(),
            source: TransactionSource::Custom,
            trace_id: Some(propagation.trace_id),
            parent_span_id: Some(propagation.parent_span_id),
            parent_sampled: propagation.parent_sampled,
            dsc: propagation.dsc,
        }
    }

    /// Context continuing a trace from raw header values.
    ///
    /// A missing or malformed `sentry-trace` header degrades to a fresh root
    /// trace; it is never an error.
    pub fn continue_from_headers(
        name: impl Into<Cow<'static, str>>,
        op: impl Into<Cow<'static, str>>,
        sentry_trace: Option<&str>,
        baggage: Option<&str>,
    ) -> Self {
        let mut ctx = TransactionContext::new(name, op);
        let Some(header) = sentry_trace else {
            return ctx;
        };
        match parse_sentry_trace(header) {
            Ok(upstream) => {
                ctx.trace_id = Some(upstream.trace_id);
                ctx.parent_span_id = Some(upstream.span_id);
                ctx.parent_sampled = upstream.sampled;
                ctx.dsc = baggage
                    .map(Baggage::parse)
                    .as_ref()
                    .and_then(DynamicSamplingContext::from_baggage);
            }
            Err(error) => {
                sdk_debug!(
                    name: "Transaction.InvalidContinuationHeader",
                    message = "malformed sentry-trace header, starting a fresh trace",
                    error = error.to_string()
                );
            }
        }
        ctx
    }
}

/// A root span and the trace tree growing under it.
///
/// The transaction owns the trace-wide state: the irrevocable sampling
/// decision, the transaction name and the memoized dynamic sampling context.
/// It dereferences to its root [`Span`], so all span operations apply
/// directly. Finishing the transaction (via [`Span::finish`]) emits the
/// collected tree if the trace was sampled.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub(crate) root: Span,
}

impl Deref for Transaction {
    type Target = Span;

    fn deref(&self) -> &Span {
        &self.root
    }
}

impl Transaction {
    /// The current transaction name.
    pub fn name(&self) -> String {
        self.root
            .inner
            .tree
            .transaction
            .lock()
            .map(|meta| meta.name.to_string())
            .unwrap_or_default()
    }

    /// The source the current name was derived from.
    pub fn source(&self) -> TransactionSource {
        self.root
            .inner
            .tree
            .transaction
            .lock()
            .map(|meta| meta.source)
            .unwrap_or_default()
    }

    /// Renames the transaction, recording how the new name was derived.
    ///
    /// Renaming after the dynamic sampling context has been frozen does not
    /// change what downstream services observe.
    pub fn set_name(&self, name: impl Into<Cow<'static, str>>, source: TransactionSource) {
        if let Ok(mut meta) = self.root.inner.tree.transaction.lock() {
            *meta = TransactionMeta {
                name: name.into(),
                source,
            };
        }
    }

    /// The sample rate that produced this trace's decision, if known locally.
    pub fn sample_rate(&self) -> Option<f64> {
        self.root.inner.tree.sampling.sample_rate
    }

    /// Returns the trace's dynamic sampling context, materializing and
    /// freezing it on first call.
    ///
    /// Later calls — including the one that attaches the envelope header at
    /// emission — return the memoized value, so downstream services always
    /// observe the original decision.
    pub fn dynamic_sampling_context(&self) -> DynamicSamplingContext {
        self.root.freeze_dsc()
    }

    /// Unwraps the root [`Span`] handle.
    pub fn into_span(self) -> Span {
        self.root
    }
}
