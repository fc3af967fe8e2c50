use crate::client_report::{ClientReport, ClientReportAggregator, DataCategory, DiscardReason};
use crate::config::Config;
use crate::envelope::EnvelopeHeader;
use crate::error::TransportError;
use crate::propagation::{Extractor, Injector, SentryTracePropagator};
use crate::scope;
use crate::trace::export::{Envelope, FinishedSpan, FinishedTransaction, NoopTransport, Transport};
use crate::trace::sampler::{Sampler, SamplingContext};
use crate::trace::span::{ChildEntry, Span, SpanData, SpanInner, SpanTree, TransactionMeta};
use crate::trace::transaction::{Transaction, TransactionContext};
use crate::trace::{SpanContext, SpanId};
use crate::{sdk_debug, sdk_warn};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// The tracing entry point instrumentation code talks to.
///
/// The tracer owns the configuration, the effective sampler, the transport
/// hand-off, the client-report counters and the live-span table that scopes
/// point into. It is cheap to clone; clones share all state.
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

#[derive(Debug)]
struct TracerInner {
    config: Config,
    sampler: Sampler,
    transport: Box<dyn Transport>,
    client_reports: ClientReportAggregator,
    live_spans: Mutex<HashMap<SpanId, SpanInner>>,
    propagator: SentryTracePropagator,
}

/// Configures and builds a [`Tracer`].
#[derive(Debug, Default)]
pub struct TracerBuilder {
    config: Config,
    transport: Option<Box<dyn Transport>>,
}

impl TracerBuilder {
    /// Replaces the configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the transport finished trace trees are handed to. Without one,
    /// envelopes are discarded.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Builds the tracer.
    pub fn build(self) -> Tracer {
        let sampler = Sampler::from_config(&self.config);
        Tracer {
            inner: Arc::new(TracerInner {
                config: self.config,
                sampler,
                transport: self
                    .transport
                    .unwrap_or_else(|| Box::new(NoopTransport::default())),
                client_reports: ClientReportAggregator::new(),
                live_spans: Mutex::new(HashMap::new()),
                propagator: SentryTracePropagator::new(),
            }),
        }
    }
}

impl Tracer {
    /// Starts building a tracer.
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    /// The configuration this tracer was built with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// A handle to the drop counters for periodic self-reporting.
    pub fn client_reports(&self) -> ClientReportAggregator {
        self.inner.client_reports.clone()
    }

    /// Drains the drop counters into a report, or `None` if nothing was
    /// discarded since the last flush.
    pub fn flush_client_report(&self) -> Option<ClientReport> {
        self.inner.client_reports.flush_and_clear()
    }

    /// Starts a root transaction.
    ///
    /// When the context continues an upstream trace, the trace id and the
    /// sampling decision are inherited and a frozen dynamic sampling context
    /// is adopted verbatim. Otherwise a fresh trace id is minted and the
    /// sampler decides, once and irrevocably for the whole tree.
    pub fn start_transaction(&self, ctx: TransactionContext) -> Transaction {
        let TransactionContext {
            name,
            op,
            source,
            trace_id,
            parent_span_id,
            parent_sampled,
            dsc,
        } = ctx;

        let is_remote = trace_id.is_some();
        let trace_id = trace_id.unwrap_or_else(|| self.inner.config.id_generator.new_trace_id());
        let span_id = self.inner.config.id_generator.new_span_id();

        let sampling_ctx = SamplingContext {
            transaction_name: name.clone(),
            op: op.clone(),
            parent_sampled,
        };
        let mut sampling = self.inner.sampler.should_sample(parent_sampled, &sampling_ctx);
        if sampling.sample_rate.is_none() {
            // An inherited decision may still carry the upstream rate.
            sampling.sample_rate = dsc.as_ref().and_then(|dsc| dsc.sample_rate_value());
        }

        let context = SpanContext::new(
            trace_id,
            span_id,
            parent_span_id,
            Some(sampling.sampled),
            is_remote,
        );
        let tree = Arc::new(SpanTree {
            root_span_id: span_id,
            sampling,
            transaction: Mutex::new(TransactionMeta {
                name: name.clone(),
                source,
            }),
            children: Mutex::new(Vec::new()),
            dsc: OnceLock::new(),
        });
        if let Some(dsc) = dsc {
            // The upstream service materialized the context first; it stays
            // authoritative for the whole distributed trace.
            let _ = tree.dsc.set(dsc);
        }

        let inner = SpanInner {
            context,
            data: Arc::new(Mutex::new(SpanData::new(name, op))),
            tree,
        };
        self.register(&inner);

        Transaction {
            root: Span {
                inner,
                tracer: self.clone(),
            },
        }
    }

    /// Starts a span under the current scope's active span; without one, a
    /// fresh root transaction is started instead and its root span returned.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        op: impl Into<Cow<'static, str>>,
    ) -> Span {
        match self.get_active_span() {
            Some(parent) => self.start_child_of(&parent.inner, name.into(), op.into()),
            None => self
                .start_transaction(TransactionContext::new(name, op))
                .into_span(),
        }
    }

    /// Resolves the current scope's active span against the live-span table.
    ///
    /// The scope only holds a span id; once the span finishes, the lookup
    /// resolves to `None` no matter how many scopes still point at it.
    pub fn get_active_span(&self) -> Option<Span> {
        let span_id = scope::with_current(|current| current.active_span())?;
        let inner = self
            .inner
            .live_spans
            .lock()
            .ok()?
            .get(&span_id)
            .cloned()?;
        Some(Span {
            inner,
            tracer: self.clone(),
        })
    }

    /// Runs `f` with `span` as the ambient active span.
    ///
    /// A forked scope carries the activation; it is popped on every exit
    /// path, restoring the caller's active span.
    pub fn with_active_span<T>(&self, span: &Span, f: impl FnOnce() -> T) -> T {
        let _guard = scope::push_scope();
        let span_id = span.span_id();
        scope::configure(|current| current.set_active_span(Some(span_id)));
        f()
    }

    /// Builds a transaction context from inbound request headers.
    ///
    /// Malformed headers degrade to a fresh root trace.
    pub fn continue_trace(
        &self,
        extractor: &dyn Extractor,
        name: impl Into<Cow<'static, str>>,
        op: impl Into<Cow<'static, str>>,
    ) -> TransactionContext {
        match self.inner.propagator.extract(extractor) {
            Some(propagation) => TransactionContext::from_propagation(propagation, name, op),
            None => TransactionContext::new(name, op),
        }
    }

    /// Writes trace continuation headers for an outgoing request to `url`.
    ///
    /// Nothing is written when `url` is not a configured propagation target
    /// or when no span is active. Writing the headers freezes the trace's
    /// dynamic sampling context if it was not frozen yet — this is a
    /// propagation point, and the first materialization is the one every
    /// downstream service must observe.
    pub fn inject_trace_headers(&self, url: &str, injector: &mut dyn Injector) {
        if !self.inner.config.trace_propagation_targets.is_match(url) {
            sdk_debug!(
                name: "Tracer.PropagationTargetSkipped",
                url = url
            );
            return;
        }
        if let Some(span) = self.get_active_span() {
            let dsc = span.freeze_dsc();
            self.inner
                .propagator
                .inject(span.span_context(), Some(&dsc), injector);
        }
    }

    pub(crate) fn start_child_of(
        &self,
        parent: &SpanInner,
        name: Cow<'static, str>,
        op: Cow<'static, str>,
    ) -> Span {
        let span_id = self.inner.config.id_generator.new_span_id();
        let context = SpanContext::new(
            parent.context.trace_id(),
            span_id,
            Some(parent.context.span_id()),
            parent.context.sampled(),
            false,
        );
        let inner = SpanInner {
            context: context.clone(),
            data: Arc::new(Mutex::new(SpanData::new(name, op))),
            tree: parent.tree.clone(),
        };
        if let Ok(mut children) = inner.tree.children.lock() {
            children.push(ChildEntry {
                context,
                data: inner.data.clone(),
            });
        }
        self.register(&inner);
        Span {
            inner,
            tracer: self.clone(),
        }
    }

    pub(crate) fn on_span_finished(&self, span: &Span) {
        // The finished span no longer resolves from scope lookups.
        if let Ok(mut live) = self.inner.live_spans.lock() {
            live.remove(&span.span_id());
        }
        if span.is_root() {
            self.emit_transaction(span);
        }
    }

    fn register(&self, inner: &SpanInner) {
        if let Ok(mut live) = self.inner.live_spans.lock() {
            live.insert(inner.context.span_id(), inner.clone());
        }
    }

    fn emit_transaction(&self, root: &Span) {
        let tree = &root.inner.tree;
        let children: Vec<ChildEntry> = tree
            .children
            .lock()
            .map(|mut children| std::mem::take(&mut *children))
            .unwrap_or_default();
        if let Ok(mut live) = self.inner.live_spans.lock() {
            for child in &children {
                live.remove(&child.context.span_id());
            }
        }

        if !tree.sampling.sampled {
            let reports = &self.inner.client_reports;
            reports.record_drop(DiscardReason::SampleRate, DataCategory::Transaction);
            reports.record_drops(
                DiscardReason::SampleRate,
                DataCategory::Span,
                children.len() as u64 + 1,
            );
            return;
        }

        let mut spans = Vec::with_capacity(children.len());
        for child in children {
            let finished = child
                .data
                .lock()
                .ok()
                .and_then(|data| FinishedSpan::from_data(&child.context, &data));
            match finished {
                Some(finished) => spans.push(finished),
                None => {
                    sdk_debug!(
                        name: "Transaction.UnfinishedSpanDropped",
                        message = "span was still running when its transaction finished"
                    );
                }
            }
        }

        let Some(finished_root) = root.to_finished() else {
            return;
        };
        let (name, source) = tree
            .transaction
            .lock()
            .map(|meta| (meta.name.clone(), meta.source))
            .unwrap_or((Cow::Borrowed(""), Default::default()));

        // Freeze the sampling context now at the latest; downstream services
        // continuing this trace must see exactly this value.
        let dsc = root.freeze_dsc();
        let envelope = Envelope {
            header: EnvelopeHeader { trace: dsc },
            transaction: FinishedTransaction {
                name,
                source,
                sample_rate: tree.sampling.sample_rate,
                root: finished_root,
                spans,
            },
        };

        if let Err(error) = self.inner.transport.submit(envelope) {
            sdk_warn!(
                name: "Tracer.SubmitFailed",
                message = "transport rejected the finished transaction",
                error = error.to_string()
            );
            let reason = match error {
                TransportError::QueueFull => DiscardReason::QueueOverflow,
                _ => DiscardReason::NetworkError,
            };
            self.inner
                .client_reports
                .record_drop(reason, DataCategory::Transaction);
        }
    }
}
