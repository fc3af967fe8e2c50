//! # Span
//!
//! `Span`s represent a single operation within a trace. Spans can be nested
//! to form a trace tree. Each trace contains a root span (the transaction),
//! which typically describes the end-to-end latency and one or more sub-spans
//! for its sub-operations.
//!
//! A span's start timestamp is set on creation; its end timestamp when it is
//! finished. After a span is finished all mutation is ignored, so a tree that
//! has been handed to transport can never be observed half-updated.

use crate::envelope::DynamicSamplingContext;
use crate::scope;
use crate::sdk_debug;
use crate::trace::export::FinishedSpan;
use crate::trace::sampler::SamplingResult;
use crate::trace::tracer::Tracer;
use crate::trace::transaction::TransactionSource;
use crate::trace::{SpanContext, SpanId};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;

/// State of a span at finish time.
///
/// A span that was never explicitly marked defaults to `Unset`, not `Ok`:
/// success must be stated by the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SpanStatus {
    /// No status was recorded.
    #[default]
    Unset,
    /// The operation completed successfully.
    Ok,
    /// The operation was cancelled, typically by the caller.
    Cancelled,
    /// An unknown error left the operation in an undefined state.
    Unknown,
    /// The caller supplied an invalid argument.
    InvalidArgument,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded,
    /// A requested entity was not found.
    NotFound,
    /// The caller lacked permission for the operation.
    PermissionDenied,
    /// A resource (quota, storage) was exhausted.
    ResourceExhausted,
    /// The operation is not implemented or enabled.
    Unimplemented,
    /// The service is temporarily unavailable.
    Unavailable,
    /// An invariant inside the instrumented system broke.
    InternalError,
    /// The operation was aborted, typically due to a concurrency conflict.
    Aborted,
}

impl SpanStatus {
    /// The wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Unset => "unset",
            SpanStatus::Ok => "ok",
            SpanStatus::Cancelled => "cancelled",
            SpanStatus::Unknown => "unknown",
            SpanStatus::InvalidArgument => "invalid_argument",
            SpanStatus::DeadlineExceeded => "deadline_exceeded",
            SpanStatus::NotFound => "not_found",
            SpanStatus::PermissionDenied => "permission_denied",
            SpanStatus::ResourceExhausted => "resource_exhausted",
            SpanStatus::Unimplemented => "unimplemented",
            SpanStatus::Unavailable => "unavailable",
            SpanStatus::InternalError => "internal_error",
            SpanStatus::Aborted => "aborted",
        }
    }

    /// Returns `true` if no status was recorded.
    pub fn is_unset(&self) -> bool {
        matches!(self, SpanStatus::Unset)
    }
}

/// A scalar attribute value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    I64(i64),
    /// Floating point value.
    F64(f64),
    /// String value.
    String(String),
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SpanData {
    pub(crate) name: Cow<'static, str>,
    pub(crate) op: Cow<'static, str>,
    pub(crate) start_time: SystemTime,
    pub(crate) end_time: Option<SystemTime>,
    pub(crate) status: SpanStatus,
    pub(crate) attributes: HashMap<String, Value>,
    pub(crate) origin: Cow<'static, str>,
}

impl SpanData {
    pub(crate) fn new(name: Cow<'static, str>, op: Cow<'static, str>) -> Self {
        SpanData {
            name,
            op,
            start_time: SystemTime::now(),
            end_time: None,
            status: SpanStatus::Unset,
            attributes: HashMap::new(),
            origin: Cow::Borrowed("manual"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct TransactionMeta {
    pub(crate) name: Cow<'static, str>,
    pub(crate) source: TransactionSource,
}

#[derive(Clone, Debug)]
pub(crate) struct ChildEntry {
    pub(crate) context: SpanContext,
    pub(crate) data: Arc<Mutex<SpanData>>,
}

/// Shared per-trace state: the root's sampling decision, the transaction
/// naming, the registered descendants and the frozen dynamic sampling
/// context.
#[derive(Debug)]
pub(crate) struct SpanTree {
    pub(crate) root_span_id: SpanId,
    pub(crate) sampling: SamplingResult,
    pub(crate) transaction: Mutex<TransactionMeta>,
    pub(crate) children: Mutex<Vec<ChildEntry>>,
    pub(crate) dsc: OnceLock<DynamicSamplingContext>,
}

#[derive(Clone, Debug)]
pub(crate) struct SpanInner {
    pub(crate) context: SpanContext,
    pub(crate) data: Arc<Mutex<SpanData>>,
    pub(crate) tree: Arc<SpanTree>,
}

/// Single operation within a trace.
///
/// Spans are cheap-to-clone handles; all clones refer to the same recorded
/// data. A span may be finished at most once — later attempts are no-ops.
#[derive(Clone, Debug)]
pub struct Span {
    pub(crate) inner: SpanInner,
    pub(crate) tracer: Tracer,
}

impl Span {
    /// Returns the identity of this span.
    pub fn span_context(&self) -> &SpanContext {
        &self.inner.context
    }

    /// The id of the trace this span belongs to.
    pub fn trace_id(&self) -> crate::trace::TraceId {
        self.inner.context.trace_id()
    }

    /// The id of this span.
    pub fn span_id(&self) -> SpanId {
        self.inner.context.span_id()
    }

    /// Returns `true` if the trace this span belongs to is sampled.
    pub fn is_sampled(&self) -> bool {
        self.inner.context.is_sampled()
    }

    /// Returns `true` if this span is the root of its trace tree.
    pub fn is_root(&self) -> bool {
        self.inner.tree.root_span_id == self.inner.context.span_id()
    }

    /// Returns `true` if the span has not been finished yet.
    pub fn is_recording(&self) -> bool {
        self.with_data(|data| data.end_time.is_none()).unwrap_or(false)
    }

    /// Sets a single attribute. Ignored once the span is finished.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.with_recording_data(|data| {
            data.attributes.insert(key.into(), value.into());
        });
    }

    /// Sets the status. Ignored once the span is finished.
    pub fn set_status(&self, status: SpanStatus) {
        self.with_recording_data(|data| {
            data.status = status;
        });
    }

    /// Updates the span's name. Ignored once the span is finished.
    pub fn update_name(&self, name: impl Into<Cow<'static, str>>) {
        let name = name.into();
        self.with_recording_data(|data| {
            data.name = name;
        });
    }

    /// Sets the origin tag recording which instrumentation created the span.
    /// Ignored once the span is finished.
    pub fn set_origin(&self, origin: impl Into<Cow<'static, str>>) {
        let origin = origin.into();
        self.with_recording_data(|data| {
            data.origin = origin;
        });
    }

    /// Starts a child span of this span, inheriting the trace id and the
    /// sampling decision.
    pub fn start_child(
        &self,
        name: impl Into<Cow<'static, str>>,
        op: impl Into<Cow<'static, str>>,
    ) -> Span {
        self.tracer.start_child_of(&self.inner, name.into(), op.into())
    }

    /// Finishes the span now.
    pub fn finish(&self) {
        self.finish_with_timestamp(SystemTime::now());
    }

    /// Records a status and finishes the span now.
    pub fn finish_with_status(&self, status: SpanStatus) {
        self.set_status(status);
        self.finish();
    }

    /// Finishes the span with an explicit end timestamp.
    ///
    /// Finishing is idempotent: concurrent or repeated finish attempts are a
    /// realistic race and later calls leave the first end timestamp and
    /// status untouched. End timestamps earlier than the start are clamped to
    /// the start. Finishing the root span emits the collected tree.
    pub fn finish_with_timestamp(&self, timestamp: SystemTime) {
        let newly_finished = self
            .with_data(|data| {
                if data.end_time.is_some() {
                    sdk_debug!(
                        name: "Span.AlreadyFinished",
                        message = "finish called twice, keeping the first end timestamp"
                    );
                    false
                } else {
                    data.end_time = Some(timestamp.max(data.start_time));
                    true
                }
            })
            .unwrap_or(false);

        if newly_finished {
            self.tracer.on_span_finished(self);
        }
    }

    /// Returns the frozen dynamic sampling context of this trace,
    /// materializing it from the current scope and configuration on first
    /// use.
    pub(crate) fn freeze_dsc(&self) -> DynamicSamplingContext {
        let tree = &self.inner.tree;
        tree.dsc
            .get_or_init(|| {
                let (name, source) = tree
                    .transaction
                    .lock()
                    .map(|meta| (meta.name.clone(), meta.source))
                    .unwrap_or((Cow::Borrowed(""), TransactionSource::Custom));
                scope::with_current(|current| {
                    DynamicSamplingContext::from_parts(
                        self.inner.context.trace_id(),
                        tree.sampling.sampled,
                        tree.sampling.sample_rate,
                        &name,
                        source,
                        self.tracer.config(),
                        current,
                    )
                })
            })
            .clone()
    }

    pub(crate) fn to_finished(&self) -> Option<FinishedSpan> {
        self.with_data(|data| FinishedSpan::from_data(&self.inner.context, data))
            .flatten()
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut SpanData) -> T) -> Option<T> {
        self.inner.data.lock().ok().map(|mut guard| f(&mut guard))
    }

    fn with_recording_data(&self, f: impl FnOnce(&mut SpanData)) {
        self.with_data(|data| {
            if data.end_time.is_some() {
                sdk_debug!(
                    name: "Span.MutateAfterFinish",
                    message = "span already finished, mutation ignored"
                );
            } else {
                f(data);
            }
        });
    }
}

impl FinishedSpan {
    pub(crate) fn from_data(context: &SpanContext, data: &SpanData) -> Option<FinishedSpan> {
        let end_timestamp = data.end_time?;
        Some(FinishedSpan {
            trace_id: context.trace_id(),
            span_id: context.span_id(),
            parent_span_id: context.parent_span_id(),
            name: data.name.clone(),
            op: data.op.clone(),
            start_timestamp: data.start_time,
            end_timestamp,
            status: data.status,
            attributes: data.attributes.clone(),
            origin: data.origin.clone(),
            sampled: context.is_sampled(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::trace::id_generator::IncrementIdGenerator;
    use crate::trace::in_memory_transport::InMemoryTransport;
    use crate::trace::transaction::TransactionContext;
    use crate::trace::Tracer;
    use std::time::Duration;

    fn test_tracer(sample_rate: f64) -> (Tracer, InMemoryTransport) {
        let transport = InMemoryTransport::default();
        let mut config = Config::default();
        config.traces_sample_rate = Some(sample_rate);
        config.id_generator = Box::new(IncrementIdGenerator::new());
        let tracer = Tracer::builder()
            .with_config(config)
            .with_transport(transport.clone())
            .build();
        (tracer, transport)
    }

    #[test]
    fn double_finish_is_idempotent() {
        let (tracer, _transport) = test_tracer(1.0);
        let transaction = tracer.start_transaction(TransactionContext::new("outer", "task"));
        let span = transaction.start_child("inner", "db.sql.query");

        let first_end = SystemTime::now() + Duration::from_secs(1);
        span.set_status(SpanStatus::Ok);
        span.finish_with_timestamp(first_end);

        // A later concurrent finish attempt must not move the end timestamp
        // or the status.
        span.set_status(SpanStatus::InternalError);
        span.finish_with_timestamp(first_end + Duration::from_secs(5));

        let finished = span.to_finished().unwrap();
        assert_eq!(finished.end_timestamp, first_end);
        assert_eq!(finished.status, SpanStatus::Ok);
    }

    #[test]
    fn mutation_after_finish_is_ignored() {
        let (tracer, _transport) = test_tracer(1.0);
        let transaction = tracer.start_transaction(TransactionContext::new("outer", "task"));
        let span = transaction.start_child("inner", "db.sql.query");
        span.set_attribute("db.rows", 3i64);
        span.finish();

        span.set_attribute("db.rows", 99i64);
        span.update_name("renamed");
        span.set_origin("auto.db");

        let finished = span.to_finished().unwrap();
        assert_eq!(finished.attributes.get("db.rows"), Some(&Value::I64(3)));
        assert_eq!(finished.name, "inner");
        assert_eq!(finished.origin, "manual");
    }

    #[test]
    fn end_timestamp_never_precedes_start() {
        let (tracer, _transport) = test_tracer(1.0);
        let transaction = tracer.start_transaction(TransactionContext::new("outer", "task"));
        let span = transaction.start_child("inner", "db.sql.query");

        span.finish_with_timestamp(SystemTime::UNIX_EPOCH);

        let finished = span.to_finished().unwrap();
        assert!(finished.end_timestamp >= finished.start_timestamp);
    }

    #[test]
    fn status_defaults_to_unset_not_ok() {
        let (tracer, _transport) = test_tracer(1.0);
        let transaction = tracer.start_transaction(TransactionContext::new("outer", "task"));
        let span = transaction.start_child("inner", "db.sql.query");
        span.finish();

        assert_eq!(span.to_finished().unwrap().status, SpanStatus::Unset);
        assert!(SpanStatus::Unset.is_unset());
    }

    #[test]
    fn children_inherit_trace_id_and_decision() {
        let (tracer, _transport) = test_tracer(1.0);
        let transaction = tracer.start_transaction(TransactionContext::new("outer", "task"));
        let child = transaction.start_child("inner", "db.sql.query");
        let grandchild = child.start_child("deeper", "serialize");

        for span in [&child, &grandchild] {
            assert_eq!(span.trace_id(), transaction.trace_id());
            assert!(span.is_sampled());
            assert!(!span.is_root());
        }
        assert_eq!(child.span_context().parent_span_id(), Some(transaction.span_id()));
        assert_eq!(grandchild.span_context().parent_span_id(), Some(child.span_id()));
        assert!(transaction.is_root());
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(SpanStatus::DeadlineExceeded.as_str(), "deadline_exceeded");
        assert_eq!(
            serde_json::to_string(&SpanStatus::InternalError).unwrap(),
            "\"internal_error\""
        );
    }

    #[test]
    fn attribute_values_serialize_as_scalars() {
        let attributes: Vec<Value> = vec![
            true.into(),
            42i64.into(),
            1.5f64.into(),
            "label".into(),
        ];
        assert_eq!(
            serde_json::to_string(&attributes).unwrap(),
            "[true,42,1.5,\"label\"]"
        );
    }
}
