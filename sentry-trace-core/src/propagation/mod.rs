//! Trace continuity propagation.
//!
//! Cross-process trace continuity rides on two headers: the compact
//! `sentry-trace` continuation header and the extensible `baggage` header
//! carrying the dynamic sampling context next to third-party entries.
//! [`Injector`] and [`Extractor`] decouple the codecs from the carrier, which
//! is usually an HTTP header map owned by an instrumentation collaborator.

use crate::envelope::DynamicSamplingContext;
use crate::sdk_debug;
use crate::trace::{SpanContext, SpanId, TraceId};
use std::borrow::Cow;
use std::collections::HashMap;

pub mod baggage;
pub mod sentry_trace;

pub use baggage::{Baggage, SENTRY_BAGGAGE_PREFIX};
pub use sentry_trace::{format_sentry_trace, parse_sentry_trace, SentryTrace};

/// Header carrying the compact trace continuation value.
pub const SENTRY_TRACE_HEADER: &str = "sentry-trace";
/// Header carrying baggage entries.
pub const BAGGAGE_HEADER: &str = "baggage";

const FIELDS: [&str; 2] = [SENTRY_TRACE_HEADER, BAGGAGE_HEADER];

/// Injector provides an interface for adding fields to an underlying struct
/// like `HashMap`.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Extractor provides an interface for reading fields from an underlying
/// struct like `HashMap`.
pub trait Extractor {
    /// Get a value for a key from the underlying data.
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<Cow<'_, str>>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(&key.to_lowercase())
            .map(|v| Cow::Borrowed(v.as_str()))
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.keys()
            .map(|k| Cow::Borrowed(k.as_str()))
            .collect::<Vec<_>>()
    }
}

/// Everything learned from an inbound request about the trace to continue.
#[derive(Clone, Debug, PartialEq)]
pub struct PropagationContext {
    /// The trace the upstream service started or continued.
    pub trace_id: TraceId,
    /// The upstream span a local root transaction should attach under.
    pub parent_span_id: SpanId,
    /// The upstream sampling decision, inherited verbatim when present.
    pub parent_sampled: Option<bool>,
    /// The frozen dynamic sampling context, if upstream materialized one.
    pub dsc: Option<DynamicSamplingContext>,
    /// All baggage entries as received, third-party entries included.
    pub baggage: Baggage,
}

/// Propagates trace continuity in the `sentry-trace` and `baggage` headers.
#[derive(Clone, Debug, Default)]
pub struct SentryTracePropagator {
    _private: (),
}

impl SentryTracePropagator {
    /// Create a new `SentryTracePropagator`.
    pub fn new() -> Self {
        SentryTracePropagator { _private: () }
    }

    /// Reads the continuation headers from an inbound carrier.
    ///
    /// A missing or malformed `sentry-trace` header yields `None`: the caller
    /// proceeds with a fresh root trace. Baggage problems never fail the
    /// extraction; individual entries degrade on their own.
    pub fn extract(&self, extractor: &dyn Extractor) -> Option<PropagationContext> {
        let header_value = extractor.get(SENTRY_TRACE_HEADER)?;
        let sentry_trace = match parse_sentry_trace(&header_value) {
            Ok(sentry_trace) => sentry_trace,
            Err(error) => {
                sdk_debug!(
                    name: "Propagator.Extract.InvalidSentryTrace",
                    message = "malformed sentry-trace header, starting a fresh trace",
                    error = error.to_string()
                );
                return None;
            }
        };

        let baggage = extractor
            .get(BAGGAGE_HEADER)
            .map(|header| Baggage::parse(&header))
            .unwrap_or_default();
        let dsc = DynamicSamplingContext::from_baggage(&baggage);

        Some(PropagationContext {
            trace_id: sentry_trace.trace_id,
            parent_span_id: sentry_trace.span_id,
            parent_sampled: sentry_trace.sampled,
            dsc,
            baggage,
        })
    }

    /// Writes the continuation headers for an outbound carrier.
    ///
    /// The `baggage` header is only written when a dynamic sampling context
    /// exists for the trace.
    pub fn inject(
        &self,
        span_context: &SpanContext,
        dsc: Option<&DynamicSamplingContext>,
        injector: &mut dyn Injector,
    ) {
        if !span_context.is_valid() {
            return;
        }
        injector.set(
            SENTRY_TRACE_HEADER,
            format_sentry_trace(
                span_context.trace_id(),
                span_context.span_id(),
                span_context.sampled(),
            ),
        );
        if let Some(dsc) = dsc {
            let mut baggage = Baggage::new();
            dsc.apply_to_baggage(&mut baggage);
            injector.set(BAGGAGE_HEADER, baggage.to_header());
        }
    }

    /// The header names this propagator reads and writes.
    pub fn fields(&self) -> impl Iterator<Item = &'static str> {
        FIELDS.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carrier(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn extract_full_continuation() {
        let propagator = SentryTracePropagator::new();
        let extractor = carrier(&[
            (
                "sentry-trace",
                "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-1",
            ),
            (
                "baggage",
                "sentry-trace_id=aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa,sentry-sample_rate=0.5,vendor=blob",
            ),
        ]);

        let context = propagator.extract(&extractor).unwrap();
        assert_eq!(
            context.trace_id,
            TraceId::from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap()
        );
        assert_eq!(
            context.parent_span_id,
            SpanId::from_hex("bbbbbbbbbbbbbbbb").unwrap()
        );
        assert_eq!(context.parent_sampled, Some(true));

        let dsc = context.dsc.unwrap();
        assert_eq!(dsc.sample_rate_value(), Some(0.5));
        assert_eq!(context.baggage.get("vendor").as_deref(), Some("blob"));
    }

    #[rustfmt::skip]
    fn no_parent_data() -> Vec<(Vec<(&'static str, &'static str)>, &'static str)> {
        vec![
            (vec![], "no headers at all"),
            (vec![("sentry-trace", "not-a-header")], "malformed sentry-trace"),
            (vec![("baggage", "sentry-trace_id=aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")], "baggage without sentry-trace"),
        ]
    }

    #[test]
    fn extract_without_usable_header_yields_no_parent() {
        let propagator = SentryTracePropagator::new();
        for (entries, reason) in no_parent_data() {
            let extractor = carrier(&entries);
            assert!(propagator.extract(&extractor).is_none(), "{reason}");
        }
    }

    #[test]
    fn inject_writes_both_headers() {
        let propagator = SentryTracePropagator::new();
        let span_context = SpanContext::new(
            TraceId::from(0xau128),
            SpanId::from(0xbu64),
            None,
            Some(true),
            false,
        );
        let dsc = DynamicSamplingContext {
            trace_id: "0000000000000000000000000000000a".to_owned(),
            sampled: Some("true".to_owned()),
            ..Default::default()
        };

        let mut injector = HashMap::new();
        propagator.inject(&span_context, Some(&dsc), &mut injector);

        assert_eq!(
            injector.get("sentry-trace").map(String::as_str),
            Some("0000000000000000000000000000000a-000000000000000b-1")
        );
        assert_eq!(
            injector.get("baggage").map(String::as_str),
            Some("sentry-trace_id=0000000000000000000000000000000a,sentry-sampled=true")
        );
    }

    #[test]
    fn inject_without_dsc_skips_baggage() {
        let propagator = SentryTracePropagator::new();
        let span_context = SpanContext::new(
            TraceId::from(1u128),
            SpanId::from(2u64),
            None,
            None,
            false,
        );

        let mut injector = HashMap::new();
        propagator.inject(&span_context, None, &mut injector);

        assert!(injector.contains_key("sentry-trace"));
        assert!(!injector.contains_key("baggage"));
    }
}
