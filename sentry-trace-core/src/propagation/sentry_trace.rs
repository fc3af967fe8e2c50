//! Trace continuation header codec.
//!
//! The header has the form `<traceId>-<spanId>[-<0|1>]` with a 32 hex char
//! trace id, a 16 hex char span id and an optional sampled flag. The sampled
//! segment is omitted while no decision has been made, so downstream services
//! know they are free to decide.

use crate::error::PropagationError;
use crate::trace::{SpanId, TraceId};
use std::fmt::Write;

/// The decoded contents of a trace continuation header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentryTrace {
    /// The trace being continued.
    pub trace_id: TraceId,
    /// The upstream span that becomes the local root's parent.
    pub span_id: SpanId,
    /// The upstream sampling decision, if one was made.
    pub sampled: Option<bool>,
}

/// Encodes a continuation header value.
pub fn format_sentry_trace(trace_id: TraceId, span_id: SpanId, sampled: Option<bool>) -> String {
    let mut header = String::with_capacity(51);
    let _ = write!(header, "{trace_id}-{span_id}");
    match sampled {
        Some(true) => header.push_str("-1"),
        Some(false) => header.push_str("-0"),
        None => {}
    }
    header
}

/// Decodes a continuation header value.
///
/// Errors are recovered by the caller as "no parent context": a malformed
/// header causes a fresh root trace, never a failure surfaced to application
/// code.
pub fn parse_sentry_trace(header_value: &str) -> Result<SentryTrace, PropagationError> {
    let mut segments = header_value.trim().split('-');

    let trace_id = parse_trace_id(segments.next().unwrap_or(""))?;
    let span_id = parse_span_id(segments.next().ok_or(PropagationError::Malformed)?)?;
    let sampled = match segments.next() {
        None => None,
        Some("1") => Some(true),
        Some("0") => Some(false),
        Some(_) => return Err(PropagationError::InvalidSampledFlag),
    };
    if segments.next().is_some() {
        return Err(PropagationError::Malformed);
    }

    Ok(SentryTrace {
        trace_id,
        span_id,
        sampled,
    })
}

fn parse_trace_id(segment: &str) -> Result<TraceId, PropagationError> {
    if segment.len() != 32 || !is_lower_hex(segment) {
        return Err(PropagationError::InvalidTraceId);
    }
    TraceId::from_hex(segment).map_err(|_| PropagationError::InvalidTraceId)
}

fn parse_span_id(segment: &str) -> Result<SpanId, PropagationError> {
    if segment.len() != 16 || !is_lower_hex(segment) {
        return Err(PropagationError::InvalidSpanId);
    }
    SpanId::from_hex(segment).map_err(|_| PropagationError::InvalidSpanId)
}

fn is_lower_hex(segment: &str) -> bool {
    segment
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    fn valid_header_data() -> Vec<(&'static str, SentryTrace)> {
        vec![
            ("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-1", SentryTrace { trace_id: TraceId::from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap(), span_id: SpanId::from_hex("bbbbbbbbbbbbbbbb").unwrap(), sampled: Some(true) }),
            ("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-0", SentryTrace { trace_id: TraceId::from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap(), span_id: SpanId::from_hex("bbbbbbbbbbbbbbbb").unwrap(), sampled: Some(false) }),
            ("4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7", SentryTrace { trace_id: TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(), span_id: SpanId::from_hex("00f067aa0ba902b7").unwrap(), sampled: None }),
            ("  4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-1  ", SentryTrace { trace_id: TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(), span_id: SpanId::from_hex("00f067aa0ba902b7").unwrap(), sampled: Some(true) }),
        ]
    }

    #[rustfmt::skip]
    fn invalid_header_data() -> Vec<(&'static str, PropagationError, &'static str)> {
        vec![
            ("not-a-header", PropagationError::InvalidTraceId, "not a header at all"),
            ("", PropagationError::InvalidTraceId, "empty header"),
            ("4bf92f3577b34da6a3ce929d0e0e4736", PropagationError::Malformed, "missing span id"),
            ("ab00000000000000000000000000000000-cd00000000000000-1", PropagationError::InvalidTraceId, "wrong trace id length"),
            ("ab000000000000000000000000000000-cd0000000000000000-1", PropagationError::InvalidSpanId, "wrong span id length"),
            ("AB000000000000000000000000000000-cd00000000000000-1", PropagationError::InvalidTraceId, "upper case trace id"),
            ("ab000000000000000000000000000000-CD00000000000000-1", PropagationError::InvalidSpanId, "upper case span id"),
            ("qw000000000000000000000000000000-cd00000000000000-1", PropagationError::InvalidTraceId, "bogus trace id"),
            ("ab000000000000000000000000000000-qw00000000000000-1", PropagationError::InvalidSpanId, "bogus span id"),
            ("ab000000000000000000000000000000-cd00000000000000-2", PropagationError::InvalidSampledFlag, "sampled flag out of range"),
            ("ab000000000000000000000000000000-cd00000000000000-true", PropagationError::InvalidSampledFlag, "worded sampled flag"),
            ("ab000000000000000000000000000000-cd00000000000000-1-x", PropagationError::Malformed, "trailing segment"),
            ("ab000000000000000000000000000000-cd00000000000000-", PropagationError::InvalidSampledFlag, "empty sampled segment"),
        ]
    }

    #[test]
    fn parse_valid_headers() {
        for (header, expected) in valid_header_data() {
            assert_eq!(parse_sentry_trace(header), Ok(expected), "{header}");
        }
    }

    #[test]
    fn reject_invalid_headers() {
        for (header, expected, reason) in invalid_header_data() {
            assert_eq!(parse_sentry_trace(header), Err(expected), "{reason}");
        }
    }

    #[test]
    fn round_trip() {
        for sampled in [Some(true), Some(false), None] {
            let trace_id = TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736u128);
            let span_id = SpanId::from(0x00f0_67aa_0ba9_02b7u64);

            let header = format_sentry_trace(trace_id, span_id, sampled);
            let parsed = parse_sentry_trace(&header).unwrap();

            assert_eq!(parsed.trace_id, trace_id);
            assert_eq!(parsed.span_id, span_id);
            assert_eq!(parsed.sampled, sampled);
        }
    }

    #[test]
    fn sampled_segment_is_omitted_when_undecided() {
        let header = format_sentry_trace(TraceId::from(1u128), SpanId::from(2u64), None);
        assert_eq!(header, "00000000000000000000000000000001-0000000000000002");
    }
}
