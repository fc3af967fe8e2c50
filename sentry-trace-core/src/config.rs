//! SDK Configuration
//!
//! Configuration is consumed by the tracer; loading it (files, environment,
//! CLI) is the responsibility of the embedding application.

use crate::trace::{IdGenerator, RandomIdGenerator, TracesSampler};
use regex::Regex;
use std::borrow::Cow;

/// Default bound for each scope's breadcrumb ring buffer.
pub const DEFAULT_MAX_BREADCRUMBS: usize = 100;

/// Tracer configuration.
#[derive(Debug)]
#[non_exhaustive]
pub struct Config {
    /// Static probability in `[0, 1]` that a new root trace is sampled.
    /// Ignored when `traces_sampler` is set. `None` disables sampling unless
    /// a callback is configured.
    pub traces_sample_rate: Option<f64>,

    /// Callback computing the sample rate per trace. Wins over
    /// `traces_sample_rate`.
    pub traces_sampler: Option<TracesSampler>,

    /// Release identifier propagated in the dynamic sampling context.
    pub release: Option<Cow<'static, str>>,

    /// Deployment environment propagated in the dynamic sampling context.
    pub environment: Option<Cow<'static, str>>,

    /// Public key of the project the telemetry belongs to.
    pub public_key: Option<Cow<'static, str>>,

    /// URLs eligible for trace header injection on outgoing requests.
    pub trace_propagation_targets: TracePropagationTargets,

    /// Bound for each scope's breadcrumb ring buffer.
    pub max_breadcrumbs: usize,

    /// The id generator the tracer should use.
    pub id_generator: Box<dyn IdGenerator>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            traces_sample_rate: None,
            traces_sampler: None,
            release: None,
            environment: None,
            public_key: None,
            trace_propagation_targets: TracePropagationTargets::default(),
            max_breadcrumbs: DEFAULT_MAX_BREADCRUMBS,
            id_generator: Box::<RandomIdGenerator>::default(),
        }
    }
}

/// A single trace propagation target pattern.
#[derive(Debug, Clone)]
pub enum TargetPattern {
    /// Matches any URL containing this substring.
    Exact(String),
    /// Matches any URL the regex finds a match in.
    Pattern(Regex),
}

impl TargetPattern {
    fn is_match(&self, url: &str) -> bool {
        match self {
            TargetPattern::Exact(fragment) => url.contains(fragment.as_str()),
            TargetPattern::Pattern(regex) => regex.is_match(url),
        }
    }
}

impl From<&str> for TargetPattern {
    fn from(fragment: &str) -> Self {
        TargetPattern::Exact(fragment.to_owned())
    }
}

impl From<String> for TargetPattern {
    fn from(fragment: String) -> Self {
        TargetPattern::Exact(fragment)
    }
}

impl From<Regex> for TargetPattern {
    fn from(regex: Regex) -> Self {
        TargetPattern::Pattern(regex)
    }
}

/// The set of URLs outgoing requests may carry trace headers to.
///
/// The default matches every URL, so continuation headers are attached to all
/// outgoing requests unless the application narrows the set.
#[derive(Debug, Clone, Default)]
pub struct TracePropagationTargets {
    patterns: Option<Vec<TargetPattern>>,
}

impl TracePropagationTargets {
    /// Restrict propagation to URLs matching any of the given patterns.
    pub fn matching<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<TargetPattern>,
    {
        TracePropagationTargets {
            patterns: Some(patterns.into_iter().map(Into::into).collect()),
        }
    }

    /// Returns `true` if trace headers should be attached to a request to
    /// `url`.
    pub fn is_match(&self, url: &str) -> bool {
        match &self.patterns {
            None => true,
            Some(patterns) => patterns.iter().any(|pattern| pattern.is_match(url)),
        }
    }
}
