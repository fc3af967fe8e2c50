//! Execution-scoped mutable state.
//!
//! A [`Scope`] holds the state that colors all telemetry produced by one
//! logical execution context: the active span, tags, the user, breadcrumbs
//! and extra data. Scopes form a stack per execution context; forking creates
//! a copy that inherits everything and may diverge independently, and popping
//! the fork never affects the parent. No two concurrent execution contexts
//! share write access to the same scope instance.
//!
//! The ambient current scope is thread-local state. Asynchronous continuation
//! work captures a snapshot at scheduling time through
//! [`FutureScopeExt`](crate::scope::FutureScopeExt) and restores it around
//! every poll, so a callback always observes the scope that was active when
//! it was scheduled.

use crate::config::DEFAULT_MAX_BREADCRUMBS;
use crate::sdk_warn;
use crate::trace::SpanId;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::time::SystemTime;

mod future_ext;

pub use future_ext::{FutureScopeExt, StreamScopeExt, WithScope};

thread_local! {
    static CURRENT_STACK: RefCell<ScopeStack> = RefCell::new(ScopeStack::default());
}

/// The user the current execution context acts on behalf of.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct User {
    /// Stable identifier of the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Login name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Email address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Segment the user belongs to, propagated for trace sampling rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
}

/// Severity of a [`Breadcrumb`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreadcrumbLevel {
    /// Diagnostic detail.
    Debug,
    /// Regular activity.
    #[default]
    Info,
    /// Something surprising but survivable.
    Warning,
    /// A failure.
    Error,
}

/// A single entry in the trail of events leading up to a telemetry item.
#[derive(Clone, Debug, Serialize)]
#[non_exhaustive]
pub struct Breadcrumb {
    /// When the breadcrumb was recorded.
    #[serde(serialize_with = "crate::util::serialize_system_time")]
    pub timestamp: SystemTime,
    /// Severity of the entry.
    pub level: BreadcrumbLevel,
    /// Dotted category such as `http` or `navigation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Human readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Breadcrumb {
    /// Creates an informational breadcrumb with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Breadcrumb {
            timestamp: SystemTime::now(),
            level: BreadcrumbLevel::default(),
            category: None,
            message: Some(message.into()),
        }
    }
}

/// A mutable snapshot of per-execution-context state.
#[derive(Clone, Debug)]
pub struct Scope {
    active_span: Option<SpanId>,
    tags: BTreeMap<String, String>,
    user: Option<User>,
    extra: BTreeMap<String, serde_json::Value>,
    fingerprint: Vec<String>,
    breadcrumbs: VecDeque<Breadcrumb>,
    max_breadcrumbs: usize,
    replay_id: Option<String>,
}

impl Default for Scope {
    fn default() -> Self {
        Scope {
            active_span: None,
            tags: BTreeMap::new(),
            user: None,
            extra: BTreeMap::new(),
            fingerprint: Vec::new(),
            breadcrumbs: VecDeque::new(),
            max_breadcrumbs: DEFAULT_MAX_BREADCRUMBS,
            replay_id: None,
        }
    }
}

impl Scope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Scope::default()
    }

    /// Creates an independent copy inheriting all fields. The fork and the
    /// original may diverge freely afterwards.
    pub fn fork(&self) -> Scope {
        self.clone()
    }

    /// The span new child spans should attach to as parent, as a lookup key
    /// into the tracer's live-span table. Holding the id does not keep the
    /// span alive; once it finishes, lookups resolve to nothing.
    pub fn active_span(&self) -> Option<SpanId> {
        self.active_span
    }

    /// Stores or clears the active span key.
    pub fn set_active_span(&mut self, span: Option<SpanId>) {
        self.active_span = span;
    }

    /// Sets a tag.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Removes a tag.
    pub fn remove_tag(&mut self, key: &str) {
        self.tags.remove(key);
    }

    /// The tags of this scope.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Sets or clears the user.
    pub fn set_user(&mut self, user: Option<User>) {
        self.user = user;
    }

    /// The user of this scope.
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Sets an extra value.
    pub fn set_extra(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extra.insert(key.into(), value);
    }

    /// The extra values of this scope.
    pub fn extra(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.extra
    }

    /// Replaces the fingerprint used to group telemetry from this scope.
    pub fn set_fingerprint(&mut self, fingerprint: Vec<String>) {
        self.fingerprint = fingerprint;
    }

    /// The fingerprint of this scope.
    pub fn fingerprint(&self) -> &[String] {
        &self.fingerprint
    }

    /// Appends a breadcrumb, evicting the oldest entries beyond the bound.
    pub fn add_breadcrumb(&mut self, breadcrumb: Breadcrumb) {
        self.breadcrumbs.push_back(breadcrumb);
        while self.breadcrumbs.len() > self.max_breadcrumbs {
            self.breadcrumbs.pop_front();
        }
    }

    /// The recorded breadcrumbs, oldest first.
    pub fn breadcrumbs(&self) -> impl Iterator<Item = &Breadcrumb> {
        self.breadcrumbs.iter()
    }

    /// Changes the breadcrumb ring buffer bound, evicting as needed.
    pub fn set_max_breadcrumbs(&mut self, max: usize) {
        self.max_breadcrumbs = max;
        while self.breadcrumbs.len() > self.max_breadcrumbs {
            self.breadcrumbs.pop_front();
        }
    }

    /// Sets or clears the id of the session replay recorded alongside this
    /// context. Set by the replay integration, consumed by the dynamic
    /// sampling context.
    pub fn set_replay_id(&mut self, replay_id: Option<String>) {
        self.replay_id = replay_id;
    }

    /// The replay id of this scope.
    pub fn replay_id(&self) -> Option<&str> {
        self.replay_id.as_deref()
    }
}

/// Returns a clone of the calling execution context's current scope.
pub fn current() -> Scope {
    with_current(|scope| scope.clone())
}

/// Applies a function to the current scope, returning its value.
///
/// This avoids cloning when only a field is needed. Note: the function must
/// not attach or pop scopes while the current one is borrowed.
pub fn with_current<T>(f: impl FnOnce(&Scope) -> T) -> T {
    CURRENT_STACK.with(|stack| f(&stack.borrow().current))
}

/// Mutates the current scope in place.
///
/// Note: the function must not attach or pop scopes while the current one is
/// borrowed.
pub fn configure<T>(f: impl FnOnce(&mut Scope) -> T) -> T {
    CURRENT_STACK.with(|stack| f(&mut stack.borrow_mut().current))
}

/// Pushes a fork of the current scope and returns a guard that pops it.
///
/// Dropping the guard restores the previous scope, also when unwinding, so a
/// fork can never leak onto the stack.
#[must_use = "dropping the guard immediately pops the scope again"]
pub fn push_scope() -> ScopeGuard {
    attach(with_current(Scope::fork))
}

/// Replaces the current scope on this thread with the given scope.
///
/// Dropping the returned [`ScopeGuard`] will reset the current scope to the
/// previous value. Continuation wrappers use this to restore a snapshot
/// captured at scheduling time.
pub fn attach(scope: Scope) -> ScopeGuard {
    let pos = CURRENT_STACK.with(|stack| stack.borrow_mut().push(scope));
    ScopeGuard {
        pos,
        _marker: PhantomData,
    }
}

/// Runs `f` with a forked scope as the ambient current scope.
///
/// The fork is popped on every exit path — normal return, early return and
/// unwinding — so mutations made inside `f` are never visible to the caller's
/// scope.
pub fn with_scope<T>(f: impl FnOnce() -> T) -> T {
    let _guard = push_scope();
    f()
}

/// A guard that resets the current scope to the prior scope when dropped.
#[derive(Debug)]
pub struct ScopeGuard {
    // The position of the scope in the stack. This is used to pop the scope.
    pos: u16,
    // Ensure this type is !Send as it relies on thread locals
    _marker: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let pos = self.pos;
        if pos > ScopeStack::BASE_POS && pos < ScopeStack::MAX_POS {
            CURRENT_STACK.with(|stack| stack.borrow_mut().pop_id(pos));
        }
    }
}

/// A stack for keeping track of the [`Scope`] instances that have been
/// attached to a thread.
///
/// The stack allows for popping of scopes by position, which is used to do
/// out of order dropping of [`ScopeGuard`] instances. Only when the top of
/// the stack is popped, the topmost [`Scope`] is actually restored.
///
/// The stack relies on the fact that it is thread local and that the
/// [`ScopeGuard`] instances that are constructed using ids from it can't be
/// moved to other threads. That means that the ids are always valid and that
/// they are always within the bounds of the stack.
struct ScopeStack {
    /// This is the current [`Scope`] that is active on this thread, and the
    /// top of the [`ScopeStack`]. It is always present, and if the `stack` is
    /// empty it's an empty [`Scope`].
    current: Scope,
    /// A `stack` of the other scopes that have been attached to the thread.
    stack: Vec<Option<Scope>>,
    /// Ensure this type is !Send as it relies on thread locals
    _marker: PhantomData<*const ()>,
}

impl ScopeStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    #[inline(always)]
    fn push(&mut self, scope: Scope) -> u16 {
        // The next id is the length of the `stack`, plus one since we have
        // the top of the [`ScopeStack`] as `current`.
        let next_id = self.stack.len() + 1;
        if next_id < ScopeStack::MAX_POS.into() {
            let previous = std::mem::replace(&mut self.current, scope);
            self.stack.push(Some(previous));
            next_id as u16
        } else {
            // This is an overflow, log it and ignore it.
            sdk_warn!(
                name: "Scope.AttachFailed",
                message = format!(
                    "Too many scopes. Max limit is {}. The current scope remains \
                     unchanged as this attach failed. Dropping the returned \
                     ScopeGuard will have no impact.",
                    ScopeStack::MAX_POS
                )
            );
            ScopeStack::MAX_POS
        }
    }

    #[inline(always)]
    fn pop_id(&mut self, pos: u16) {
        if pos == ScopeStack::BASE_POS || pos == ScopeStack::MAX_POS {
            // The base scope is always at the bottom of the [`ScopeStack`]
            // and cannot be popped, and the overflow position is invalid, so
            // do nothing.
            sdk_warn!(
                name: "Scope.OutOfOrderDrop",
                position = pos,
                message = if pos == ScopeStack::BASE_POS {
                    "Attempted to pop the base scope which is not allowed"
                } else {
                    "Attempted to pop the overflow position which is not allowed"
                }
            );
            return;
        }
        let len: u16 = self.stack.len() as u16;
        // Are we at the top of the [`ScopeStack`]?
        if pos == len {
            // Shrink the stack if possible to clear out any out of order pops.
            while let Some(None) = self.stack.last() {
                _ = self.stack.pop();
            }
            // Restore the previous scope. This will always happen since the
            // base scope is always at the bottom of the stack if the
            // [`ScopeStack`] is not empty.
            if let Some(Some(previous)) = self.stack.pop() {
                self.current = previous;
            }
        } else {
            // This is an out of order pop.
            if pos >= len {
                // This is an invalid id, ignore it.
                sdk_warn!(
                    name: "Scope.PopOutOfBounds",
                    position = pos,
                    stack_length = len,
                    message = "Attempted to pop beyond the end of the scope stack"
                );
                return;
            }
            // Clear out the entry at the given id.
            _ = self.stack[pos as usize].take();
        }
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        ScopeStack {
            current: Scope::default(),
            stack: Vec::with_capacity(ScopeStack::INITIAL_CAPACITY),
            _marker: PhantomData,
        }
    }
}
