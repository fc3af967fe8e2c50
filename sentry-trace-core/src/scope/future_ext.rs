use crate::scope::{self, Scope};
use futures_core::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

pin_project! {
    /// A future or stream that carries the scope that was ambient when the
    /// continuation was scheduled.
    ///
    /// The snapshot is attached as the current scope for the duration of
    /// every poll and the caller's scope is restored afterwards, equivalent
    /// to a save/restore around a cooperative task switch. Mutations the
    /// continuation makes to its ambient scope persist across polls but are
    /// never visible to sibling continuations or the scheduling context.
    #[derive(Clone, Debug)]
    pub struct WithScope<T> {
        #[pin]
        inner: T,
        scope: Scope,
    }
}

impl<T: std::future::Future> std::future::Future for WithScope<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let guard = scope::attach(this.scope.clone());
        let poll = this.inner.poll(task_cx);
        // Carry mutations made during this poll over to the next one.
        *this.scope = scope::current();
        drop(guard);
        poll
    }
}

impl<T: Stream> Stream for WithScope<T> {
    type Item = T::Item;

    fn poll_next(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let guard = scope::attach(this.scope.clone());
        let poll = T::poll_next(this.inner, task_cx);
        *this.scope = scope::current();
        drop(guard);
        poll
    }
}

impl<F: std::future::Future> FutureScopeExt for F {}

/// Extension trait allowing futures to run under a captured scope.
pub trait FutureScopeExt: Sized {
    /// Attaches the provided [`Scope`] to this future, returning a
    /// `WithScope` wrapper.
    ///
    /// The attached scope will be set as current while this future is being
    /// polled.
    fn with_scope(self, scope: Scope) -> WithScope<Self> {
        WithScope { inner: self, scope }
    }

    /// Attaches a snapshot of the current [`Scope`] to this future, returning
    /// a `WithScope` wrapper.
    ///
    /// The snapshot is taken now, at scheduling time — not when the future is
    /// first polled.
    fn with_current_scope(self) -> WithScope<Self> {
        self.with_scope(scope::current())
    }
}

impl<S: Stream> StreamScopeExt for S {}

/// Extension trait allowing streams to run under a captured scope.
pub trait StreamScopeExt: Sized {
    /// Attaches the provided [`Scope`] to this stream, returning a
    /// `WithScope` wrapper.
    ///
    /// The attached scope will be set as current while this stream is being
    /// polled.
    fn with_scope(self, scope: Scope) -> WithScope<Self> {
        WithScope { inner: self, scope }
    }

    /// Attaches a snapshot of the current [`Scope`] to this stream, returning
    /// a `WithScope` wrapper.
    fn with_current_scope(self) -> WithScope<Self> {
        self.with_scope(scope::current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope;

    #[test]
    fn continuation_sees_scheduling_time_scope() {
        scope::configure(|s| s.set_tag("phase", "scheduling"));
        let future = async { scope::with_current(|s| s.tags().get("phase").cloned()) }
            .with_current_scope();

        // The ambient scope changes before the continuation actually runs.
        scope::configure(|s| s.set_tag("phase", "running"));

        let observed = futures_executor::block_on(future);
        assert_eq!(observed, Some("scheduling".to_owned()));
        scope::configure(|s| s.remove_tag("phase"));
    }

    #[test]
    fn sibling_continuations_are_isolated() {
        let make = |name: &'static str| {
            async move {
                scope::configure(|s| s.set_tag("sibling", name));
                scope::with_current(|s| s.tags().get("sibling").cloned())
            }
            .with_current_scope()
        };
        let (first, second) = (make("a"), make("b"));

        assert_eq!(futures_executor::block_on(first), Some("a".to_owned()));
        assert_eq!(futures_executor::block_on(second), Some("b".to_owned()));

        // The scheduling context observed neither mutation.
        assert_eq!(scope::with_current(|s| s.tags().get("sibling").cloned()), None);
    }

    #[test]
    fn mutations_persist_across_polls() {
        let future = async {
            scope::configure(|s| s.set_tag("step", "first"));
            yield_once().await;
            scope::with_current(|s| s.tags().get("step").cloned())
        }
        .with_current_scope();

        assert_eq!(futures_executor::block_on(future), Some("first".to_owned()));
    }

    async fn yield_once() {
        let mut yielded = false;
        std::future::poll_fn(move |cx| {
            if yielded {
                Poll::Ready(())
            } else {
                yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
        .await
    }
}
