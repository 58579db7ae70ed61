//! Cooperative yielding.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::ffi;

/// Whether the running task has used up its time quota and should yield to
/// the engine as soon as possible. Always `false` outside an engine.
pub fn need_preempt() -> bool {
    unsafe { ffi::seam_rt_need_preempt() != 0 }
}

/// Yields to the engine once.
#[inline]
pub fn yield_now() -> YieldNow {
    YieldNow { need_yield: true }
}

/// Yields only if the task quota is used up.
#[inline]
pub fn maybe_yield() -> YieldNow {
    YieldNow {
        need_yield: need_preempt(),
    }
}

#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct YieldNow {
    need_yield: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.need_yield {
            self.need_yield = false;
            cx.waker().wake_by_ref();
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

/// Runs `step` over `state` until it returns `None`.
///
/// Steps run inline while the task quota lasts; whatever is left then
/// continues in a background task that yields between steps.
pub fn gentle_cleanup<T, F>(mut state: Option<T>, mut step: F)
where
    F: FnMut(T) -> Option<T> + 'static,
    T: 'static,
{
    while !need_preempt() {
        state = match state {
            Some(s) => step(s),
            None => return,
        };
    }
    if state.is_none() {
        return;
    }

    tracing::trace!("cleanup moved to a background task");
    drop(crate::spawn(async move {
        while let Some(s) = state {
            state = step(s);
            maybe_yield().await;
        }
    }));
}
