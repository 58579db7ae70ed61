//! The task adapter: drives one foreign future on its owning shard.
//!
//! A task is a single heap object shared by the run loop and by every waker
//! handle the foreign side holds. It is reachable from any thread through its
//! raw address (the "task identity" handed to the poll function), but only
//! the owning shard ever touches its scheduling state. Other threads may only
//! adjust the reference count and ask the owner, through [`dispatch`], to do
//! the rest.
//!
//! # Reference counting
//!
//! The count starts at 1, the run loop's ownership, which is released when
//! the future completes. Waker clones add one; dropped wakers and consumed
//! wakes remove one. Run-queue entries do not own a reference: a queued task
//! has not completed, so the run loop's unit keeps it alive. When the count
//! reaches zero the task is destroyed, always on its owning shard.

use std::cell::Cell;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicUsize, Ordering};

use crate::dispatch;
use crate::error::fatal;
use crate::reactor::{Reactor, Runnable};
use crate::types::{RawPollFn, ShardId};

/// Where a task stands with respect to its owner's run queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchedulingState {
    /// Neither queued nor running.
    Idle,
    /// In the run queue, not running yet.
    Scheduled,
    /// Being polled right now.
    Executing,
    /// Being polled, and woken during the poll: runs once more afterwards.
    ExecutingPendingSchedule,
    /// The future completed. The task only lives on as a waker target.
    Done,
}

const MAX_REFS: usize = isize::MAX as usize;

struct Task<R: Reactor> {
    ref_count: AtomicUsize,
    reactor: R,
    owner: ShardId,
    /// Only accessed on `owner`.
    state: Cell<SchedulingState>,
    poll_fn: RawPollFn,
    future: *mut c_void,
}

/// A raw reference to a task. Copying it does not touch the reference
/// count: ownership is tracked by the caller, following the waker contract.
pub(crate) struct TaskRef<R: Reactor>(NonNull<Task<R>>);

impl<R: Reactor> Clone for TaskRef<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: Reactor> Copy for TaskRef<R> {}

// Off the owning shard a `TaskRef` is only used to touch the atomic count and
// the immutable `reactor`/`owner` fields; the state cell stays on the owner.
unsafe impl<R: Reactor> Send for TaskRef<R> {}

impl<R: Reactor> TaskRef<R> {
    /// Allocates a task owned by `owner` for the foreign `future`.
    ///
    /// The task takes ownership of `future`; `poll_fn` destroys it when it
    /// reports completion. The returned reference carries the run loop's
    /// unit: pass it to [`TaskRef::run`].
    pub(crate) fn new(reactor: R, owner: ShardId, poll_fn: RawPollFn, future: *mut c_void) -> Self {
        debug_assert_eq!(
            reactor.current_shard(),
            Some(owner),
            "task created off its owning shard"
        );
        let task = Box::new(Task {
            ref_count: AtomicUsize::new(1),
            reactor,
            owner,
            state: Cell::new(SchedulingState::Idle),
            poll_fn,
            future,
        });
        let task = Self(NonNull::from(Box::leak(task)));
        tracing::trace!(task = ?task.as_raw(), shard = %owner, "task created");
        task
    }

    /// # Safety
    ///
    /// `ptr` must be the identity of a live task of this reactor type.
    pub(crate) unsafe fn from_raw(ptr: *mut c_void) -> Self {
        debug_assert!(!ptr.is_null());
        Self(NonNull::new_unchecked(ptr.cast()))
    }

    pub(crate) fn as_raw(self) -> *mut c_void {
        self.0.as_ptr().cast()
    }

    unsafe fn reactor(&self) -> &R {
        &(*self.0.as_ptr()).reactor
    }

    unsafe fn owner(self) -> ShardId {
        (*self.0.as_ptr()).owner
    }

    unsafe fn state(&self) -> &Cell<SchedulingState> {
        &(*self.0.as_ptr()).state
    }

    unsafe fn is_on_owner(self) -> bool {
        self.reactor().current_shard() == Some(self.owner())
    }

    fn runnable(self) -> Runnable {
        unsafe { Runnable::from_raw(self.0.cast(), Self::run_scheduled) }
    }

    unsafe fn run_scheduled(ptr: NonNull<()>) {
        Self(ptr.cast()).run()
    }

    /// Polls the future once.
    ///
    /// # Safety
    ///
    /// Must be called on the owning shard, for a task that has not completed,
    /// and never while another `run` of the same task is on the stack.
    pub(crate) unsafe fn run(self) {
        debug_assert!(self.is_on_owner(), "task run off its owning shard");
        let state = self.state();
        debug_assert_ne!(state.get(), SchedulingState::Done, "task run after completion");

        state.set(SchedulingState::Executing);

        let task = self.0.as_ptr();
        let ready = ((*task).poll_fn)(self.as_raw(), (*task).future) != 0;

        if ready {
            state.set(SchedulingState::Done);
            tracing::trace!(task = ?self.as_raw(), "task completed");
            // May free the task; nothing below may touch it.
            self.release_local();
            return;
        }

        if state.get() == SchedulingState::ExecutingPendingSchedule {
            // Woken during the poll. The wake is consumed by this re-queue,
            // so further wakes before the next run coalesce into it.
            self.reactor().schedule(self.runnable());
            state.set(SchedulingState::Executing);
        } else {
            state.set(SchedulingState::Idle);
        }
    }

    /// Applies a wake-up to the scheduling state. Owner only.
    unsafe fn do_wake(self) {
        debug_assert!(self.is_on_owner(), "task woken off its owning shard");
        let state = self.state();
        match state.get() {
            SchedulingState::Idle => {
                self.reactor().schedule(self.runnable());
                state.set(SchedulingState::Scheduled);
            }
            SchedulingState::Executing => state.set(SchedulingState::ExecutingPendingSchedule),
            SchedulingState::Scheduled
            | SchedulingState::ExecutingPendingSchedule
            | SchedulingState::Done => {}
        }
    }

    /// Takes one more reference. Thread-safe.
    pub(crate) unsafe fn clone_ref(self) {
        let prev = (*self.0.as_ptr()).ref_count.fetch_add(1, Ordering::Relaxed);
        if prev > MAX_REFS {
            std::process::abort();
        }
    }

    /// Drops one reference; returns whether it was the last one.
    unsafe fn dec_ref(self) -> bool {
        let prev = (*self.0.as_ptr()).ref_count.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "task reference count underflow");
        if prev != 1 {
            return false;
        }
        // Pairs with the release decrements of every other holder, so their
        // accesses happen-before the destruction.
        atomic::fence(Ordering::Acquire);
        true
    }

    /// Drops one reference, destroying the task in place if it was the last.
    /// Owner only.
    unsafe fn release_local(self) {
        if self.dec_ref() {
            self.destroy();
        }
    }

    /// Drops one reference without waking. Thread-safe.
    pub(crate) unsafe fn dispose(self) {
        if self.dec_ref() {
            self.call_on_owner(move || unsafe { self.destroy() });
        }
    }

    /// Wakes the task and consumes one reference. Thread-safe.
    pub(crate) unsafe fn wake(self) {
        self.call_on_owner(move || unsafe {
            self.do_wake();
            self.release_local();
        });
    }

    /// Wakes the task without consuming a reference. Thread-safe.
    pub(crate) unsafe fn wake_by_ref(self) {
        if self.is_on_owner() {
            self.do_wake();
        } else {
            // Keeps the task alive while the wake travels to the owner; the
            // relayed wake releases it.
            self.clone_ref();
            self.wake();
        }
    }

    unsafe fn call_on_owner(self, f: impl FnOnce() + Send + 'static) {
        // `f` may destroy the task when run inline, so the reactor handle
        // must not be borrowed from it.
        let reactor = self.reactor().clone();
        let owner = self.owner();
        if let Err(err) = dispatch::call_on(&reactor, owner, f) {
            fatal("failed to relay a task operation to its owning shard", &err);
        }
    }

    unsafe fn destroy(self) {
        debug_assert!(self.is_on_owner(), "task destroyed off its owning shard");
        debug_assert_eq!(self.state().get(), SchedulingState::Done);
        tracing::trace!(task = ?self.as_raw(), "task destroyed");
        drop(Box::from_raw(self.0.as_ptr()));
    }

    #[cfg(test)]
    pub(crate) unsafe fn scheduling_state(self) -> SchedulingState {
        self.state().get()
    }

    #[cfg(test)]
    pub(crate) unsafe fn ref_count(self) -> usize {
        (*self.0.as_ptr()).ref_count.load(Ordering::SeqCst)
    }
}
