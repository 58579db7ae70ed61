//! What the task adapter needs from a reactor.
//!
//! The engine in [`crate::engine`] is the production implementation; the
//! tests run the same task code against a single-threaded simulation.

use std::fmt;
use std::ptr::NonNull;

use crate::error::Result;
use crate::types::ShardId;

/// A callable submitted to another shard.
pub type Message = Box<dyn FnOnce() + Send + 'static>;

/// A type-erased schedulable unit: a pointer and the function that runs it.
///
/// Running a `Runnable` consumes its run-queue slot. Whatever it points to
/// manages its own lifetime.
pub struct Runnable {
    ptr: NonNull<()>,
    run: unsafe fn(NonNull<()>),
}

impl Runnable {
    /// # Safety
    ///
    /// `run(ptr)` must be sound to call once, on the shard the runnable is
    /// scheduled on.
    pub(crate) unsafe fn from_raw(ptr: NonNull<()>, run: unsafe fn(NonNull<()>)) -> Self {
        Self { ptr, run }
    }

    /// # Safety
    ///
    /// Must be called on the shard that scheduled this runnable.
    pub(crate) unsafe fn run(self) {
        (self.run)(self.ptr)
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runnable").field("ptr", &self.ptr).finish()
    }
}

/// Scheduling and messaging primitives of a sharded reactor.
///
/// Implementations are cheap handles; every method may be called from any
/// thread unless stated otherwise.
pub trait Reactor: Clone + Send + Sync + 'static {
    /// The shard the calling thread runs, if it is a worker of *this*
    /// reactor. Workers of other reactors and unrelated threads get `None`.
    fn current_shard(&self) -> Option<ShardId>;

    /// Pushes `runnable` onto the current shard's run queue.
    ///
    /// Must only be called from a worker of this reactor.
    fn schedule(&self, runnable: Runnable);

    /// Submits `message` to `shard` from another worker of this reactor.
    /// Messages from one sender to one shard are delivered in order.
    fn submit_to(&self, shard: ShardId, message: Message) -> Result<()>;

    /// Submits `message` to `shard` from a thread outside the worker pool.
    fn submit_alien(&self, shard: ShardId, message: Message) -> Result<()>;
}
