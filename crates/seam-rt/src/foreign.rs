use std::fmt;
use std::mem::ManuallyDrop;

use crate::dispatch;
use crate::engine::{self, Handle};
use crate::error::{Error, Result};
use crate::reactor::Reactor;
use crate::types::ShardId;

/// A shard-local value that may travel between shards but is only ever
/// touched, and dropped, on the shard it was created on.
///
/// Dropping a `Foreign` elsewhere sends the value home to be dropped there.
pub struct Foreign<T: 'static> {
    value: ManuallyDrop<T>,
    origin: ShardId,
    handle: Handle,
}

// The value is only accessed on `origin`; see `into_inner` and `Drop`.
unsafe impl<T: 'static> Send for Foreign<T> {}

impl<T: 'static> Foreign<T> {
    /// Wraps `value`, which belongs to the calling worker's shard.
    pub fn new(value: T) -> Result<Self> {
        let handle = engine::current().ok_or(Error::NotOnWorker)?;
        let origin = handle.current_shard().ok_or(Error::NotOnWorker)?;
        Ok(Self::with_origin(handle, origin, value))
    }

    pub(crate) fn with_origin(handle: Handle, origin: ShardId, value: T) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            origin,
            handle,
        }
    }

    pub fn origin(&self) -> ShardId {
        self.origin
    }

    pub fn is_home(&self) -> bool {
        self.handle.current_shard() == Some(self.origin)
    }

    /// Unwraps the value.
    ///
    /// # Panics
    ///
    /// When called anywhere but the origin shard.
    pub fn into_inner(self) -> T {
        assert!(
            self.is_home(),
            "Foreign value unwrapped off its origin shard {}",
            self.origin
        );
        let mut this = ManuallyDrop::new(self);
        // `this` is never dropped, so its handle is moved out here as well.
        unsafe {
            drop(std::ptr::read(&this.handle));
            ManuallyDrop::take(&mut this.value)
        }
    }
}

impl<T: 'static> Drop for Foreign<T> {
    fn drop(&mut self) {
        if self.is_home() {
            unsafe { ManuallyDrop::drop(&mut self.value) };
            return;
        }

        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        let stray = Foreign::with_origin(self.handle.clone(), self.origin, value);
        tracing::trace!(shard = %self.origin, "relaying drop to origin shard");
        if let Err(err) = dispatch::call_on(&self.handle, self.origin, move || drop(stray)) {
            // The rejected message, and the value with it, was leaked.
            tracing::warn!(shard = %self.origin, error = %err, "failed to relay a drop");
        }
    }
}

impl<T: 'static> fmt::Debug for Foreign<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Foreign")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
