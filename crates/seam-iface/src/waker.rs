//! `Waker`s backed by seam-rt tasks.
//!
//! The waker data pointer is the task identity handed to the poll function;
//! each vtable entry forwards to the matching `seam_rt_waker_*` export.

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::task::{RawWaker, RawWakerVTable, Waker};

use futures::task::WakerRef;

use crate::ffi;

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);

unsafe fn clone(task: *const ()) -> RawWaker {
    ffi::seam_rt_waker_clone(task as *mut c_void);
    RawWaker::new(task, &VTABLE)
}

unsafe fn wake(task: *const ()) {
    ffi::seam_rt_waker_wake(task as *mut c_void);
}

unsafe fn wake_by_ref(task: *const ()) {
    ffi::seam_rt_waker_wake_by_ref(task as *mut c_void);
}

unsafe fn drop(task: *const ()) {
    ffi::seam_rt_waker_dispose(task as *mut c_void);
}

/// A waker for `task` that borrows the poll's reference instead of taking
/// its own. Clones of it do take one.
///
/// # Safety
///
/// `task` must be the identity passed to the running poll function, and the
/// returned waker must not outlive that poll.
pub(crate) unsafe fn borrowed<'a>(task: *mut c_void) -> WakerRef<'a> {
    let waker = Waker::from_raw(RawWaker::new(task as *const (), &VTABLE));
    WakerRef::new_unowned(ManuallyDrop::new(waker))
}
