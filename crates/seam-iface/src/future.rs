//! Awaiting reactor-native futures from Rust.

use std::cell::Cell;
use std::ffi::c_void;
use std::future::Future;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};
use std::thread;

use seam_rt::{RawNotifier, RawShardFuture, ShardId};

use crate::error::JoinError;
use crate::{api_safety, ffi};

/// The notifier handed to the reactor future: wakes the last waker that
/// polled. The reactor owns one `Rc` reference through the header pointer.
#[repr(C)]
struct WaitState {
    header: RawNotifier,
    waker: Cell<Option<Waker>>,
}

impl WaitState {
    fn new(waker: Waker) -> Rc<Self> {
        Rc::new(Self {
            header: RawNotifier {
                notify: Self::notify,
                release: Self::release,
            },
            waker: Cell::new(Some(waker)),
        })
    }

    unsafe extern "C" fn notify(raw: *const RawNotifier) {
        let state = Rc::from_raw(raw.cast::<WaitState>());
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }

    unsafe extern "C" fn release(raw: *const RawNotifier) {
        drop(Rc::from_raw(raw.cast::<WaitState>()));
    }
}

/// A reactor future of type `T`, polled through its vtable.
pub struct ImportedFuture<T> {
    raw: RawShardFuture,
    wait_state: Option<Rc<WaitState>>,
    done: bool,
    _marker: PhantomData<T>,
}

impl<T> ImportedFuture<T> {
    /// # Safety
    ///
    /// `raw` must be an exported reactor future whose value type is `T`,
    /// owned by the caller and living on the current shard.
    pub unsafe fn from_raw(raw: RawShardFuture) -> Self {
        Self {
            raw,
            wait_state: None,
            done: false,
            _marker: PhantomData,
        }
    }
}

impl<T> Future for ImportedFuture<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        assert!(!self.done, "ImportedFuture polled after completion");

        let mut out = MaybeUninit::<T>::uninit();
        let ready = unsafe { (self.raw.vtable.poll)(self.raw.ptr, out.as_mut_ptr().cast()) };
        if ready == 1 {
            self.done = true;
            return Poll::Ready(unsafe { out.assume_init() });
        }

        match &self.wait_state {
            Some(state) => state.waker.set(Some(cx.waker().clone())),
            None => {
                let state = WaitState::new(cx.waker().clone());
                let notifier = Rc::into_raw(state.clone()).cast::<RawNotifier>();
                self.wait_state = Some(state);
                unsafe { (self.raw.vtable.attach_notifier)(self.raw.ptr, notifier) };
            }
        }
        Poll::Pending
    }
}

impl<T> Unpin for ImportedFuture<T> {}

impl<T> Drop for ImportedFuture<T> {
    fn drop(&mut self) {
        unsafe { (self.raw.vtable.destroy)(self.raw.ptr) };
    }
}

struct Call<F, T> {
    func: F,
    slot: Arc<Mutex<Option<thread::Result<T>>>>,
}

unsafe extern "C" fn run_call<F, T>(data: *mut c_void)
where
    F: FnOnce() -> T,
{
    let Call { func, slot } = *Box::from_raw(data.cast::<Call<F, T>>());
    let outcome = panic::catch_unwind(AssertUnwindSafe(func));
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
}

/// Runs `func` on `shard` and resolves, on the calling shard, to its result.
///
/// Unlike [`submit_to`](crate::submit_to) no task is created on `shard`:
/// `func` runs straight from its message queue.
///
/// # Panics
///
/// When called outside an engine worker.
pub async fn call_on<F, T>(shard: ShardId, func: F) -> Result<T, JoinError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    api_safety::assert_runtime_is_running();

    let slot = Arc::new(Mutex::new(None));
    let call = Box::into_raw(Box::new(Call {
        func,
        slot: slot.clone(),
    }));

    let mut raw = MaybeUninit::<RawShardFuture>::uninit();
    let status = unsafe {
        ffi::seam_rt_call_on(shard.0, run_call::<F, T>, call.cast(), raw.as_mut_ptr())
    };
    if status != 0 {
        drop(unsafe { Box::from_raw(call) });
        return Err(JoinError::Cancelled);
    }

    unsafe { ImportedFuture::<()>::from_raw(raw.assume_init()) }.await;

    let outcome = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    match outcome {
        Some(Ok(value)) => Ok(value),
        Some(Err(payload)) => Err(JoinError::Panic(payload)),
        None => Err(JoinError::Cancelled),
    }
}
