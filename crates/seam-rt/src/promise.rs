//! Reactor-native futures: a shard-local promise/future pair, and the
//! export adapter that lets the foreign side poll one through a vtable.
//!
//! Neither half is `Send`. Values cross shards wrapped in
//! [`Foreign`](crate::Foreign).

use std::cell::RefCell;
use std::ffi::{c_int, c_void};
use std::fmt;
use std::mem;
use std::rc::Rc;

use crate::types::{FutureVTable, RawNotifier, RawShardFuture};

type Continuation = Box<dyn FnOnce()>;

struct State<T> {
    value: RefCell<Option<T>>,
    continuation: RefCell<Option<Continuation>>,
}

impl<T> State<T> {
    fn new(value: Option<T>) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            continuation: RefCell::new(None),
        })
    }

    fn take_continuation(&self) -> Option<Continuation> {
        self.continuation.borrow_mut().take()
    }
}

/// Creates a connected promise/future pair on the current shard.
pub fn channel<T>() -> (Promise<T>, ShardFuture<T>) {
    let state = State::new(None);
    (
        Promise {
            state: state.clone(),
        },
        ShardFuture { state },
    )
}

/// The producing half of [`channel`].
pub struct Promise<T> {
    state: Rc<State<T>>,
}

impl<T> Promise<T> {
    /// Stores `value` and runs the continuation, if one is attached.
    pub fn set_value(self, value: T) {
        *self.state.value.borrow_mut() = Some(value);
        if let Some(continuation) = self.state.take_continuation() {
            continuation();
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        // Unfulfilled: whoever waits will never be woken, so drop what they
        // left behind. Done outside the borrow since the drop may re-enter.
        let continuation = self.state.take_continuation();
        drop(continuation);
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

/// A value that becomes available on the current shard at some point.
pub struct ShardFuture<T> {
    state: Rc<State<T>>,
}

impl<T> ShardFuture<T> {
    /// A future that is already resolved.
    pub fn ready(value: T) -> Self {
        Self {
            state: State::new(Some(value)),
        }
    }

    pub fn available(&self) -> bool {
        self.state.value.borrow().is_some()
    }

    /// Moves the value out, if it has arrived.
    pub fn take(&self) -> Option<T> {
        self.state.value.borrow_mut().take()
    }

    /// Runs `f` once the value is available, immediately if it already is.
    ///
    /// At most one continuation may be attached.
    pub fn on_ready(&self, f: impl FnOnce() + 'static) {
        if self.available() {
            f();
            return;
        }
        let previous = self.state.continuation.borrow_mut().replace(Box::new(f));
        debug_assert!(previous.is_none(), "continuation attached twice");
        drop(previous);
    }

    /// Hands the future to the foreign side.
    pub fn into_raw(self) -> RawShardFuture
    where
        T: 'static,
    {
        let export = Box::new(Exported {
            future: self,
            notifier_attached: false,
        });
        RawShardFuture {
            ptr: Box::into_raw(export).cast(),
            vtable: Exported::<T>::VTABLE,
        }
    }
}

impl<T> Drop for ShardFuture<T> {
    fn drop(&mut self) {
        let continuation = self.state.take_continuation();
        drop(continuation);
    }
}

impl<T> fmt::Debug for ShardFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardFuture")
            .field("available", &self.available())
            .finish()
    }
}

// ── Export ──────────────────────────────────────────────────────────

/// An owned notifier handed over by the foreign side. Released on drop
/// unless it was signalled.
struct Notifier(*const RawNotifier);

impl Notifier {
    fn notify(self) {
        let raw = self.0;
        mem::forget(self);
        unsafe { ((*raw).notify)(raw) }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        unsafe { ((*self.0).release)(self.0) }
    }
}

struct Exported<T> {
    future: ShardFuture<T>,
    notifier_attached: bool,
}

impl<T: 'static> Exported<T> {
    const VTABLE: &'static FutureVTable = &FutureVTable {
        poll: Self::poll,
        attach_notifier: Self::attach_notifier,
        destroy: Self::destroy,
    };

    unsafe extern "C" fn poll(future: *mut c_void, out: *mut c_void) -> c_int {
        let this = &*future.cast::<Self>();
        match this.future.take() {
            Some(value) => {
                out.cast::<T>().write(value);
                1
            }
            None => 0,
        }
    }

    unsafe extern "C" fn attach_notifier(future: *mut c_void, notifier: *const RawNotifier) {
        let this = &mut *future.cast::<Self>();
        debug_assert!(!this.notifier_attached, "notifier attached twice");
        this.notifier_attached = true;
        let notifier = Notifier(notifier);
        this.future.on_ready(move || notifier.notify());
    }

    unsafe extern "C" fn destroy(future: *mut c_void) {
        drop(Box::from_raw(future.cast::<Self>()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::mem::MaybeUninit;

    #[test]
    fn value_flows_from_promise_to_future() {
        let (promise, future) = channel();
        assert!(!future.available());
        assert_eq!(future.take(), None);

        promise.set_value(7);
        assert!(future.available());
        assert_eq!(future.take(), Some(7));
        assert!(!future.available());
    }

    #[test]
    fn continuation_runs_on_set_value() {
        let hits = Rc::new(Cell::new(0));
        let (promise, future) = channel::<()>();

        let h = hits.clone();
        future.on_ready(move || h.set(h.get() + 1));
        assert_eq!(hits.get(), 0);

        promise.set_value(());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn continuation_runs_immediately_when_ready() {
        let hits = Rc::new(Cell::new(0));
        let future = ShardFuture::ready("done");

        let h = hits.clone();
        future.on_ready(move || h.set(h.get() + 1));
        assert_eq!(hits.get(), 1);
        assert_eq!(future.take(), Some("done"));
    }

    #[test]
    fn dropped_promise_drops_the_continuation_unrun() {
        let marker = Rc::new(());
        let (promise, future) = channel::<u8>();

        let held = marker.clone();
        future.on_ready(move || drop(held));
        assert_eq!(Rc::strong_count(&marker), 2);

        drop(promise);
        assert_eq!(Rc::strong_count(&marker), 1);
        assert!(!future.available());
    }

    // ── Export vtable ───────────────────────────────────────────────

    #[repr(C)]
    struct TestNotifier {
        header: RawNotifier,
        notified: Cell<u32>,
        released: Cell<u32>,
    }

    impl TestNotifier {
        fn new() -> Box<Self> {
            Box::new(Self {
                header: RawNotifier {
                    notify: Self::notify,
                    release: Self::release,
                },
                notified: Cell::new(0),
                released: Cell::new(0),
            })
        }

        fn raw(&self) -> *const RawNotifier {
            &self.header
        }

        unsafe extern "C" fn notify(raw: *const RawNotifier) {
            let this = &*raw.cast::<Self>();
            this.notified.set(this.notified.get() + 1);
        }

        unsafe extern "C" fn release(raw: *const RawNotifier) {
            let this = &*raw.cast::<Self>();
            this.released.set(this.released.get() + 1);
        }
    }

    fn poll<T>(raw: &RawShardFuture) -> Option<T> {
        let mut out = MaybeUninit::<T>::uninit();
        let ready = unsafe { (raw.vtable.poll)(raw.ptr, out.as_mut_ptr().cast()) };
        (ready == 1).then(|| unsafe { out.assume_init() })
    }

    #[test]
    fn vtable_is_shared_per_type() {
        let a = ShardFuture::ready(1u32).into_raw();
        let b = ShardFuture::ready(2u32).into_raw();
        let c = ShardFuture::ready(String::new()).into_raw();

        assert!(std::ptr::eq(a.vtable, b.vtable));
        assert!(!std::ptr::eq(a.vtable, c.vtable));

        for raw in [a, b, c] {
            unsafe { (raw.vtable.destroy)(raw.ptr) };
        }
    }

    #[test]
    fn exported_poll_is_idempotent_until_ready() {
        let (promise, future) = channel::<String>();
        let raw = future.into_raw();

        assert_eq!(poll::<String>(&raw), None);
        assert_eq!(poll::<String>(&raw), None);

        promise.set_value("hello".to_owned());
        assert_eq!(poll::<String>(&raw).as_deref(), Some("hello"));

        unsafe { (raw.vtable.destroy)(raw.ptr) };
    }

    #[test]
    fn notifier_is_signalled_once_on_ready() {
        let notifier = TestNotifier::new();
        let (promise, future) = channel::<u64>();
        let raw = future.into_raw();

        unsafe { (raw.vtable.attach_notifier)(raw.ptr, notifier.raw()) };
        assert_eq!(notifier.notified.get(), 0);

        promise.set_value(42);
        assert_eq!(notifier.notified.get(), 1);
        assert_eq!(notifier.released.get(), 0);
        assert_eq!(poll::<u64>(&raw), Some(42));

        unsafe { (raw.vtable.destroy)(raw.ptr) };
        assert_eq!(notifier.notified.get(), 1);
        assert_eq!(notifier.released.get(), 0);
    }

    #[test]
    fn notifier_attached_to_a_ready_future_fires_immediately() {
        let notifier = TestNotifier::new();
        let raw = ShardFuture::ready(()).into_raw();

        unsafe { (raw.vtable.attach_notifier)(raw.ptr, notifier.raw()) };
        assert_eq!(notifier.notified.get(), 1);

        unsafe { (raw.vtable.destroy)(raw.ptr) };
    }

    #[test]
    fn unsignalled_notifier_is_released_on_destroy() {
        let notifier = TestNotifier::new();
        let (promise, future) = channel::<u8>();
        let raw = future.into_raw();

        unsafe { (raw.vtable.attach_notifier)(raw.ptr, notifier.raw()) };
        unsafe { (raw.vtable.destroy)(raw.ptr) };
        assert_eq!(notifier.notified.get(), 0);
        assert_eq!(notifier.released.get(), 1);

        // Fulfilling after the consumer went away is a no-op.
        promise.set_value(1);
        assert_eq!(notifier.notified.get(), 0);
    }

    #[test]
    fn notifier_is_released_when_the_promise_is_broken() {
        let notifier = TestNotifier::new();
        let (promise, future) = channel::<u8>();
        let raw = future.into_raw();

        unsafe { (raw.vtable.attach_notifier)(raw.ptr, notifier.raw()) };
        drop(promise);
        assert_eq!(notifier.released.get(), 1);

        unsafe { (raw.vtable.destroy)(raw.ptr) };
        assert_eq!(notifier.released.get(), 1);
        assert_eq!(notifier.notified.get(), 0);
    }
}
