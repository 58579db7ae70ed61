//! Running Rust futures as seam-rt tasks.

use std::ffi::{c_int, c_void};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;

use futures::channel::oneshot;
use futures::FutureExt;
use pin_project::pin_project;
use seam_rt::ShardId;

use crate::error::JoinError;
use crate::{api_safety, ffi, waker};

type Outcome<T> = thread::Result<T>;

/// Owned permission to await a spawned task's output.
///
/// Dropping the handle detaches the task; it keeps running.
#[must_use = "dropping a JoinHandle detaches the task"]
#[derive(Debug)]
pub struct JoinHandle<T> {
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(|outcome| match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(JoinError::Panic(payload)),
            Err(oneshot::Canceled) => Err(JoinError::Cancelled),
        })
    }
}

/// The future a task actually polls: runs the user future, catching panics,
/// and sends the outcome to the [`JoinHandle`].
#[pin_project]
struct Completion<Fut: Future> {
    #[pin]
    future: Option<Fut>,
    tx: Option<oneshot::Sender<Outcome<Fut::Output>>>,
}

impl<Fut: Future> Completion<Fut> {
    fn new(future: Fut, tx: oneshot::Sender<Outcome<Fut::Output>>) -> Self {
        Self {
            future: Some(future),
            tx: Some(tx),
        }
    }

    /// A task that only reports `payload`; used when building the future
    /// itself panicked.
    fn panicked(
        payload: Box<dyn std::any::Any + Send>,
        tx: oneshot::Sender<Outcome<Fut::Output>>,
    ) -> Self {
        let _ = tx.send(Err(payload));
        Self {
            future: None,
            tx: None,
        }
    }
}

impl<Fut: Future> Future for Completion<Fut> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();
        let Some(future) = this.future.as_pin_mut() else {
            return Poll::Ready(());
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Ok(Poll::Pending) => return Poll::Pending,
            Ok(Poll::Ready(value)) => Ok(value),
            Err(payload) => Err(payload),
        };
        if let Some(tx) = this.tx.take() {
            // The handle may have been dropped; the output is discarded then.
            let _ = tx.send(outcome);
        }
        Poll::Ready(())
    }
}

/// `RawPollFn` for a boxed `F`.
unsafe extern "C" fn poll_task<F>(task: *mut c_void, future: *mut c_void) -> c_int
where
    F: Future<Output = ()>,
{
    let waker = waker::borrowed(task);
    let mut cx = Context::from_waker(&waker);
    match Pin::new_unchecked(&mut *future.cast::<F>()).poll(&mut cx) {
        Poll::Pending => 0,
        Poll::Ready(()) => {
            drop(Box::from_raw(future.cast::<F>()));
            1
        }
    }
}

struct Submission<Func, Fut: Future> {
    func: Func,
    tx: oneshot::Sender<Outcome<Fut::Output>>,
}

/// `RawSpawnFn`: builds the task future on the target shard.
unsafe extern "C" fn spawn_task<Func, Fut>(data: *mut c_void) -> *mut c_void
where
    Func: FnOnce() -> Fut,
    Fut: Future,
{
    let Submission { func, tx } = *Box::from_raw(data.cast::<Submission<Func, Fut>>());
    let completion = match panic::catch_unwind(AssertUnwindSafe(func)) {
        Ok(future) => Completion::new(future, tx),
        Err(payload) => Completion::panicked(payload, tx),
    };
    Box::into_raw(Box::new(completion)).cast()
}

/// Spawns `future` on the current shard and polls it once right away.
///
/// The future never leaves this shard, so it need not be `Send`.
///
/// # Panics
///
/// When called outside an engine worker.
pub fn spawn<Fut>(future: Fut) -> JoinHandle<Fut::Output>
where
    Fut: Future + 'static,
    Fut::Output: 'static,
{
    api_safety::assert_runtime_is_running();
    let (tx, rx) = oneshot::channel();
    let completion = Box::new(Completion::new(future, tx));
    unsafe {
        ffi::seam_rt_spawn(
            poll_task::<Completion<Fut>>,
            Box::into_raw(completion).cast(),
        );
    }
    JoinHandle { rx }
}

/// Builds a future with `func` on `shard` and runs it there.
///
/// Only `func` and the output cross shards; the future itself is created on
/// `shard` and stays there.
///
/// # Panics
///
/// When called outside an engine worker, or if `shard` does not exist.
pub fn submit_to<Func, Fut>(shard: ShardId, func: Func) -> JoinHandle<Fut::Output>
where
    Func: FnOnce() -> Fut + Send + 'static,
    Fut: Future + 'static,
    Fut::Output: Send + 'static,
{
    api_safety::assert_runtime_is_running();
    let shards = crate::sharded::shard_count();
    assert!(
        shard.index() < shards,
        "shard {shard} does not exist (engine has {shards} shards)"
    );

    let (tx, rx) = oneshot::channel();
    let submission = Box::new(Submission::<Func, Fut> { func, tx });
    unsafe {
        ffi::seam_rt_submit_to(
            poll_task::<Completion<Fut>>,
            spawn_task::<Func, Fut>,
            Box::into_raw(submission).cast(),
            shard.0,
        );
    }
    JoinHandle { rx }
}
