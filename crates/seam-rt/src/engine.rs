//! The sharded engine: one worker thread per shard, each with its own run
//! queue, and message queues for work submitted by other threads.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ffi::c_void;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use concurrent_queue::ConcurrentQueue;
use polling::{Events, Poller};

use crate::config::EngineConfig;
use crate::dispatch;
use crate::error::{Error, Result};
use crate::foreign::Foreign;
use crate::promise::{self, ShardFuture};
use crate::reactor::{Message, Reactor, Runnable};
use crate::task::TaskRef;
use crate::types::{RawPollFn, RawSpawnFn, ShardId};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

/// Per-shard state reachable from every thread.
struct ShardQueues {
    /// Messages from other workers of this engine.
    smp: ConcurrentQueue<Message>,
    /// Messages from threads outside the worker pool.
    alien: ConcurrentQueue<Message>,
    poller: Poller,
}

struct Shared {
    id: EngineId,
    config: EngineConfig,
    shards: Vec<ShardQueues>,
    stopping: AtomicBool,
}

/// A cheap, cloneable handle to a running engine.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

/// Worker-thread state; lives in a thread local for the worker's lifetime.
struct WorkerContext {
    handle: Handle,
    shard: ShardId,
    run_queue: RefCell<VecDeque<Runnable>>,
    task_started: Cell<Instant>,
}

thread_local! {
    static WORKER: RefCell<Option<Rc<WorkerContext>>> = const { RefCell::new(None) };
}

fn worker() -> Option<Rc<WorkerContext>> {
    WORKER.with(|w| w.borrow().clone())
}

/// The handle of the engine the calling thread works for.
pub fn current() -> Option<Handle> {
    worker().map(|ctx| ctx.handle.clone())
}

/// The shard the calling thread runs, if it is a worker of any engine.
pub fn this_shard() -> Option<ShardId> {
    worker().map(|ctx| ctx.shard)
}

/// Whether the running task has used up its time quota and should yield.
/// Always `false` off the worker pool.
pub fn need_preempt() -> bool {
    worker().is_some_and(|ctx| {
        ctx.task_started.get().elapsed() >= ctx.handle.shared.config.task_quota
    })
}

impl Handle {
    pub fn id(&self) -> EngineId {
        self.shared.id
    }

    pub fn shard_count(&self) -> usize {
        self.shared.shards.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }

    fn queues(&self, shard: ShardId) -> Result<&ShardQueues> {
        self.shared.shards.get(shard.index()).ok_or(Error::NoSuchShard {
            shard,
            count: self.shard_count(),
        })
    }

    fn local(&self) -> Option<Rc<WorkerContext>> {
        worker().filter(|ctx| ctx.handle.shared.id == self.shared.id)
    }

    fn push(&self, shard: ShardId, message: Message, alien: bool) -> Result<()> {
        let queues = self.queues(shard)?;
        let queue = if alien { &queues.alien } else { &queues.smp };
        // The queues are never closed, so this only fails if that changes.
        // A rejected message is leaked: it may own values that must not be
        // dropped on this thread.
        if let Err(rejected) = queue.push(message) {
            std::mem::forget(rejected.into_inner());
            return Err(Error::Stopped);
        }
        if let Err(err) = queues.poller.notify() {
            tracing::warn!(shard = %shard, error = %err, "failed to notify shard");
        }
        Ok(())
    }

    /// Runs `f` on `shard`, inline if the caller already is on it.
    pub fn run_on<F>(&self, shard: ShardId, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queues(shard)?;
        dispatch::call_on(self, shard, f)
    }

    /// Runs `f` on `shard` and delivers its result back to the calling
    /// shard.
    ///
    /// Must be called on a worker of this engine.
    pub fn submit_with_reply<F, T>(&self, shard: ShardId, f: F) -> Result<ShardFuture<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let origin = self.local().ok_or(Error::NotOnWorker)?.shard;
        self.queues(shard)?;

        let (promise, future) = promise::channel();
        let promise = Foreign::with_origin(self.clone(), origin, promise);
        let handle = self.clone();
        self.run_on(shard, move || {
            let value = f();
            let reply = handle.run_on(origin, move || promise.into_inner().set_value(value));
            if let Err(err) = reply {
                tracing::warn!(shard = %origin, error = %err, "failed to deliver a reply");
            }
        })?;
        Ok(future)
    }

    /// Builds a foreign future on `shard` with `spawn_fn(data)` and runs it
    /// there as a task.
    ///
    /// # Safety
    ///
    /// `spawn_fn` and `poll_fn` must follow their contracts, and `data` must
    /// be safe to hand to `spawn_fn` on another thread. Ownership of `data`
    /// passes to the engine even if an error is returned.
    pub unsafe fn spawn_raw_on(
        &self,
        shard: ShardId,
        poll_fn: RawPollFn,
        spawn_fn: RawSpawnFn,
        data: *mut c_void,
    ) -> Result<()> {
        struct SendPtr(*mut c_void);
        // The contract above makes `data` transferable.
        unsafe impl Send for SendPtr {}

        let data = SendPtr(data);
        let handle = self.clone();
        self.run_on(shard, move || {
            let data = data;
            let future = unsafe { spawn_fn(data.0) };
            unsafe { handle.spawn_local(poll_fn, future) };
        })
    }

    /// Creates a task for `future` on the calling worker and runs it once.
    ///
    /// # Safety
    ///
    /// Must be called on a worker of this engine; `poll_fn` must follow its
    /// contract for `future`.
    pub(crate) unsafe fn spawn_local(&self, poll_fn: RawPollFn, future: *mut c_void) {
        let Some(ctx) = self.local() else {
            crate::error::fatal("task spawned off the worker pool", &Error::NotOnWorker);
        };
        let task = TaskRef::new(self.clone(), ctx.shard, poll_fn, future);
        tracing::trace!(task = ?task.as_raw(), shard = %ctx.shard, "spawned task");
        task.run();
    }

    /// Asks every worker to exit after its current tick.
    pub fn stop(&self) {
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(engine = self.shared.id.0, "stopping engine");
        for (shard, queues) in self.shared.shards.iter().enumerate() {
            if let Err(err) = queues.poller.notify() {
                tracing::warn!(shard, error = %err, "failed to notify shard");
            }
        }
    }
}

impl Reactor for Handle {
    fn current_shard(&self) -> Option<ShardId> {
        self.local().map(|ctx| ctx.shard)
    }

    fn schedule(&self, runnable: Runnable) {
        match self.local() {
            Some(ctx) => ctx.run_queue.borrow_mut().push_back(runnable),
            None => crate::error::fatal("schedule called off the worker pool", &Error::NotOnWorker),
        }
    }

    fn submit_to(&self, shard: ShardId, message: Message) -> Result<()> {
        self.push(shard, message, false)
    }

    fn submit_alien(&self, shard: ShardId, message: Message) -> Result<()> {
        self.push(shard, message, true)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.shared.id)
            .field("shards", &self.shard_count())
            .finish()
    }
}

/// A running engine. Dropping it stops the workers and joins them.
pub struct Engine {
    handle: Handle,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn start(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let shards = (0..config.shards)
            .map(|shard| -> Result<ShardQueues> {
                let poller = Poller::new().map_err(|source| Error::Poller {
                    shard: ShardId(shard as u32),
                    source,
                })?;
                Ok(ShardQueues {
                    smp: ConcurrentQueue::unbounded(),
                    alien: ConcurrentQueue::unbounded(),
                    poller,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let id = EngineId(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed));
        let handle = Handle {
            shared: Arc::new(Shared {
                id,
                config,
                shards,
                stopping: AtomicBool::new(false),
            }),
        };
        let mut engine = Engine {
            handle: handle.clone(),
            workers: Vec::with_capacity(handle.shard_count()),
        };

        for index in 0..handle.shard_count() {
            let shard = ShardId(index as u32);
            let worker_handle = handle.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", handle.config().thread_name, index))
                .spawn(move || run_worker(worker_handle, shard));
            match spawned {
                Ok(join) => engine.workers.push(join),
                // Dropping `engine` stops and joins the workers started so far.
                Err(source) => return Err(Error::SpawnWorker { shard, source }),
            }
        }

        tracing::debug!(engine = id.0, shards = engine.workers.len(), "engine started");
        Ok(engine)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Stops the workers and waits for them to exit. Tasks still queued are
    /// leaked.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.handle.stop();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!(engine = self.handle.id().0, "worker thread panicked");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.join();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("handle", &self.handle).finish()
    }
}

fn run_worker(handle: Handle, shard: ShardId) {
    let span = tracing::debug_span!("shard", shard = shard.0);
    let _enter = span.enter();

    let ctx = Rc::new(WorkerContext {
        handle: handle.clone(),
        shard,
        run_queue: RefCell::new(VecDeque::new()),
        task_started: Cell::new(Instant::now()),
    });
    WORKER.with(|w| *w.borrow_mut() = Some(ctx.clone()));
    tracing::debug!("worker started");

    let queues = &handle.shared.shards[shard.index()];
    let idle_timeout = handle.config().idle_timeout;
    let mut events = Events::new();

    loop {
        let mut did_work = drain(&ctx, &queues.alien) | drain(&ctx, &queues.smp);

        // Only what was queued when the tick started; tasks rescheduled
        // during the tick run on the next one.
        let batch = ctx.run_queue.borrow().len();
        for _ in 0..batch {
            let Some(runnable) = ctx.run_queue.borrow_mut().pop_front() else {
                break;
            };
            ctx.task_started.set(Instant::now());
            unsafe { runnable.run() };
            did_work = true;
        }

        if handle.is_stopping() {
            break;
        }
        if did_work || !ctx.run_queue.borrow().is_empty() {
            continue;
        }

        events.clear();
        if let Err(err) = queues.poller.wait(&mut events, idle_timeout) {
            if err.kind() != std::io::ErrorKind::Interrupted {
                tracing::warn!(error = %err, "poller wait failed");
            }
        }
    }

    let leaked = ctx.run_queue.borrow().len();
    if leaked > 0 {
        tracing::debug!(leaked, "worker exiting with queued tasks");
    }
    ctx.run_queue.borrow_mut().clear();
    WORKER.with(|w| w.borrow_mut().take());
    tracing::debug!("worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

fn drain(ctx: &WorkerContext, queue: &ConcurrentQueue<Message>) -> bool {
    let mut count = 0usize;
    while let Ok(message) = queue.pop() {
        ctx.task_started.set(Instant::now());
        // A panicking message must not take the shard, and every task it
        // owns, down with it.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(message)) {
            tracing::error!(panic = panic_message(&*payload), "message panicked");
        }
        count += 1;
    }
    if count > 0 {
        tracing::trace!(count, "drained messages");
    }
    count > 0
}
