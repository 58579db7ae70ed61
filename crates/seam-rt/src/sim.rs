//! A deterministic reactor for tests: several virtual shards driven by hand
//! from the test thread.
//!
//! Threads "enter" a shard with [`Sim::on`]; any thread that has not entered
//! one is foreign. Nothing runs until the test calls [`Sim::tick`] or
//! [`Sim::run_until_idle`].

use std::collections::{HashMap, VecDeque};
use std::ffi::{c_int, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use crate::dispatch::Route;
use crate::error::{Error, Result};
use crate::reactor::{Message, Reactor, Runnable};
use crate::types::ShardId;

#[derive(Clone)]
pub(crate) struct Sim {
    inner: Arc<Inner>,
}

struct Inner {
    current: Mutex<HashMap<ThreadId, ShardId>>,
    shards: Vec<SimShard>,
}

#[derive(Default)]
struct SimShard {
    run_queue: Mutex<VecDeque<Queued>>,
    inbox: Mutex<VecDeque<(Route, Message)>>,
    schedules: AtomicUsize,
}

struct Queued(Runnable);

// Runnables are only ever run by `tick`, which enters the shard they were
// scheduled on first.
unsafe impl Send for Queued {}

impl Sim {
    pub(crate) fn new(shards: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: Mutex::new(HashMap::new()),
                shards: (0..shards).map(|_| SimShard::default()).collect(),
            }),
        }
    }

    fn shard(&self, shard: ShardId) -> &SimShard {
        &self.inner.shards[shard.index()]
    }

    /// Makes the calling thread act as `shard` (or as a foreign thread for
    /// `None`). Returns what it was before.
    pub(crate) fn enter(&self, shard: Option<ShardId>) -> Option<ShardId> {
        let mut current = self.inner.current.lock().unwrap();
        let id = thread::current().id();
        match shard {
            Some(shard) => current.insert(id, shard),
            None => current.remove(&id),
        }
    }

    pub(crate) fn on<T>(&self, shard: Option<ShardId>, f: impl FnOnce() -> T) -> T {
        let prev = self.enter(shard);
        let out = f();
        self.enter(prev);
        out
    }

    /// Number of runnables waiting in `shard`'s run queue.
    pub(crate) fn queued(&self, shard: ShardId) -> usize {
        self.shard(shard).run_queue.lock().unwrap().len()
    }

    /// Total number of `schedule` calls `shard` has received.
    pub(crate) fn schedules(&self, shard: ShardId) -> usize {
        self.shard(shard).schedules.load(Ordering::SeqCst)
    }

    pub(crate) fn pending_messages(&self, shard: ShardId) -> usize {
        self.shard(shard).inbox.lock().unwrap().len()
    }

    pub(crate) fn message_routes(&self, shard: ShardId) -> Vec<Route> {
        let inbox = self.shard(shard).inbox.lock().unwrap();
        inbox.iter().map(|(route, _)| *route).collect()
    }

    /// Tasks hold a clone of their reactor, so every handle beyond the
    /// test's own is a live task (once no operation is in flight).
    pub(crate) fn live_tasks(&self) -> usize {
        Arc::strong_count(&self.inner) - 1
    }

    /// Drains `shard`'s inbox, then runs the tasks that were queued before
    /// the tick started. Returns whether anything ran.
    pub(crate) fn tick(&self, shard: ShardId) -> bool {
        self.on(Some(shard), || {
            let mut did_work = false;
            loop {
                let message = self.shard(shard).inbox.lock().unwrap().pop_front();
                let Some((_, message)) = message else { break };
                message();
                did_work = true;
            }

            let batch = self.queued(shard);
            for _ in 0..batch {
                let runnable = self.shard(shard).run_queue.lock().unwrap().pop_front();
                let Some(Queued(runnable)) = runnable else { break };
                unsafe { runnable.run() };
                did_work = true;
            }
            did_work
        })
    }

    pub(crate) fn run_until_idle(&self) {
        loop {
            let mut did_work = false;
            for shard in 0..self.inner.shards.len() {
                did_work |= self.tick(ShardId(shard as u32));
            }
            if !did_work {
                break;
            }
        }
    }
}

impl Reactor for Sim {
    fn current_shard(&self) -> Option<ShardId> {
        let current = self.inner.current.lock().unwrap();
        current.get(&thread::current().id()).copied()
    }

    fn schedule(&self, runnable: Runnable) {
        let shard = self
            .current_shard()
            .expect("schedule called off the simulated worker pool");
        let shard = self.shard(shard);
        shard.schedules.fetch_add(1, Ordering::SeqCst);
        shard.run_queue.lock().unwrap().push_back(Queued(runnable));
    }

    fn submit_to(&self, shard: ShardId, message: Message) -> Result<()> {
        assert!(self.current_shard().is_some(), "pool submission from a foreign thread");
        self.push(shard, Route::Pool, message)
    }

    fn submit_alien(&self, shard: ShardId, message: Message) -> Result<()> {
        self.push(shard, Route::Alien, message)
    }
}

impl Sim {
    fn push(&self, shard: ShardId, route: Route, message: Message) -> Result<()> {
        let count = self.inner.shards.len();
        let target = self
            .inner
            .shards
            .get(shard.index())
            .ok_or(Error::NoSuchShard { shard, count })?;
        target.inbox.lock().unwrap().push_back((route, message));
        Ok(())
    }
}

// ── Scripted foreign future ─────────────────────────────────────────

type PollHook = Box<dyn FnMut(*mut c_void) + Send>;

/// A foreign future that reports "not ready" a fixed number of times.
pub(crate) struct Script {
    pending_polls: usize,
    polls: Arc<AtomicUsize>,
    on_poll: Option<PollHook>,
}

impl Script {
    /// Returns the raw future handle and its poll counter.
    pub(crate) fn new(pending_polls: usize) -> (*mut c_void, Arc<AtomicUsize>) {
        Self::with_hook(pending_polls, None)
    }

    /// Like [`Script::new`]; `hook` sees the task identity on every poll.
    pub(crate) fn with_hook(
        pending_polls: usize,
        hook: Option<PollHook>,
    ) -> (*mut c_void, Arc<AtomicUsize>) {
        let polls = Arc::new(AtomicUsize::new(0));
        let script = Box::new(Script {
            pending_polls,
            polls: polls.clone(),
            on_poll: hook,
        });
        (Box::into_raw(script).cast(), polls)
    }
}

/// `RawPollFn` for [`Script`].
pub(crate) unsafe extern "C" fn poll_script(task: *mut c_void, future: *mut c_void) -> c_int {
    let ready = {
        let script = &mut *future.cast::<Script>();
        script.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = script.on_poll.as_mut() {
            hook(task);
        }
        if script.pending_polls == 0 {
            true
        } else {
            script.pending_polls -= 1;
            false
        }
    };
    if ready {
        drop(Box::from_raw(future.cast::<Script>()));
        1
    } else {
        0
    }
}
