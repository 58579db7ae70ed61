use std::cell::{Cell, RefCell};
use std::future::{self, Future};
use std::rc::Rc;
use std::task::{Poll, Waker};

use crate::preempt::gentle_cleanup;

/// Groups operations into phases and waits for all operations of the
/// phases before the current one to finish.
///
/// Shard-local: operations are tracked with `Rc`s.
#[derive(Default)]
pub struct PhasedBarrier {
    current: RefCell<Rc<Stage>>,
}

#[derive(Default)]
struct Stage {
    /// Live operations started in this stage.
    operations: Cell<usize>,
    /// Wakes whoever waits for this stage once it is dropped.
    wake_on_drop: WakeOnDrop,
    /// Keeps the next stage unfinished while this one is still running.
    next: Cell<Option<Rc<Stage>>>,
}

impl Drop for Stage {
    fn drop(&mut self) {
        // Chains of finished stages can get long: unlink them a few at a
        // time instead of recursing.
        gentle_cleanup(self.next.take(), |stage| match Rc::try_unwrap(stage) {
            // Still in use; its last operation continues the cleanup.
            Err(_) => None,
            Ok(stage) => stage.next.take(),
        });
    }
}

#[derive(Default)]
struct WakeOnDrop(Cell<Option<Waker>>);

impl Drop for WakeOnDrop {
    fn drop(&mut self) {
        if let Some(waker) = self.0.take() {
            waker.wake();
        }
    }
}

/// An operation in progress; finishes when dropped.
#[must_use = "the operation finishes as soon as this is dropped"]
pub struct Operation(Rc<Stage>);

impl Drop for Operation {
    fn drop(&mut self) {
        self.0.operations.set(self.0.operations.get() - 1);
    }
}

impl PhasedBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an operation in the current phase.
    pub fn start(&self) -> Operation {
        let stage = Rc::clone(&self.current.borrow());
        stage.operations.set(stage.operations.get() + 1);
        Operation(stage)
    }

    /// Starts a new phase. The returned future resolves once every operation
    /// of the previous phases has finished; dropping it is fine.
    pub fn advance(&self) -> impl Future<Output = ()> {
        let next = Rc::new(Stage::default());
        let previous = self.current.replace(Rc::clone(&next));
        previous.next.set(Some(next));

        // Only the operations keep the previous stage alive.
        let previous = Rc::downgrade(&previous);
        future::poll_fn(move |cx| match previous.upgrade() {
            Some(stage) => {
                stage.wake_on_drop.0.set(Some(cx.waker().clone()));
                Poll::Pending
            }
            None => Poll::Ready(()),
        })
    }

    /// Number of operations running in the current phase.
    pub fn operations_in_progress(&self) -> usize {
        self.current.borrow().operations.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_runner::run_test;
    use crate::yield_now;

    #[test]
    fn counts_operations_of_the_current_phase() {
        run_test(|| async {
            let barrier = PhasedBarrier::new();
            let a = barrier.start();
            let b = barrier.start();
            assert_eq!(barrier.operations_in_progress(), 2);

            drop(barrier.advance());
            assert_eq!(barrier.operations_in_progress(), 0);

            // Earlier operations still running do not count.
            let c = barrier.start();
            assert_eq!(barrier.operations_in_progress(), 1);
            drop(a);
            assert_eq!(barrier.operations_in_progress(), 1);
            drop(c);
            assert_eq!(barrier.operations_in_progress(), 0);
            drop(b);
        });
    }

    #[test]
    fn advance_waits_for_earlier_phases() {
        run_test(|| async {
            let barrier = PhasedBarrier::new();
            let first = barrier.start();
            let first_done = barrier.advance();

            let second = barrier.start();
            let second_phase = barrier.advance();
            let reached = Rc::new(Cell::new(false));
            let r = reached.clone();
            let waiter = crate::spawn(async move {
                second_phase.await;
                r.set(true);
            });

            // The second phase also waits for the first one.
            drop(second);
            yield_now().await;
            yield_now().await;
            assert!(!reached.get());

            drop(first);
            first_done.await;
            waiter.await.unwrap();
            assert!(reached.get());
        });
    }

    #[test]
    fn idle_phase_advances_immediately() {
        run_test(|| async {
            let barrier = PhasedBarrier::new();
            barrier.advance().await;
            barrier.advance().await;
        });
    }
}
