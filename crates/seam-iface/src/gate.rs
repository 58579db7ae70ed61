//! A shard-local gate: tracks users of a resource and lets its owner wait
//! for all of them to leave before tearing it down.

use std::cell::Cell;
use std::future::{self, Future};
use std::ops::Deref;
use std::rc::Rc;
use std::task::{Poll, Waker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("attempted to enter a closed gate")]
pub struct GateClosed;

#[derive(Default)]
pub struct Gate<T> {
    inner: T,
    use_count: Cell<usize>,
    closed: Cell<bool>,
    waker: Cell<Option<Waker>>,
}

pub type GateHolder<'g, T> = GenericGateHolder<&'g Gate<T>, T>;
pub type OwnedGateHolder<T> = GenericGateHolder<Rc<Gate<T>>, T>;

impl<T> Gate<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            use_count: Cell::new(0),
            closed: Cell::new(false),
            waker: Cell::new(None),
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    #[inline]
    pub fn use_count(&self) -> usize {
        self.use_count.get()
    }

    pub fn enter(&self) -> Result<GateHolder<'_, T>, GateClosed> {
        self.add_ref()?;
        Ok(GenericGateHolder { gate: self })
    }

    pub fn enter_owned(self: &Rc<Self>) -> Result<OwnedGateHolder<T>, GateClosed> {
        self.add_ref()?;
        Ok(GenericGateHolder {
            gate: Rc::clone(self),
        })
    }

    /// Closes the gate right away; the returned future resolves once every
    /// holder has left.
    ///
    /// Fails if the gate was already closed.
    pub fn close(&self) -> impl Future<Output = Result<(), GateClosed>> + '_ {
        let already_closed = self.closed.replace(true);
        future::poll_fn(move |cx| {
            if already_closed {
                Poll::Ready(Err(GateClosed))
            } else if self.use_count.get() == 0 {
                Poll::Ready(Ok(()))
            } else {
                self.waker.set(Some(cx.waker().clone()));
                Poll::Pending
            }
        })
    }

    fn add_ref(&self) -> Result<(), GateClosed> {
        if self.is_closed() {
            return Err(GateClosed);
        }
        self.use_count.set(self.use_count.get() + 1);
        Ok(())
    }

    fn dec_ref(&self) {
        let left = self.use_count.get() - 1;
        self.use_count.set(left);
        if left == 0 && self.is_closed() {
            // `close` may not have been polled yet.
            if let Some(waker) = self.waker.take() {
                waker.wake();
            }
        }
    }
}

/// Proof of having entered a gate. Dereferences to the guarded value;
/// leaves the gate on drop.
pub struct GenericGateHolder<P, T>
where
    P: Deref<Target = Gate<T>>,
{
    gate: P,
}

impl<P, T> Deref for GenericGateHolder<P, T>
where
    P: Deref<Target = Gate<T>>,
{
    type Target = T;

    fn deref(&self) -> &T {
        &self.gate.inner
    }
}

impl<P, T> Drop for GenericGateHolder<P, T>
where
    P: Deref<Target = Gate<T>>,
{
    fn drop(&mut self) {
        self.gate.dec_ref();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_runner::run_test;
    use crate::yield_now;

    #[test]
    fn holders_count_and_deref() {
        let gate = Gate::new(String::from("guarded"));
        let a = gate.enter().unwrap();
        let b = gate.enter().unwrap();
        assert_eq!(gate.use_count(), 2);
        assert_eq!(&*a, "guarded");
        drop((a, b));
        assert_eq!(gate.use_count(), 0);
    }

    #[test]
    fn close_waits_for_holders() {
        run_test(|| async {
            let gate = Rc::new(Gate::new(()));
            let holder = gate.enter_owned().unwrap();

            let g = gate.clone();
            let closing = crate::spawn(async move { g.close().await });
            assert!(gate.is_closed());
            assert!(matches!(gate.enter(), Err(GateClosed)));

            yield_now().await;
            drop(holder);
            closing.await.unwrap().unwrap();
            assert_eq!(gate.use_count(), 0);
        });
    }

    #[test]
    fn closing_twice_fails() {
        futures::executor::block_on(async {
            let gate = Gate::new(0u8);
            gate.close().await.unwrap();
            assert_eq!(gate.close().await, Err(GateClosed));
        });
    }

    #[test]
    fn holders_leaving_before_close_is_polled() {
        futures::executor::block_on(async {
            let gate = Gate::new(());
            let holder = gate.enter().unwrap();
            let closing = gate.close();
            drop(holder);
            closing.await.unwrap();
        });
    }
}
