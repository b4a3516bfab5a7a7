use crate::promise::Shared;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

/// Resolves with the outcome of a [`Promise`](crate::Promise) once it settles.
///
/// Any number of `Settled` futures may wait on the same promise; settlement
/// wakes all of them. A future created after settlement is ready on its first
/// poll.
///
/// # Examples
///
/// ```
/// use promise_cond::Promise;
/// use futures::executor::block_on;
/// use std::thread;
/// let p = Promise::<String>::new(|resolve, _reject| {
///     resolve.resolve("🍓".into());
/// });
/// let settled = p.settled();
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received {:?}", settled.await);
/// }));
/// task1.join().expect("The task1 thread has panicked.");
/// ```
pub struct Settled<T, E> {
    shared: Arc<Shared<T, E>>,
    /// Where this future's waker lives while the promise is pending.
    slot: Option<u64>,
}

impl<T, E> Settled<T, E> {
    pub(crate) fn new(shared: Arc<Shared<T, E>>) -> Self {
        Self { shared, slot: None }
    }
}

impl<T, E> Clone for Settled<T, E> {
    fn clone(&self) -> Self {
        Self::new(self.shared.clone())
    }
}

impl<T, E> Drop for Settled<T, E> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.shared.lock().unregister(slot);
        }
    }
}

impl<T, E> fmt::Debug for Settled<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled")
            .field("state", &self.shared.lock().outcome.state())
            .finish()
    }
}

impl<T: Clone, E: Clone> Future for Settled<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut inner = this.shared.lock();
        match inner.outcome.to_result() {
            Some(result) => Poll::Ready(result),
            None => {
                inner.register(&mut this.slot, cx.waker());
                Poll::Pending
            }
        }
    }
}
