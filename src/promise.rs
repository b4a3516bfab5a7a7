use crate::{
    spawn::{Spawn, Task, ThreadSpawner},
    Error, Settled,
};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    task::Waker,
};

/// Where a [`Promise`] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Pending => "pending",
            State::Fulfilled => "fulfilled",
            State::Rejected => "rejected",
        })
    }
}

#[derive(Debug)]
pub(crate) enum Outcome<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> Outcome<T, E> {
    pub(crate) fn state(&self) -> State {
        match self {
            Outcome::Pending => State::Pending,
            Outcome::Fulfilled(_) => State::Fulfilled,
            Outcome::Rejected(_) => State::Rejected,
        }
    }

    /// `None` while pending.
    pub(crate) fn to_result(&self) -> Option<Result<T, E>>
    where
        T: Clone,
        E: Clone,
    {
        match self {
            Outcome::Pending => None,
            Outcome::Fulfilled(value) => Some(Ok(value.clone())),
            Outcome::Rejected(err) => Some(Err(err.clone())),
        }
    }
}

pub(crate) struct Inner<T, E> {
    pub(crate) outcome: Outcome<T, E>,
    /// One waker per pending [`Settled`] future, keyed by its slot.
    wakers: HashMap<u64, Waker>,
    next_slot: u64,
}

impl<T, E> Inner<T, E> {
    /// Stores `waker` in `slot`, allocating a slot on first use.
    pub(crate) fn register(&mut self, slot: &mut Option<u64>, waker: &Waker) {
        let id = *slot.get_or_insert_with(|| {
            let id = self.next_slot;
            self.next_slot += 1;
            id
        });
        match self.wakers.get_mut(&id) {
            Some(current) if current.will_wake(waker) => {}
            Some(current) => *current = waker.clone(),
            None => {
                self.wakers.insert(id, waker.clone());
            }
        }
    }

    pub(crate) fn unregister(&mut self, slot: u64) {
        self.wakers.remove(&slot);
    }

    #[cfg(test)]
    pub(crate) fn waker_count(&self) -> usize {
        self.wakers.len()
    }
}

/// The state every handle to one promise points at.
pub(crate) struct Shared<T, E> {
    inner: Mutex<Inner<T, E>>,
    settled: Condvar,
}

impl<T, E> Shared<T, E> {
    fn new(outcome: Outcome<T, E>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                outcome,
                wakers: HashMap::new(),
                next_slot: 0,
            }),
            settled: Condvar::new(),
        }
    }

    /// Nothing runs user code while this guard is held, so a poisoned lock
    /// still guards a consistent outcome.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves a pending promise into `outcome`. Returns `false`, changing
    /// nothing, if it had already settled.
    pub(crate) fn settle(&self, outcome: Outcome<T, E>) -> bool {
        let wakers = {
            let mut inner = self.lock();
            if let Outcome::Pending = inner.outcome {
                log::trace!(target: "promise", "promise {}", outcome.state());
                inner.outcome = outcome;
                self.settled.notify_all();
                std::mem::take(&mut inner.wakers)
            } else {
                log::debug!(
                    target: "promise",
                    "ignoring late settlement as {}, promise is already {}",
                    outcome.state(),
                    inner.outcome.state()
                );
                return false;
            }
        };
        for waker in wakers.into_values() {
            waker.wake()
        }
        true
    }

    /// Blocks until settled.
    pub(crate) fn wait(&self) -> Result<T, E>
    where
        T: Clone,
        E: Clone,
    {
        let mut inner = self.lock();
        loop {
            if let Some(result) = inner.outcome.to_result() {
                return result;
            }
            inner = self
                .settled
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Fulfills the promise it was handed out by.
///
/// Only the first settlement of a promise counts, whether it came from a
/// `Resolver` or a [`Rejecter`]. Later calls are ignored.
pub struct Resolver<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Resolver<T, E> {
    /// Returns `true` if this call settled the promise.
    pub fn resolve(&self, value: T) -> bool {
        self.shared.settle(Outcome::Fulfilled(value))
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

/// Rejects the promise it was handed out by. See [`Resolver`].
pub struct Rejecter<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Rejecter<T, E> {
    /// Returns `true` if this call settled the promise.
    pub fn reject(&self, err: E) -> bool {
        self.shared.settle(Outcome::Rejected(err))
    }
}

impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Rejecter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejecter").finish_non_exhaustive()
    }
}

/// A value that is filled exactly once, with either a success value or a
/// failure, and observed by any number of consumers.
///
/// Clones are handles to the same promise.
///
/// A promise whose body never settles it (including a body that panics)
/// stays pending forever, and so does everyone waiting on it.
///
/// # Examples
///
/// ```
/// use promise_cond::{Error, Promise};
/// use std::thread;
/// let p = Promise::<String>::new(|resolve, _reject| {
///     resolve.resolve("🍓".into());
/// });
/// p.then(|value| println!("我等到了{value}"))
///     .catch(|err: Error| println!("出错了{err}"));
/// let waiter = p.clone();
/// let task1 = thread::spawn(move || waiter.wait());
/// assert_eq!(task1.join().expect("The task1 thread has panicked"), Some("🍓".into()));
/// ```
pub struct Promise<T, E = Error> {
    shared: Arc<Shared<T, E>>,
    spawner: Arc<dyn Spawn>,
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// A promise that is already fulfilled with `value`.
    pub fn resolve(value: T) -> Self {
        Self::from_outcome(Outcome::Fulfilled(value))
    }

    /// A promise that is already rejected with `err`.
    pub fn reject(err: E) -> Self {
        Self::from_outcome(Outcome::Rejected(err))
    }

    /// A pending promise whose `body` runs on its own thread.
    ///
    /// `body` gets the capabilities to settle the promise and is expected to
    /// use one of them once. This returns without waiting for `body`.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) + Send + 'static,
    {
        Self::new_with(ThreadSpawner::default(), body)
    }

    /// Like [`Promise::new`], with `body` and any later observers submitted
    /// to `spawner`.
    pub fn new_with<S, F>(spawner: S, body: F) -> Self
    where
        S: Spawn,
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) + Send + 'static,
    {
        let promise = Self {
            shared: Arc::new(Shared::new(Outcome::Pending)),
            spawner: Arc::new(spawner),
        };
        let resolver = Resolver {
            shared: promise.shared.clone(),
        };
        let rejecter = Rejecter {
            shared: promise.shared.clone(),
        };
        promise.submit(Box::new(move || body(resolver, rejecter)));
        promise
    }

    /// Observers registered through the returned handle run on `spawner`.
    pub fn with_spawner<S: Spawn>(mut self, spawner: S) -> Self {
        self.spawner = Arc::new(spawner);
        self
    }

    fn from_outcome(outcome: Outcome<T, E>) -> Self {
        Self {
            shared: Arc::new(Shared::new(outcome)),
            spawner: Arc::new(ThreadSpawner::default()),
        }
    }

    /// Blocks until the promise settles and returns the success value.
    ///
    /// A rejected promise yields `None`; its failure is left in
    /// [`Promise::err`]. Returns at once if the promise is already settled.
    pub fn wait(&self) -> Option<T> {
        self.shared.wait().ok()
    }

    /// Blocks until the promise settles and returns its outcome.
    pub fn wait_result(&self) -> Result<T, E> {
        self.shared.wait()
    }

    /// A future resolving with the outcome once the promise settles.
    pub fn settled(&self) -> Settled<T, E> {
        Settled::new(self.shared.clone())
    }

    /// Runs `on_fulfilled` on its own task once the promise is fulfilled.
    ///
    /// Never runs it if the promise is rejected. Returns the same promise so
    /// more observers can be registered.
    pub fn then<F>(&self, on_fulfilled: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        let shared = self.shared.clone();
        self.submit(Box::new(move || {
            if let Ok(value) = shared.wait() {
                on_fulfilled(value)
            }
        }));
        self
    }

    /// Runs `on_rejected` on its own task once the promise is rejected.
    ///
    /// Never runs it if the promise is fulfilled.
    pub fn catch<F>(&self, on_rejected: F) -> &Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        let shared = self.shared.clone();
        self.submit(Box::new(move || {
            if let Err(err) = shared.wait() {
                on_rejected(err)
            }
        }));
        self
    }

    /// The success value, if the promise is fulfilled.
    pub fn value(&self) -> Option<T> {
        match &self.shared.lock().outcome {
            Outcome::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The failure, if the promise is rejected.
    pub fn err(&self) -> Option<E> {
        match &self.shared.lock().outcome {
            Outcome::Rejected(err) => Some(err.clone()),
            _ => None,
        }
    }

    fn submit(&self, task: Task) {
        if let Err(err) = self.spawner.spawn(task) {
            log::error!(target: "promise", "{err}; the task will never run");
        }
    }
}

impl<T, E> Promise<T, E> {
    pub fn state(&self) -> State {
        self.shared.lock().outcome.state()
    }

    pub fn is_settled(&self) -> bool {
        self.state() != State::Pending
    }
}

impl<T, E> From<Result<T, E>> for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Promise::resolve(value),
            Err(err) => Promise::reject(err),
        }
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            spawner: self.spawner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{Outcome, Promise, State};
    use crate::{Error, Task};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc::{channel, RecvTimeoutError},
            Arc, Barrier,
        },
        thread,
        time::Duration,
    };

    const PATIENCE: Duration = Duration::from_secs(5);

    #[test]
    fn test_resolve_is_settled_at_once() {
        let p = Promise::<i32>::resolve(42);
        assert_eq!(p.state(), State::Fulfilled);
        assert_eq!(p.wait(), Some(42));
        assert!(p.err().is_none());
    }

    #[test]
    fn test_reject_holds_error() {
        let p = Promise::<i32>::reject(Error::msg("boom"));
        assert_eq!(p.state(), State::Rejected);
        assert_eq!(p.err().unwrap().to_string(), "boom");
        assert_eq!(p.value(), None);
        assert_eq!(p.wait(), None);
    }

    #[test]
    fn test_first_settlement_wins() {
        let (tx, rx) = channel();
        let p = Promise::<i32, String>::new(move |resolve, reject| {
            let settled = [
                resolve.resolve(1),
                resolve.resolve(2),
                reject.reject("late".into()),
            ];
            tx.send(settled).unwrap();
        });
        assert_eq!(rx.recv_timeout(PATIENCE), Ok([true, false, false]));
        assert_eq!(p.wait_result(), Ok(1));
        assert_eq!(p.err(), None);
    }

    #[test]
    fn test_is_settled() {
        let (go_tx, go_rx) = channel::<()>();
        let p = Promise::<i32>::new(move |resolve, _reject| {
            go_rx.recv().unwrap();
            resolve.resolve(1);
        });
        assert!(!p.is_settled());
        go_tx.send(()).unwrap();
        assert_eq!(p.wait(), Some(1));
        assert!(p.is_settled());
        assert!(Promise::<i32>::reject("nope".into()).is_settled());
    }

    #[test]
    fn test_settle_twice_keeps_first() {
        let p = Promise::<i32, String>::resolve(1);
        assert!(!p.shared.settle(Outcome::Rejected("nope".into())));
        assert_eq!(p.wait_result(), Ok(1));

        let p = Promise::<i32, String>::reject("first".into());
        assert!(!p.shared.settle(Outcome::Fulfilled(2)));
        assert_eq!(p.wait_result(), Err("first".into()));
    }

    #[test]
    fn test_many_waiters_see_same_value() {
        const WAITERS: usize = 8;
        let (go_tx, go_rx) = channel::<()>();
        let p = Promise::<String>::new(move |resolve, _reject| {
            go_rx.recv().unwrap();
            resolve.resolve(String::from("🍓"));
        });
        let ready = Arc::new(Barrier::new(WAITERS + 1));
        let (done_tx, done_rx) = channel();
        for _ in 0..WAITERS {
            let p = p.clone();
            let ready = ready.clone();
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                ready.wait();
                done_tx.send(p.wait()).unwrap();
            });
        }
        ready.wait();
        assert_eq!(
            done_rx.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout)
        );
        go_tx.send(()).unwrap();
        for _ in 0..WAITERS {
            assert_eq!(done_rx.recv_timeout(PATIENCE), Ok(Some("🍓".to_string())));
        }
    }

    #[test]
    fn test_then_skips_rejection() {
        let (tx, rx) = channel();
        let p = Promise::<i32, String>::reject("boom".into());
        let then_tx = tx.clone();
        p.then(move |value| then_tx.send(format!("then {value}")).unwrap())
            .catch(move |err| tx.send(format!("catch {err}")).unwrap());
        assert_eq!(rx.recv_timeout(PATIENCE), Ok("catch boom".to_string()));
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(200)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_then_skips_later_rejection() {
        let (go_tx, go_rx) = channel::<()>();
        let (tx, rx) = channel();
        let p = Promise::<i32, String>::new(move |_resolve, reject| {
            go_rx.recv().unwrap();
            reject.reject("boom".into());
        });
        let then_tx = tx.clone();
        p.then(move |value| then_tx.send(format!("then {value}")).unwrap())
            .catch(move |err| tx.send(format!("catch {err}")).unwrap());
        // Both observers are parked until the body is let go.
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout)
        );
        assert_eq!(p.state(), State::Pending);
        go_tx.send(()).unwrap();
        assert_eq!(rx.recv_timeout(PATIENCE), Ok("catch boom".to_string()));
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(200)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_callback_may_touch_same_promise() {
        let (tx, rx) = channel();
        let p = Promise::<i32>::new(|resolve, _reject| {
            resolve.resolve(5);
        });
        let inner = p.clone();
        p.then(move |value| {
            inner.then(move |again| tx.send(value + again).unwrap());
        });
        assert_eq!(rx.recv_timeout(PATIENCE), Ok(10));
    }

    #[test]
    fn test_every_observer_is_a_task() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let counter = spawned.clone();
        let spawner = move |task: Task| -> Result<(), Error> {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::spawn(task);
            Ok(())
        };
        let p = Promise::<i32>::new_with(spawner, |resolve, _reject| {
            resolve.resolve(1);
        });
        p.then(|_| {}).then(|_| {}).catch(|_| {});
        assert_eq!(spawned.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_refused_body_never_settles() {
        let refuse = |_task: Task| -> Result<(), Error> { Err(Error::msg("pool closed")) };
        let p = Promise::<i32>::new_with(refuse, |resolve, _reject| {
            resolve.resolve(1);
        });
        assert_eq!(p.state(), State::Pending);
    }

    #[test]
    fn test_from_result() {
        assert_eq!(Promise::<i32, String>::from(Ok(1)).wait(), Some(1));
        let p = Promise::<i32, String>::from(Err("no".into()));
        assert_eq!(p.err(), Some("no".to_string()));
        assert_eq!(format!("{p:?}"), "Promise { state: Rejected, .. }");
    }
}
