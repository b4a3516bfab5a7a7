//! Where promise bodies and observers run.
//!
//! Every body handed to [`Promise::new`](crate::Promise::new) and every
//! `then`/`catch` observer becomes one [`Task`] submitted to a [`Spawn`]
//! implementation. Tasks are fire-and-forget: nothing joins, tracks or
//! cancels them.
use crate::Error;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

/// A unit of work submitted by a promise.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A facility able to run tasks concurrently with the caller.
///
/// Closures of the shape `Fn(Task) -> Result<(), Error>` implement this trait,
/// which makes it easy to route tasks into an existing pool.
///
/// ```
/// use promise_cond::{Error, Promise, Task};
/// use std::thread;
///
/// let spawner = |task: Task| -> Result<(), Error> {
///     thread::spawn(task);
///     Ok(())
/// };
/// let p = Promise::<i32>::new_with(spawner, |resolve, _reject| {
///     resolve.resolve(7);
/// });
/// assert_eq!(p.wait(), Some(7));
/// ```
pub trait Spawn: Send + Sync + 'static {
    fn spawn(&self, task: Task) -> Result<(), Error>;
}

impl<F> Spawn for F
where
    F: Fn(Task) -> Result<(), Error> + Send + Sync + 'static,
{
    fn spawn(&self, task: Task) -> Result<(), Error> {
        self(task)
    }
}

/// Runs each task on a fresh OS thread.
///
/// Clones share the thread counter used for naming.
#[derive(Debug, Clone, Default)]
pub struct ThreadSpawner {
    prefix: Option<String>,
    stack_size: Option<usize>,
    spawned: Arc<AtomicUsize>,
}

impl ThreadSpawner {
    /// Threads are named `{prefix}-0`, `{prefix}-1`, ... in spawn order.
    pub fn named(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    fn builder(&self) -> thread::Builder {
        let mut builder = thread::Builder::new();
        if let Some(prefix) = &self.prefix {
            let n = self.spawned.fetch_add(1, Ordering::Relaxed);
            builder = builder.name(format!("{prefix}-{n}"));
        }
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        builder
    }
}

impl Spawn for ThreadSpawner {
    fn spawn(&self, task: Task) -> Result<(), Error> {
        self.builder()
            .spawn(task)
            .map(drop)
            .map_err(|err| Error::Spawn(err.into()))
    }
}
