//! A promise that settles exactly once.
//!
//! A [`Promise`] starts pending, or already settled when built with
//! [`Promise::resolve`] / [`Promise::reject`]. Its body runs on its own task
//! and settles it through a [`Resolver`] or a [`Rejecter`]; the first
//! settlement wins. Consumers either block in [`Promise::wait`], await
//! [`Promise::settled`], or register fire-and-forget observers with
//! [`Promise::then`] and [`Promise::catch`].
//!
//! ```
//! use promise_cond::{Error, Promise};
//! let p = Promise::<i32>::new(|_resolve, reject| {
//!     reject.reject(Error::msg("boom"));
//! });
//! assert_eq!(p.wait(), None);
//! assert_eq!(p.err().unwrap().to_string(), "boom");
//! ```
mod error;
mod future;
mod promise;
pub mod spawn;

pub use error::Error;
pub use future::Settled;
pub use promise::{Promise, Rejecter, Resolver, State};
pub use spawn::{Spawn, Task, ThreadSpawner};
