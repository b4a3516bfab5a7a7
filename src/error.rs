use std::{io, sync::Arc};

/// The failure payload a [`Promise`](crate::Promise) is rejected with by
/// default.
///
/// It is `Clone` because every `catch` observer and every waiter receives its
/// own copy of the one rejection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Source(Arc<dyn std::error::Error + Send + Sync + 'static>),
    #[error("failed to spawn promise task: {0}")]
    Spawn(Arc<io::Error>),
}

impl Error {
    /// A rejection reason made of a plain message.
    ///
    /// ```
    /// let err = promise_cond::Error::msg("boom");
    /// assert_eq!(err.to_string(), "boom");
    /// ```
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    /// Wraps any foreign error.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Source(Arc::new(err))
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::msg(message)
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Message(message)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::new(err)
    }
}
