//! Operation outcomes and construction errors.

use std::fmt;

/// Outcome of a map operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationResult {
    /// The operation took effect.
    Success,
    /// A conditional update or removal observed a different value.
    ExpectedValueMismatch,
    /// No element with the key's hash is present.
    ElementNotFound,
    /// An element with the key's hash is already present.
    AlreadyPresent,
    /// The calling thread's dense id is outside the container's
    /// `max_threads` budget, so it holds no hazard slot and cannot touch
    /// the trie.
    ThreadLimitExceeded,
}

impl OperationResult {
    /// `true` when the operation took effect.
    #[inline]
    pub fn succeeded(self) -> bool {
        self == Self::Success
    }

    /// `true` for any outcome other than [`OperationResult::Success`].
    #[inline]
    pub fn failed(self) -> bool {
        !self.succeeded()
    }
}

/// Typed errors for container construction.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// `log_fanout` must be a nonzero power of two below the hash width.
    InvalidFanout {
        /// The rejected value.
        log_fanout: usize,
    },
    /// `max_threads` must be at least one.
    NoThreads,
    /// `max_fail_count` must be at least `max_threads`.
    FailBoundTooSmall {
        /// The rejected retry budget.
        max_fail_count: usize,
        /// The configured thread cap it must cover.
        max_threads: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidFanout { log_fanout } => {
                write!(
                    f,
                    "log_fanout {} is not a nonzero power of two below 64",
                    log_fanout
                )
            }
            ConfigError::NoThreads => {
                write!(f, "max_threads must be at least one")
            }
            ConfigError::FailBoundTooSmall {
                max_fail_count,
                max_threads,
            } => {
                write!(
                    f,
                    "max_fail_count {} is below max_threads {}",
                    max_fail_count, max_threads
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}
