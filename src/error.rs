//! Error types for buffers, codecs, worker tasks, and the compression pipeline.

use std::time::Duration;
use thiserror::Error;

/// An error returned when constructing a [`PixelBuffer`](crate::PixelBuffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The byte length does not equal `width * height * 4`.
    #[error("expected {expected} bytes of RGBA pixels, got {actual}")]
    LengthMismatch {
        /// The length required by the dimensions.
        expected: usize,
        /// The length that was provided.
        actual: usize,
    },
    /// One of the dimensions is zero.
    #[error("image dimensions {width}x{height} must be non-zero")]
    ZeroDimension {
        /// The requested width.
        width: u32,
        /// The requested height.
        height: u32,
    },
    /// The dimensions do not fit in the address space or exceed [`MAX_PIXELS`](crate::MAX_PIXELS).
    #[error("image dimensions {width}x{height} are too large")]
    Overflow {
        /// The requested width.
        width: u32,
        /// The requested height.
        height: u32,
    },
    /// The buffer is above the configured maximum number of bytes.
    #[error("input of {actual} bytes is above the maximum of {max} bytes")]
    AboveMaxLen {
        /// The configured maximum.
        max: usize,
        /// The length of the input.
        actual: usize,
    },
}

/// An error reported by an [`Encoder`](crate::Encoder).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The codec rejected the parameters (e.g., the quality). Another strategy may succeed.
    #[error("codec rejected parameters: {0}")]
    Rejected(String),
    /// The format or pixel layout is not supported at all. No strategy can succeed.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The codec failed while encoding.
    #[error("codec error: {0}")]
    Codec(String),
}

impl EncodeError {
    /// Whether retrying with a different strategy is pointless.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, EncodeError::Unsupported(_))
    }
}

/// An error from a task submitted to the [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// No worker became idle before the deadline.
    #[error("no worker became available in time")]
    Unavailable,
    /// The task did not report a result before its timeout.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),
    /// The task reported an error (or panicked).
    #[error("task failed: {0}")]
    Failed(String),
    /// The worker went away without reporting a result.
    #[error("worker disconnected before reporting a result")]
    Disconnected,
    /// The pool has been shut down.
    #[error("worker pool is shut down")]
    ShutDown,
}

/// The error type of the compression pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressError {
    /// The input is malformed, unsupported, or too large. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] BufferError),
    /// The input could not be decoded into pixels.
    #[error("could not decode input: {0}")]
    Decode(String),
    /// No worker was available and local recovery also failed.
    #[error("no worker available")]
    WorkerUnavailable,
    /// A worker timed out and local recovery also failed.
    #[error("worker timed out after {0:?}")]
    WorkerTimeout(Duration),
    /// A worker reported an error and local recovery also failed.
    #[error("worker failed: {0}")]
    WorkerFailed(String),
    /// The codec failed to encode.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// A strategy ran past its deadline.
    #[error("deadline of {0:?} expired")]
    DeadlineExpired(Duration),
    /// Every strategy failed. Carries the last underlying cause.
    #[error("all compression strategies failed")]
    Exhausted {
        /// The error from the last strategy that ran.
        #[source]
        source: Box<CompressError>,
    },
}

impl CompressError {
    /// Whether the error is a precondition violation or an unrecoverable codec error,
    /// such that no fallback strategy can succeed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            CompressError::InvalidInput(_) | CompressError::Decode(_) => true,
            CompressError::Encode(error) => error.is_fatal(),
            CompressError::Exhausted { source } => source.is_fatal(),
            CompressError::WorkerUnavailable
            | CompressError::WorkerTimeout(_)
            | CompressError::WorkerFailed(_)
            | CompressError::DeadlineExpired(_) => false,
        }
    }
}

impl From<TaskError> for CompressError {
    fn from(error: TaskError) -> Self {
        match error {
            TaskError::Unavailable | TaskError::ShutDown => CompressError::WorkerUnavailable,
            TaskError::Timeout(timeout) => CompressError::WorkerTimeout(timeout),
            TaskError::Failed(message) => CompressError::WorkerFailed(message),
            TaskError::Disconnected => {
                CompressError::WorkerFailed(TaskError::Disconnected.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality() {
        assert!(CompressError::from(BufferError::ZeroDimension { width: 0, height: 0 }).is_fatal());
        assert!(CompressError::from(EncodeError::Unsupported("gif".into())).is_fatal());
        assert!(!CompressError::from(EncodeError::Rejected("quality".into())).is_fatal());
        assert!(!CompressError::from(TaskError::Timeout(Duration::from_secs(1))).is_fatal());

        let exhausted = CompressError::Exhausted {
            source: Box::new(CompressError::DeadlineExpired(Duration::from_secs(1))),
        };
        assert!(!exhausted.is_fatal());
    }

    #[test]
    fn exhausted_keeps_cause() {
        let cause = CompressError::WorkerFailed("boom".into());
        let error = CompressError::Exhausted { source: Box::new(cause.clone()) };
        let source = std::error::Error::source(&error).map(ToString::to_string);
        assert_eq!(source, Some(cause.to_string()));
    }
}
