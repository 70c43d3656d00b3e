//! Error types for the messaging core.
//!
//! `CoreError` is the concrete error produced by every fallible operation in
//! this crate (store calls, stream-bus calls, registry calls). `ResilienceError<E>`
//! is the generic wrapper the circuit breaker / retry policy layer uses around
//! whatever operation they're guarding — kept from the resilience layer this
//! crate grew out of, generalized to `E: std::error::Error` rather than hardcoded
//! to `CoreError` so the policies stay reusable.

use std::fmt;
use std::time::Duration;

/// Cap the number of stored failures inside `RetryExhausted` to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// Errors raised by primary-store calls, stream-bus calls, and registries.
///
/// Mirrors `spec.md` §7's error kinds. `retryable()` tells the retry
/// scheduler and circuit breaker whether this failure should ever be retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// Backend timeout, connection error, or a failed half-open probe.
    #[error("transient error: {0}")]
    Transient(String),

    /// A required field was missing or malformed; never enqueued for retry.
    #[error("validation error: {0}")]
    Validation(String),

    /// The actor is not permitted to perform this operation.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// The referenced message/conversation does not exist in the primary store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Retries exhausted or a malformed recovery entry; terminal, never retried further.
    #[error("poison: {0}")]
    Poison(String),

    /// Backend unavailable with no fallback available.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// The Redis-backed stream bus is unavailable.
    #[error("stream bus unavailable: {0}")]
    StreamUnavailable(String),
}

impl CoreError {
    /// Whether this error class should ever be retried by `RetryScheduler`.
    pub fn retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::StreamUnavailable(_))
    }
}

/// Unified error type for the resilience policies (circuit breaker, retry,
/// bulkhead, timeout) layered in front of fallible operations.
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// The operation exceeded the timeout duration.
    Timeout { elapsed: Duration, timeout: Duration },
    /// The bulkhead rejected the operation due to capacity.
    Bulkhead { in_flight: usize, max: usize },
    /// The circuit breaker is open.
    CircuitOpen { failure_count: usize, open_duration: Duration },
    /// All retry attempts were exhausted.
    RetryExhausted { attempts: usize, failures: Vec<E> },
    /// The underlying operation failed.
    Inner(E),
}

impl<E: Clone> Clone for ResilienceError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Timeout { elapsed, timeout } => Self::Timeout { elapsed: *elapsed, timeout: *timeout },
            Self::Bulkhead { in_flight, max } => Self::Bulkhead { in_flight: *in_flight, max: *max },
            Self::CircuitOpen { failure_count, open_duration } => {
                Self::CircuitOpen { failure_count: *failure_count, open_duration: *open_duration }
            }
            Self::RetryExhausted { attempts, failures } => {
                Self::RetryExhausted { attempts: *attempts, failures: failures.clone() }
            }
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::Bulkhead { in_flight, max } => {
                write!(f, "bulkhead rejected request ({} in-flight, max {})", in_flight, max)
            }
            Self::CircuitOpen { failure_count, open_duration } => {
                write!(f, "circuit breaker open ({} failures, open for {:?})", failure_count, open_duration)
            }
            Self::RetryExhausted { attempts, failures } => {
                let last = failures.last().map(|e| e.to_string()).unwrap_or_default();
                write!(f, "retry exhausted after {} attempts ({} failures), last error: {}", attempts, failures.len(), last)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => failures.last().map(|e| e as &dyn std::error::Error),
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_bulkhead(&self) -> bool {
        matches!(self, Self::Bulkhead { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl ResilienceError<CoreError> {
    /// Whether the wrapped error (if any) is retryable per `CoreError::retryable`.
    pub fn is_retryable_inner(&self) -> bool {
        self.as_inner().map(CoreError::retryable).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_stream_unavailable_are_retryable() {
        assert!(CoreError::Transient("x".into()).retryable());
        assert!(CoreError::StreamUnavailable("x".into()).retryable());
    }

    #[test]
    fn validation_poison_authorization_not_found_and_fatal_are_not_retryable() {
        assert!(!CoreError::Validation("x".into()).retryable());
        assert!(!CoreError::Poison("x".into()).retryable());
        assert!(!CoreError::Authorization("x".into()).retryable());
        assert!(!CoreError::NotFound("x".into()).retryable());
        assert!(!CoreError::Fatal("x".into()).retryable(), "fatal is surfaced to the caller directly, never retried");
    }

    #[test]
    fn circuit_open_display_contains_failure_count() {
        let err: ResilienceError<CoreError> =
            ResilienceError::CircuitOpen { failure_count: 5, open_duration: Duration::from_secs(10) };
        let msg = format!("{}", err);
        assert!(msg.contains("5"));
        assert!(msg.contains("circuit breaker"));
    }

    #[test]
    fn retry_exhausted_display_includes_last_error() {
        let err: ResilienceError<CoreError> = ResilienceError::RetryExhausted {
            attempts: 3,
            failures: vec![CoreError::Transient("first".into()), CoreError::Transient("last".into())],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3"));
        assert!(msg.contains("last"));
    }
}
