//! Retry strategies and predicates for handling transient failures.
//!
//! Retries happen inside a single logical execution: coalesced callers share
//! the whole retry sequence, and attempts for one fingerprint never overlap.

use crate::Error;
use http::StatusCode;
use rand::Rng;
use std::time::{Duration, SystemTime};

/// Defines when and how to retry failed transport attempts.
///
/// # Examples
///
/// ```
/// use convoy::RetryStrategy;
/// use std::time::Duration;
///
/// // Exponential backoff: 100ms, 200ms, 400ms, 800ms...
/// let exponential = RetryStrategy::ExponentialBackoff {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(30),
///     max_retries: 5,
///     jitter: true,
/// };
///
/// // Linear backoff: 1s, 1s, 1s
/// let linear = RetryStrategy::Linear {
///     delay: Duration::from_secs(1),
///     max_retries: 3,
/// };
/// assert_eq!(linear.delay_for_attempt(3), Some(Duration::from_secs(1)));
/// assert_eq!(linear.delay_for_attempt(4), None);
/// ```
#[derive(Debug, Clone, Default)]
pub enum RetryStrategy {
    /// Do not retry.
    #[default]
    None,

    /// Each retry waits `initial_delay * 2^(attempt - 1)`, capped at `max_delay`.
    /// Jitter scales the delay by a random factor in `[0.5, 1.0]`.
    ExponentialBackoff {
        initial_delay: Duration,
        max_delay: Duration,
        max_retries: usize,
        jitter: bool,
    },

    /// Fixed delay between attempts.
    Linear { delay: Duration, max_retries: usize },

    /// Takes the retry number (1-indexed) and returns the delay before it,
    /// or `None` to stop.
    Custom {
        delay_fn: fn(attempt: usize) -> Option<Duration>,
    },
}

impl RetryStrategy {
    /// Returns the delay before the given retry, or `None` if retries are exhausted.
    ///
    /// `attempt` is 1-indexed: 1 is the first retry.
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        match self {
            RetryStrategy::None => None,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                max_delay,
                max_retries,
                jitter,
            } => {
                if attempt > *max_retries {
                    return None;
                }

                let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1) as u32);
                let base_delay =
                    initial_delay.saturating_mul(multiplier.try_into().unwrap_or(u32::MAX));
                let delay = base_delay.min(*max_delay);

                if *jitter {
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    Some(delay.mul_f64(jitter_factor))
                } else {
                    Some(delay)
                }
            }
            RetryStrategy::Linear { delay, max_retries } => {
                if attempt > *max_retries {
                    None
                } else {
                    Some(*delay)
                }
            }
            RetryStrategy::Custom { delay_fn } => delay_fn(attempt),
        }
    }

    /// Upper bound for a server-requested delay under this strategy.
    pub(crate) fn delay_ceiling(&self) -> Duration {
        match self {
            RetryStrategy::ExponentialBackoff { max_delay, .. } => *max_delay,
            RetryStrategy::Linear { delay, .. } => (*delay).max(Duration::from_secs(60)),
            RetryStrategy::None | RetryStrategy::Custom { .. } => Duration::from_secs(60),
        }
    }

    /// Returns the maximum number of retries, if bounded.
    pub fn max_retries(&self) -> Option<usize> {
        match self {
            RetryStrategy::None => Some(0),
            RetryStrategy::ExponentialBackoff { max_retries, .. } => Some(*max_retries),
            RetryStrategy::Linear { max_retries, .. } => Some(*max_retries),
            RetryStrategy::Custom { .. } => None,
        }
    }
}

/// Decides whether a failed attempt should be retried.
///
/// # Examples
///
/// ```
/// use convoy::{Error, RetryPredicate};
///
/// struct RetryOnRateLimit;
///
/// impl RetryPredicate for RetryOnRateLimit {
///     fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
///         matches!(error.status(), Some(status) if status.as_u16() == 429)
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// `attempt` is the 1-indexed attempt that just failed.
    fn should_retry(&self, error: &Error, attempt: usize) -> bool;
}

/// Retries everything [`Error::is_retryable`] accepts.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnRetryable;

impl RetryPredicate for RetryOnRetryable {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.is_retryable()
    }
}

/// Retries 5xx responses only.
#[derive(Debug, Clone, Copy)]
pub struct RetryOn5xx;

impl RetryPredicate for RetryOn5xx {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::BadResponse { status, .. } if status.is_server_error())
    }
}

/// Retries any of the timeout kinds.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTimeout;

impl RetryPredicate for RetryOnTimeout {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.is_timeout()
    }
}

/// Retries connection errors only.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnConnectionError;

impl RetryPredicate for RetryOnConnectionError {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::Connection { .. })
    }
}

/// Retries if any inner predicate does.
pub struct OrPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl OrPredicate {
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for OrPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .any(|p| p.should_retry(error, attempt))
    }
}

/// Retries only if every inner predicate does.
pub struct AndPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl AndPredicate {
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for AndPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .all(|p| p.should_retry(error, attempt))
    }
}

/// Delay requested by the server through `Retry-After` on a 429 or 503.
///
/// Accepts both delay-seconds and HTTP-date forms.
pub(crate) fn retry_after(error: &Error) -> Option<Duration> {
    let Error::BadResponse {
        status, headers, ..
    } = error
    else {
        return None;
    };
    if *status != StatusCode::TOO_MANY_REQUESTS && *status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }

    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};

    fn bad_response(status: u16, retry_after: Option<&str>) -> Error {
        let mut headers = HeaderMap::new();
        if let Some(value) = retry_after {
            headers.insert(http::header::RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        }
        Error::BadResponse {
            status: StatusCode::from_u16(status).unwrap(),
            raw_response: String::new(),
            headers,
        }
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_retries: 4,
            jitter: false,
        };

        assert_eq!(strategy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(strategy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(strategy.delay_for_attempt(4), Some(Duration::from_millis(500)));
        assert_eq!(strategy.delay_for_attempt(5), None);
    }

    #[test]
    fn test_no_retry() {
        assert_eq!(RetryStrategy::None.delay_for_attempt(1), None);
        assert_eq!(RetryStrategy::None.max_retries(), Some(0));
    }

    #[test]
    fn test_predicates() {
        let server = bad_response(502, None);
        let client = bad_response(404, None);
        let timeout = Error::ReceiveTimeout {
            message: String::new(),
            source: None,
        };

        assert!(RetryOn5xx.should_retry(&server, 1));
        assert!(!RetryOn5xx.should_retry(&client, 1));
        assert!(RetryOnTimeout.should_retry(&timeout, 1));
        assert!(!RetryOnRetryable.should_retry(&Error::Cancelled, 1));

        let either = OrPredicate::new(vec![Box::new(RetryOn5xx), Box::new(RetryOnTimeout)]);
        assert!(either.should_retry(&timeout, 1));
        let both = AndPredicate::new(vec![Box::new(RetryOn5xx), Box::new(RetryOnTimeout)]);
        assert!(!both.should_retry(&server, 1));
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(
            retry_after(&bad_response(429, Some("7"))),
            Some(Duration::from_secs(7))
        );
        assert_eq!(retry_after(&bad_response(500, Some("7"))), None);
        assert_eq!(retry_after(&bad_response(503, None)), None);
        assert_eq!(
            retry_after(&bad_response(503, Some("Wed, 21 Oct 2015 07:28:00 GMT"))),
            Some(Duration::ZERO)
        );
    }
}
