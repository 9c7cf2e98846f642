//! Mapping of raw transport failures and HTTP statuses onto [`Error`].

use crate::transport::{reason, TransportError};
use crate::Error;
use http::StatusCode;
use std::sync::Arc;

/// Turns a transport failure into a classified [`Error`].
///
/// Classification is total: implementations must return some variant for
/// every input. A request may carry its own classifier, which then takes
/// precedence over the engine's.
///
/// # Examples
///
/// ```
/// use convoy::classify::{DefaultClassifier, ErrorClassifier};
/// use convoy::transport::TransportError;
/// use convoy::{Error, ErrorKind};
///
/// struct EverythingIsConnection;
///
/// impl ErrorClassifier for EverythingIsConnection {
///     fn classify(&self, failure: TransportError) -> Error {
///         Error::Connection { message: failure.to_string(), source: None }
///     }
/// }
///
/// let err = EverythingIsConnection.classify(TransportError::new("weird", "?"));
/// assert_eq!(err.kind(), ErrorKind::Connection);
///
/// let err = DefaultClassifier.classify(TransportError::new("weird", "?"));
/// assert_eq!(err.kind(), ErrorKind::Unknown);
/// ```
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, failure: TransportError) -> Error;
}

/// The engine's default mapping.
///
/// Looks at the failure's reason tag first, then at the underlying cause
/// (`reqwest::Error` or `std::io::Error`). Anything unrecognized is
/// [`Error::Unknown`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

#[derive(Clone, Copy)]
enum Category {
    ConnectTimeout,
    SendTimeout,
    ReceiveTimeout,
    Cancelled,
    Connection,
    Unknown,
}

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, failure: TransportError) -> Error {
        let category = match categorize_reason(failure.reason()) {
            Category::Unknown => categorize_cause(&failure),
            category => category,
        };

        let message = failure.message().to_string();
        let source = Some(Arc::new(failure));
        match category {
            Category::ConnectTimeout => Error::ConnectTimeout { message, source },
            Category::SendTimeout => Error::SendTimeout { message, source },
            Category::ReceiveTimeout => Error::ReceiveTimeout { message, source },
            Category::Cancelled => Error::Cancelled,
            Category::Connection => Error::Connection { message, source },
            Category::Unknown => Error::Unknown { message, source },
        }
    }
}

fn categorize_reason(tag: &str) -> Category {
    let normalized = tag.trim().to_ascii_lowercase().replace(['-', '_'], " ");
    match normalized.as_str() {
        reason::CONNECT_TIMEOUT | "connection timeout" | "timeout connect" => {
            Category::ConnectTimeout
        }
        reason::SEND_TIMEOUT | "timeout send" | "write timeout" => Category::SendTimeout,
        reason::RECEIVE_TIMEOUT | "timeout receive" | "read timeout" | "timeout" => {
            Category::ReceiveTimeout
        }
        reason::CANCELLED | "canceled" | "cancel" => Category::Cancelled,
        reason::CONNECTION
        | "connection error"
        | "connection refused"
        | "connection reset"
        | "dns" => Category::Connection,
        _ => Category::Unknown,
    }
}

fn categorize_cause(failure: &TransportError) -> Category {
    let Some(cause) = failure.cause() else {
        return Category::Unknown;
    };

    if let Some(err) = cause.downcast_ref::<reqwest::Error>() {
        return if err.is_timeout() && err.is_connect() {
            Category::ConnectTimeout
        } else if err.is_timeout() {
            Category::ReceiveTimeout
        } else if err.is_connect() {
            Category::Connection
        } else {
            Category::Unknown
        };
    }

    if let Some(err) = cause.downcast_ref::<std::io::Error>() {
        use std::io::ErrorKind::*;
        return match err.kind() {
            TimedOut => Category::ReceiveTimeout,
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected
            | BrokenPipe | AddrNotAvailable => Category::Connection,
            _ => Category::Unknown,
        };
    }

    Category::Unknown
}

/// The default acceptance predicate: any 2xx, plus 304 Not Modified.
pub fn default_accepts(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::NOT_MODIFIED
}
