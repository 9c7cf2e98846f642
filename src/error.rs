//! Error types for orchestrated HTTP calls.
//!
//! Every call made through the [`Client`](crate::Client) resolves to either a
//! [`Response`](crate::Response) or one of the variants below. Raw transport
//! failures never cross the engine boundary: they are classified first and the
//! original failure is kept as the error's [`source`](std::error::Error::source).

use crate::transport::TransportError;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::sync::Arc;

/// The closed error taxonomy of the engine.
///
/// Errors are `Clone` because a single result is delivered to every caller
/// that was coalesced onto the same in-flight request.
///
/// # Examples
///
/// ```no_run
/// use convoy::{Client, Error, ErrorKind, Request};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// match client.execute(Request::get("/users/1").build()?).await {
///     Ok(response) => println!("{} bytes", response.data.len()),
///     Err(Error::BadResponse { status, raw_response, .. }) => {
///         eprintln!("HTTP error {}: {}", status, raw_response);
///     }
///     Err(e) if e.kind() == ErrorKind::Cancelled => eprintln!("cancelled"),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The connection could not be established in time.
    #[error("Connect timeout: {message}")]
    ConnectTimeout {
        /// Human readable description.
        message: String,
        /// The original transport failure.
        source: Option<Arc<TransportError>>,
    },

    /// Sending the request did not finish in time.
    #[error("Send timeout: {message}")]
    SendTimeout {
        /// Human readable description.
        message: String,
        /// The original transport failure.
        source: Option<Arc<TransportError>>,
    },

    /// The response was not received in time.
    #[error("Receive timeout: {message}")]
    ReceiveTimeout {
        /// Human readable description.
        message: String,
        /// The original transport failure.
        source: Option<Arc<TransportError>>,
    },

    /// The server answered with a status the acceptance predicate rejected.
    #[error("HTTP error {status}: {raw_response}")]
    BadResponse {
        /// The upstream status code.
        status: StatusCode,
        /// The raw response body, lossily decoded as UTF-8.
        raw_response: String,
        /// The response headers.
        headers: HeaderMap,
    },

    /// The request was cancelled before a result was delivered.
    #[error("Request cancelled")]
    Cancelled,

    /// The connection failed or was dropped.
    #[error("Connection error: {message}")]
    Connection {
        /// Human readable description.
        message: String,
        /// The original transport failure.
        source: Option<Arc<TransportError>>,
    },

    /// A response or cached payload could not be reinterpreted as the
    /// expected shape.
    #[error("Failed to parse payload: {message}")]
    Parse {
        /// The decoder's error message.
        message: String,
        /// The raw payload, lossily decoded as UTF-8.
        raw_response: String,
        /// The status of the response the payload came from, if any.
        status: Option<StatusCode>,
    },

    /// The engine was used incorrectly: closed engine, duplicate plugin name,
    /// empty batch, invalid URL or header, and the like.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A transport failure that matched no known category.
    #[error("Unknown error: {message}")]
    Unknown {
        /// Human readable description.
        message: String,
        /// The original transport failure.
        source: Option<Arc<TransportError>>,
    },
}

/// Discriminant of [`Error`], useful for matching and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectTimeout,
    SendTimeout,
    ReceiveTimeout,
    BadResponse,
    Cancelled,
    Connection,
    Parse,
    Configuration,
    Unknown,
}

impl ErrorKind {
    /// Stable tag used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectTimeout => "timeout-connect",
            ErrorKind::SendTimeout => "timeout-send",
            ErrorKind::ReceiveTimeout => "timeout-receive",
            ErrorKind::BadResponse => "bad-response",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Connection => "connection-error",
            ErrorKind::Parse => "parse-error",
            ErrorKind::Configuration => "configuration-error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Returns the taxonomy tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Error::SendTimeout { .. } => ErrorKind::SendTimeout,
            Error::ReceiveTimeout { .. } => ErrorKind::ReceiveTimeout,
            Error::BadResponse { .. } => ErrorKind::BadResponse,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Connection { .. } => ErrorKind::Connection,
            Error::Parse { .. } => ErrorKind::Parse,
            Error::ConfigurationError(_) => ErrorKind::Configuration,
            Error::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Returns `true` if this error is potentially retryable.
    ///
    /// Timeouts, connection errors, 5xx and 429 responses are considered
    /// retryable. Cancellation, parse and configuration errors are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use convoy::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::BadResponse {
    ///     status: StatusCode::INTERNAL_SERVER_ERROR,
    ///     raw_response: "Server error".to_string(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(err.is_retryable());
    ///
    /// assert!(!Error::Cancelled.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConnectTimeout { .. }
            | Error::SendTimeout { .. }
            | Error::ReceiveTimeout { .. }
            | Error::Connection { .. } => true,
            Error::BadResponse { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Error::Cancelled
            | Error::Parse { .. }
            | Error::ConfigurationError(_)
            | Error::Unknown { .. } => false,
        }
    }

    /// Returns `true` for any of the three timeout kinds.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::ConnectTimeout { .. } | Error::SendTimeout { .. } | Error::ReceiveTimeout { .. }
        )
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::BadResponse { status, .. } => Some(*status),
            Error::Parse { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::BadResponse { raw_response, .. } => Some(raw_response),
            Error::Parse { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns the response headers of a [`Error::BadResponse`].
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Error::BadResponse { headers, .. } => Some(headers),
            _ => None,
        }
    }

    /// Returns the transport failure this error was classified from.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Error::ConnectTimeout { source, .. }
            | Error::SendTimeout { source, .. }
            | Error::ReceiveTimeout { source, .. }
            | Error::Connection { source, .. }
            | Error::Unknown { source, .. } => source.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::ConfigurationError(message.into())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::ConfigurationError(format!("Invalid URL: {}", err))
    }
}

/// A specialized `Result` type for orchestrated calls.
pub type Result<T> = std::result::Result<T, Error>;
