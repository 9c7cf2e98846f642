//! The transport adapter boundary.
//!
//! The engine never speaks HTTP itself. It hands a fully resolved
//! [`OutgoingRequest`] to a [`Transport`] and receives either a
//! [`RawResponse`] or a [`TransportError`]. [`ReqwestTransport`] is the
//! default adapter.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::error::Error as StdError;
use std::fmt;
use std::time::{Duration, Instant};
use url::Url;

/// Boxed error used for arbitrary underlying causes.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Well-known transport failure reasons understood by the default classifier.
pub mod reason {
    pub const CONNECT_TIMEOUT: &str = "connect timeout";
    pub const SEND_TIMEOUT: &str = "send timeout";
    pub const RECEIVE_TIMEOUT: &str = "receive timeout";
    pub const CONNECTION: &str = "connection";
    pub const CANCELLED: &str = "cancelled";
    pub const OTHER: &str = "other";
}

/// Connect, send and receive timeouts applied to one transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub send: Duration,
    pub receive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            send: Duration::from_secs(30),
            receive: Duration::from_secs(30),
        }
    }
}

/// A request as it is handed to the transport, after URL resolution,
/// header merging and interceptor mutation.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeouts: Timeouts,
}

/// What the transport returns when the server answered, whatever the status.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub elapsed: Duration,
}

/// A transport-level failure.
///
/// `reason` is an implementation specific tag; see [`reason`] for the tags
/// the default classifier recognizes. The underlying error, if any, is kept
/// as the source so classifiers can inspect it.
#[derive(Debug)]
pub struct TransportError {
    reason: String,
    message: String,
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn connect_timeout(message: impl Into<String>) -> Self {
        Self::new(reason::CONNECT_TIMEOUT, message)
    }

    pub fn send_timeout(message: impl Into<String>) -> Self {
        Self::new(reason::SEND_TIMEOUT, message)
    }

    pub fn receive_timeout(message: impl Into<String>) -> Self {
        Self::new(reason::RECEIVE_TIMEOUT, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(reason::CONNECTION, message)
    }

    pub fn cancelled() -> Self {
        Self::new(reason::CANCELLED, "transport call was cancelled")
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying cause, for downcasting.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Performs the actual network I/O.
///
/// Implementations must not interpret status codes: every answer from the
/// server is a [`RawResponse`], only failures to obtain one are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError>;
}

/// [`Transport`] backed by a pooled `reqwest::Client`.
///
/// The connect timeout is fixed when the adapter is built. Each call is
/// bounded by its send and receive timeouts combined.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> crate::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                crate::Error::configuration(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { http_client })
    }

    /// Wraps an existing client, keeping its pool and settings.
    pub fn from_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        let start = Instant::now();

        let mut builder = self
            .http_client
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(request.timeouts.send + request.timeouts.receive);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(from_reqwest)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(from_reqwest)?;

        Ok(RawResponse {
            status,
            headers,
            body,
            elapsed: start.elapsed(),
        })
    }
}

fn from_reqwest(err: reqwest::Error) -> TransportError {
    let reason = if err.is_timeout() && err.is_connect() {
        reason::CONNECT_TIMEOUT
    } else if err.is_timeout() {
        reason::RECEIVE_TIMEOUT
    } else if err.is_connect() {
        reason::CONNECTION
    } else {
        reason::OTHER
    };
    TransportError::new(reason, err.to_string()).with_source(err)
}
