//! Response wrapper that preserves both the payload and the transaction details.
//!
//! The engine itself is payload-agnostic and produces `Response<Bytes>`.
//! [`Client::execute_as`](crate::Client::execute_as) decodes the payload once
//! and hands back a `Response<T>` with the same metadata.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A successful result.
///
/// # Examples
///
/// ```no_run
/// use convoy::{Client, Request};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), convoy::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let response = client.get::<User>("/users/123").await?;
///
/// println!("User: {}", response.data.name);
/// println!("Request took {:?}", response.latency);
/// println!("Served from cache: {}", response.from_cache);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T = Bytes> {
    /// The payload.
    pub data: T,

    /// The raw response body.
    pub raw_body: Bytes,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time spent on the transport, across all retry attempts.
    ///
    /// Zero for cache-origin responses.
    pub latency: Duration,

    /// The number of transport attempts made. Zero when served from cache.
    pub attempts: usize,

    /// `true` if this response was served from the cache store.
    pub from_cache: bool,
}

impl Response<Bytes> {
    pub(crate) fn from_transport(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        latency: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            data: body.clone(),
            raw_body: body,
            status,
            headers,
            latency,
            attempts,
            from_cache: false,
        }
    }

    pub(crate) fn from_cache(entry: &CachedResponse) -> Self {
        Self {
            data: entry.body.clone(),
            raw_body: entry.body.clone(),
            status: entry.status,
            headers: entry.headers.clone(),
            latency: Duration::ZERO,
            attempts: 0,
            from_cache: true,
        }
    }

    /// Returns the payload lossily decoded as UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

impl<T> Response<T> {
    /// Maps the payload to a different type, keeping the metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// # use convoy::Response;
    /// # use bytes::Bytes;
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response {
    ///     data: 42,
    ///     raw_body: Bytes::from_static(b"42"),
    ///     status: StatusCode::OK,
    ///     headers: HeaderMap::new(),
    ///     latency: Duration::from_millis(100),
    ///     attempts: 1,
    ///     from_cache: false,
    /// };
    ///
    /// let string_response = response.map(|n| n.to_string());
    /// assert_eq!(string_response.data, "42");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            from_cache: self.from_cache,
        }
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// What the cache store keeps for a successful response.
#[derive(Debug, Clone)]
pub(crate) struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl From<&Response<Bytes>> for CachedResponse {
    fn from(response: &Response<Bytes>) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.raw_body.clone(),
        }
    }
}
