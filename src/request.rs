//! Request descriptors.
//!
//! A [`Request`] is an immutable description of one logical call. It is built
//! with [`RequestBuilder`] and handed to the [`Client`](crate::Client) by
//! value; the engine derives its [fingerprint](Request::fingerprint) for
//! caching and de-duplication.

use crate::classify::ErrorClassifier;
use crate::plugin::Interceptor;
use crate::Error;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::form_urlencoded;

/// Scheduling priority of a request.
///
/// Critical requests bypass the queue entirely. The others wait in a lane of
/// their own and are drained highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Per-request caching behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Duration,
    /// Overrides the fingerprint as cache key.
    pub key: Option<String>,
}

impl CachePolicy {
    pub fn enabled(ttl: Duration) -> Self {
        Self {
            enabled: true,
            ttl,
            key: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ttl: Duration::ZERO,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Returns `true` if parameters of this method travel in the body rather than
/// in the URL.
pub(crate) fn params_in_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

fn is_supported(method: &Method) -> bool {
    [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::HEAD,
    ]
    .contains(method)
}

/// An immutable description of one logical call.
///
/// # Examples
///
/// ```
/// use convoy::{CachePolicy, Priority, Request};
/// use std::time::Duration;
///
/// let request = Request::get("/users")
///     .param("page", 2)
///     .param("sort", "name")
///     .priority(Priority::High)
///     .cache(CachePolicy::enabled(Duration::from_secs(60)))
///     .build()
///     .unwrap();
///
/// assert_eq!(request.fingerprint(), "GET /users?page=2&sort=name");
/// ```
#[derive(Clone)]
pub struct Request {
    method: Method,
    path: String,
    params: Vec<(String, Value)>,
    body: Option<Bytes>,
    headers: HeaderMap,
    priority: Priority,
    cache: Option<CachePolicy>,
    timeout: Option<Duration>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    fingerprint: String,
}

impl Request {
    pub fn builder(method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, path)
    }

    pub fn get(path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::DELETE, path)
    }

    pub fn head(path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::HEAD, path)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Parameters in insertion order.
    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The explicitly set body, if any. See [`effective_body`](Self::effective_body).
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The request's own cache policy; `None` means the client default applies.
    pub fn cache_policy(&self) -> Option<&CachePolicy> {
        self.cache.as_ref()
    }

    /// Receive timeout override.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub fn classifier(&self) -> Option<&Arc<dyn ErrorClassifier>> {
        self.classifier.as_ref()
    }

    /// Parameters that belong in the URL query string.
    pub fn query_params(&self) -> &[(String, Value)] {
        if params_in_body(&self.method) {
            &[]
        } else {
            &self.params
        }
    }

    /// The body as it goes on the wire.
    ///
    /// An explicit body wins. Otherwise body-carrying methods encode their
    /// parameters as a JSON object.
    pub fn effective_body(&self) -> Option<Bytes> {
        if self.body.is_some() {
            return self.body.clone();
        }
        if params_in_body(&self.method) && !self.params.is_empty() {
            let object: serde_json::Map<String, Value> = self.params.iter().cloned().collect();
            return serde_json::to_vec(&Value::Object(object))
                .ok()
                .map(Bytes::from);
        }
        None
    }

    /// Deterministic identity of this logical request.
    ///
    /// Built from method, path, query parameters sorted by key, and the
    /// effective body, so it covers exactly what goes on the wire. Headers,
    /// priority and cache policy do not participate.
    ///
    /// Keys and values are form-encoded and `?`/`#` in the path are escaped,
    /// so the first `?` and `#` always delimit the sections.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn compute_fingerprint(&self) -> String {
        let mut sorted: Vec<&(String, Value)> = self.query_params().iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let path = self
            .path
            .replace('%', "%25")
            .replace('?', "%3F")
            .replace('#', "%23");
        let mut out = format!("{} {}", self.method, path);
        if !sorted.is_empty() {
            let mut query = form_urlencoded::Serializer::new(String::new());
            for (key, value) in sorted {
                query.append_pair(key, &param_to_string(value));
            }
            out.push('?');
            out.push_str(&query.finish());
        }
        if let Some(body) = self.effective_body() {
            out.push('#');
            out.push_str(&String::from_utf8_lossy(&body));
        }
        out
    }
}

/// String form of a parameter value in a query string.
pub(crate) fn param_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("priority", &self.priority)
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .field("interceptors", &self.interceptors.len())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Builder for [`Request`].
pub struct RequestBuilder {
    method: Method,
    path: String,
    params: Vec<(String, Value)>,
    body: Option<Bytes>,
    headers: HeaderMap,
    priority: Priority,
    cache: Option<CachePolicy>,
    timeout: Option<Duration>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    error: Option<Error>,
}

impl RequestBuilder {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            priority: Priority::default(),
            cache: None,
            timeout: None,
            interceptors: Vec::new(),
            classifier: None,
            error: None,
        }
    }

    /// Appends a parameter. A later parameter with the same key is kept
    /// alongside the earlier one.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Adds a header. Invalid names or values surface from [`build`](Self::build).
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let name = HeaderName::try_from(name.as_ref());
        let value = HeaderValue::try_from(value.as_ref());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.fail(format!("Invalid header name: {}", e)),
            (_, Err(e)) => self.fail(format!("Invalid header value: {}", e)),
        }
        self
    }

    /// Sets a raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.body = Some(Bytes::from(bytes));
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Err(e) => self.fail(format!("Failed to serialize request: {}", e)),
        }
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    /// Overrides the receive timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an interceptor that runs after the client's interceptors.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Replaces the client's classifier for this request only.
    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(Error::configuration(message));
        }
    }

    /// Builds the request.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unsupported methods, an empty path,
    /// invalid headers or an unserializable JSON body.
    pub fn build(self) -> Result<Request, Error> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if !is_supported(&self.method) {
            return Err(Error::configuration(format!(
                "Unsupported method: {}",
                self.method
            )));
        }
        if self.path.trim().is_empty() {
            return Err(Error::configuration("Request path is empty"));
        }

        let mut request = Request {
            method: self.method,
            path: self.path,
            params: self.params,
            body: self.body,
            headers: self.headers,
            priority: self.priority,
            cache: self.cache,
            timeout: self.timeout,
            interceptors: self.interceptors,
            classifier: self.classifier,
            fingerprint: String::new(),
        };
        request.fingerprint = request.compute_fingerprint();
        Ok(request)
    }
}
