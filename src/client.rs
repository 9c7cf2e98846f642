//! The execution engine.
//!
//! [`Client`] turns [`Request`] descriptors into transport calls. For every
//! call it consults the cache, coalesces identical in-flight requests onto a
//! single transport call, routes the work through the priority scheduler,
//! classifies failures, refreshes the cache, and notifies plugins.
//! Use [`ClientBuilder`] to configure and create clients.

use crate::cache::CacheStore;
use crate::classify::{default_accepts, DefaultClassifier, ErrorClassifier};
use crate::config::{parse_header, ClientConfig, Settings};
use crate::plugin::{
    intercept_error, intercept_request, intercept_response, Interceptor, InterceptorId, Pipeline,
    Plugin, PluginInfo, PluginState,
};
use crate::request::{param_to_string, params_in_body, CachePolicy};
use crate::response::CachedResponse;
use crate::retry::{retry_after, RetryOnRetryable, RetryPredicate, RetryStrategy};
use crate::scheduler::{LaneCounts, Scheduler};
use crate::transport::{OutgoingRequest, RawResponse, ReqwestTransport, Timeouts, Transport};
use crate::{Error, Request, Response, Result};
use bytes::Bytes;
use futures::future::join_all;
use futures::FutureExt;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

/// Decides which statuses count as success.
pub type AcceptStatus = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;

/// The request execution engine.
///
/// Cloning is cheap; clones share the cache, queue, in-flight table and
/// plugins. Separate `Client` instances are fully isolated.
///
/// # Examples
///
/// ```no_run
/// use convoy::{CachePolicy, Client, Priority, Request, RetryStrategy};
/// use serde::Deserialize;
/// use std::time::Duration;
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
///     .timeout(Duration::from_secs(30))
///     .retry_strategy(RetryStrategy::Linear {
///         delay: Duration::from_millis(200),
///         max_retries: 2,
///     })
///     .build()?;
///
/// let request = Request::get("/users/123")
///     .priority(Priority::High)
///     .cache(CachePolicy::enabled(Duration::from_secs(60)))
///     .build()?;
/// let user = client.execute_as::<User>(request).await?;
/// println!("User: {} (cached: {})", user.data.name, user.from_cache);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    settings: RwLock<Arc<Settings>>,
    accepts: AcceptStatus,
    classifier: Arc<dyn ErrorClassifier>,
    retry_predicate: Box<dyn RetryPredicate>,
    cache: Arc<CacheStore<CachedResponse>>,
    scheduler: Arc<Scheduler>,
    pipeline: Pipeline,
    in_flight: Mutex<InFlightTable>,
    closed: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

type Waiter = oneshot::Sender<Result<Response>>;

#[derive(Default)]
struct InFlightTable {
    records: HashMap<String, InFlight>,
    next_id: u64,
}

/// One live transport execution and everyone waiting for it.
struct InFlight {
    id: u64,
    waiters: Vec<Waiter>,
}

/// Where a successful response should be cached.
#[derive(Clone)]
struct CacheTarget {
    key: String,
    ttl: Duration,
}

/// Read-only snapshot of engine activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStatus {
    /// Distinct fingerprints with a live execution.
    pub in_flight: usize,
    pub queued: LaneCounts,
    pub draining: bool,
    pub cache_size: usize,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Executes a request and returns the raw payload.
    ///
    /// Resolves to a success [`Response`] or a classified [`Error`]. Callers
    /// whose requests share a fingerprint with a running execution receive
    /// that execution's result instead of issuing a second transport call.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.ensure_open()?;
        let request = Arc::new(request);
        self.inner.pipeline.request_started(&request).await;
        let result = self.admit(&request, true).await;
        self.report(&request, result.as_ref()).await;
        result
    }

    /// Executes a request and decodes its JSON payload as `T`.
    ///
    /// An empty body decodes as JSON `null`, so `()` and `Option<_>` work for
    /// bodiless responses. If a cached payload does not decode, the entry is
    /// evicted and the request is issued again within the same logical call.
    pub async fn execute_as<T>(&self, request: Request) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        self.ensure_open()?;
        let request = Arc::new(request);
        self.inner.pipeline.request_started(&request).await;
        let result = self.admit_decoded::<T>(&request).await;
        self.report(&request, result.as_ref().map(|(response, _)| response))
            .await;
        result.map(|(response, data)| response.map(|_| data))
    }

    /// Executes every request concurrently and returns results in input order.
    ///
    /// Each slot succeeds or fails independently.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty batch.
    pub async fn execute_batch(&self, requests: Vec<Request>) -> Result<Vec<Result<Response>>> {
        self.ensure_open()?;
        if requests.is_empty() {
            return Err(Error::configuration("Batch must contain at least one request"));
        }
        Ok(join_all(requests.into_iter().map(|request| self.execute(request))).await)
    }

    /// Executes requests in consecutive groups of `max_concurrency`, each
    /// group concurrently, and returns results in input order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty input or a zero bound.
    pub async fn execute_concurrent(
        &self,
        requests: Vec<Request>,
        max_concurrency: usize,
    ) -> Result<Vec<Result<Response>>> {
        self.ensure_open()?;
        if max_concurrency == 0 {
            return Err(Error::configuration("max_concurrency must be positive"));
        }
        if requests.is_empty() {
            return Err(Error::configuration("Batch must contain at least one request"));
        }

        let mut results = Vec::with_capacity(requests.len());
        let mut remaining = requests;
        while !remaining.is_empty() {
            let rest = remaining.split_off(max_concurrency.min(remaining.len()));
            let group = std::mem::replace(&mut remaining, rest);
            results.extend(join_all(group.into_iter().map(|request| self.execute(request))).await);
        }
        Ok(results)
    }

    /// Cancels the execution matching `request`'s fingerprint.
    ///
    /// Queued copies are dropped and every waiter receives
    /// [`Error::Cancelled`]. A transport call already under way is not
    /// interrupted; its result is discarded. Returns `true` if anything was
    /// cancelled.
    pub fn cancel(&self, request: &Request) -> bool {
        let fingerprint = request.fingerprint();
        let dropped = self.inner.scheduler.remove(fingerprint);
        let record = self.inner.in_flight.lock().records.remove(fingerprint);

        let cancelled = dropped > 0 || record.is_some();
        if let Some(record) = record {
            notify(record.waiters, Err(Error::Cancelled));
        }
        if cancelled {
            tracing::info!(fingerprint = %fingerprint, dropped = dropped, "Request cancelled");
        }
        cancelled
    }

    /// Cancels every in-flight execution and empties every lane.
    ///
    /// Returns the number of executions cancelled.
    pub fn cancel_all(&self) -> usize {
        let dropped = self.inner.scheduler.clear();
        let records: Vec<InFlight> = self
            .inner
            .in_flight
            .lock()
            .records
            .drain()
            .map(|(_, record)| record)
            .collect();

        let cancelled = records.len();
        for record in records {
            notify(record.waiters, Err(Error::Cancelled));
        }
        tracing::info!(cancelled = cancelled, dropped = dropped, "All requests cancelled");
        cancelled
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            in_flight: self.inner.in_flight.lock().records.len(),
            queued: self.inner.scheduler.queued(),
            draining: self.inner.scheduler.is_draining(),
            cache_size: self.inner.cache.len(),
        }
    }

    /// Registers a plugin, initializes it and installs its interceptors.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the name is taken or initialization
    /// fails.
    pub async fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.ensure_open()?;
        self.inner.pipeline.register(plugin).await
    }

    /// Removes a plugin's interceptors, disposes it and forgets it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no plugin has that name.
    pub async fn unregister_plugin(&self, name: &str) -> Result<()> {
        self.inner.pipeline.unregister(name).await
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.inner.pipeline.plugin_info()
    }

    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.inner.pipeline.plugin_state(name)
    }

    /// Installs an interceptor that applies to every request.
    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) -> InterceptorId {
        self.inner.pipeline.add_interceptor(interceptor)
    }

    pub fn remove_interceptor(&self, id: InterceptorId) -> bool {
        self.inner.pipeline.remove_interceptor(id)
    }

    /// Drops the cache entry stored under `key` (a fingerprint or an
    /// explicit cache key).
    pub fn invalidate_cache(&self, key: &str) -> bool {
        self.inner.cache.invalidate(key)
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Re-reads the configuration surface. Work already started keeps the
    /// settings it started with.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid base URL or header.
    pub fn reconfigure(&self, config: &ClientConfig) -> Result<()> {
        let settings = Settings::from_config(config)?;
        *self.inner.settings.write() = Arc::new(settings);
        tracing::info!(base_url = ?config.base_url, "Client reconfigured");
        Ok(())
    }

    /// Cancels all work, disposes every plugin and closes the client.
    ///
    /// Later calls are rejected with a configuration error.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_all();
        for name in self.inner.pipeline.plugin_names() {
            if let Err(e) = self.inner.pipeline.unregister(&name).await {
                tracing::warn!(plugin = %name, error = %e, "Failed to unregister plugin");
            }
        }
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }
        self.inner.cache.clear();
        tracing::info!("Client shut down");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::configuration("Client has been shut down"));
        }
        Ok(())
    }

    fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.inner.settings.read())
    }

    fn cache_target(&self, request: &Request, settings: &Settings) -> Option<CacheTarget> {
        let policy: &CachePolicy = request.cache_policy().unwrap_or(&settings.cache);
        if !policy.enabled || policy.ttl.is_zero() {
            return None;
        }
        Some(CacheTarget {
            key: policy
                .key
                .clone()
                .unwrap_or_else(|| request.fingerprint().to_string()),
            ttl: policy.ttl,
        })
    }

    /// Fires the completion hook matching `result`.
    async fn report(&self, request: &Request, result: std::result::Result<&Response, &Error>) {
        match result {
            Ok(response) => {
                self.inner
                    .pipeline
                    .request_completed(request, response)
                    .await
            }
            Err(error) => self.inner.pipeline.request_failed(request, error).await,
        }
    }

    /// [`admit`](Self::admit) followed by decoding, refetching once when a
    /// cached payload no longer decodes.
    async fn admit_decoded<T>(&self, request: &Arc<Request>) -> Result<(Response, T)>
    where
        T: DeserializeOwned,
    {
        let response = self.admit(request, true).await?;
        let err = match decode::<T>(&response.data) {
            Ok(data) => return Ok((response, data)),
            Err(e) => e,
        };

        if !response.from_cache {
            tracing::error!(
                error = %err,
                raw_response = %String::from_utf8_lossy(&response.raw_body),
                "Failed to deserialize response"
            );
            return Err(parse_error(err, &response));
        }

        if let Some(target) = self.cache_target(request, &self.settings()) {
            tracing::debug!(
                key = %target.key,
                error = %err,
                "Cached payload did not decode, evicting"
            );
            self.inner.cache.invalidate(&target.key);
        }
        let fresh = self.admit(request, false).await?;
        match decode::<T>(&fresh.data) {
            Ok(data) => Ok((fresh, data)),
            Err(e) => Err(parse_error(e, &fresh)),
        }
    }

    /// Cache lookup, coalescing and scheduling.
    ///
    /// Lookup and in-flight registration happen under one lock so two
    /// callers with the same fingerprint cannot both start an execution.
    async fn admit(&self, request: &Arc<Request>, read_cache: bool) -> Result<Response> {
        let settings = self.settings();
        let target = self.cache_target(request, &settings);
        let fingerprint = request.fingerprint();
        let (tx, rx) = oneshot::channel();

        let leader = {
            let mut table = self.inner.in_flight.lock();

            if let (true, Some(target)) = (read_cache, &target) {
                if let Some(entry) = self.inner.cache.get(&target.key) {
                    tracing::debug!(fingerprint = %fingerprint, key = %target.key, "Cache hit");
                    return Ok(Response::from_cache(&entry));
                }
            }

            match table.records.get_mut(fingerprint) {
                Some(record) => {
                    record.waiters.push(tx);
                    tracing::debug!(
                        fingerprint = %fingerprint,
                        waiters = record.waiters.len(),
                        "Coalesced onto in-flight request"
                    );
                    None
                }
                None => {
                    let id = table.next_id;
                    table.next_id += 1;
                    table.records.insert(
                        fingerprint.to_string(),
                        InFlight {
                            id,
                            waiters: vec![tx],
                        },
                    );
                    Some(id)
                }
            }
        };

        if let Some(id) = leader {
            tracing::debug!(
                fingerprint = %fingerprint,
                priority = ?request.priority(),
                "Scheduling request"
            );
            let job = self
                .clone()
                .run(Arc::clone(request), settings, target, id)
                .boxed();
            self.inner
                .scheduler
                .submit(request.priority(), fingerprint.to_string(), job);
        }

        rx.await.unwrap_or(Err(Error::Cancelled))
    }

    /// The scheduled unit of work for one in-flight record.
    async fn run(
        self,
        request: Arc<Request>,
        settings: Arc<Settings>,
        target: Option<CacheTarget>,
        id: u64,
    ) {
        let result = match AssertUnwindSafe(self.perform(&request, &settings, id))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    fingerprint = %request.fingerprint(),
                    "Request execution panicked"
                );
                Err(Error::Unknown {
                    message: "request execution panicked".to_string(),
                    source: None,
                })
            }
        };
        self.finish(request.fingerprint(), id, result, target);
    }

    /// Returns `true` while record `id` still owns `fingerprint`.
    fn is_current(&self, fingerprint: &str, id: u64) -> bool {
        self.inner
            .in_flight
            .lock()
            .records
            .get(fingerprint)
            .is_some_and(|record| record.id == id)
    }

    /// Caches a success and hands the result to every waiter, unless the
    /// record was cancelled meanwhile.
    fn finish(
        &self,
        fingerprint: &str,
        id: u64,
        result: Result<Response>,
        target: Option<CacheTarget>,
    ) {
        let waiters = {
            let mut table = self.inner.in_flight.lock();
            match table.records.get(fingerprint) {
                Some(record) if record.id == id => {}
                _ => {
                    tracing::debug!(
                        fingerprint = %fingerprint,
                        "Discarding result of cancelled request"
                    );
                    return;
                }
            }

            if let (Ok(response), Some(target)) = (&result, target) {
                self.inner
                    .cache
                    .set(target.key, CachedResponse::from(response), target.ttl);
            }
            table
                .records
                .remove(fingerprint)
                .map(|record| record.waiters)
                .unwrap_or_default()
        };
        notify(waiters, result);
    }

    async fn perform(&self, request: &Request, settings: &Settings, id: u64) -> Result<Response> {
        let mut outgoing = prepare(request, settings)?;

        let mut chain = self.inner.pipeline.interceptors();
        chain.extend(request.interceptors().iter().cloned());

        let result = match intercept_request(&chain, &mut outgoing).await {
            Ok(()) => {
                self.send_with_retry(request, id, &settings.retry_strategy, &chain, &outgoing)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(error) = &result {
            intercept_error(&chain, &outgoing, error).await;
        }
        result
    }

    async fn send_with_retry(
        &self,
        request: &Request,
        id: u64,
        strategy: &RetryStrategy,
        chain: &[Arc<dyn Interceptor>],
        outgoing: &OutgoingRequest,
    ) -> Result<Response> {
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            if !self.is_current(request.fingerprint(), id) {
                tracing::debug!(
                    fingerprint = %request.fingerprint(),
                    attempts = attempt,
                    "Request cancelled, not sending"
                );
                return Err(Error::Cancelled);
            }
            attempt += 1;

            tracing::debug!(
                method = %outgoing.method,
                url = %outgoing.url,
                attempt = attempt,
                "Executing HTTP request"
            );

            let result = match self.inner.transport.send(outgoing.clone()).await {
                Ok(mut raw) => match intercept_response(chain, outgoing, &mut raw).await {
                    Ok(()) => self.evaluate(raw, start_time.elapsed(), attempt),
                    Err(e) => Err(e),
                },
                Err(failure) => {
                    let classifier = request.classifier().unwrap_or(&self.inner.classifier);
                    Err(classifier.classify(failure))
                }
            };

            let error = match result {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            tracing::warn!(
                error = %error,
                kind = %error.kind(),
                attempt = attempt,
                method = %request.method(),
                path = %request.path(),
                "Request failed"
            );

            if matches!(error, Error::Cancelled | Error::ConfigurationError(_))
                || !self.inner.retry_predicate.should_retry(&error, attempt)
            {
                return Err(error);
            }

            let Some(delay) = strategy.delay_for_attempt(attempt) else {
                if attempt > 1 {
                    tracing::warn!(attempts = attempt, "Retries exhausted");
                }
                return Err(error);
            };
            let delay = retry_after(&error)
                .map(|requested| requested.min(strategy.delay_ceiling()))
                .unwrap_or(delay);

            if !self.is_current(request.fingerprint(), id) {
                return Err(error);
            }
            tracing::info!(
                delay_ms = delay.as_millis(),
                attempt = attempt,
                "Retrying request after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Applies the acceptance predicate to a raw response.
    fn evaluate(&self, raw: RawResponse, latency: Duration, attempts: usize) -> Result<Response> {
        let status = raw.status;

        tracing::info!(
            status = status.as_u16(),
            latency_ms = latency.as_millis(),
            attempts = attempts,
            "Received HTTP response"
        );

        if (self.inner.accepts)(status) {
            return Ok(Response::from_transport(
                status,
                raw.headers,
                raw.body,
                latency,
                attempts,
            ));
        }

        let raw_response = String::from_utf8_lossy(&raw.body).into_owned();
        if status.is_client_error() {
            tracing::error!(
                status = status.as_u16(),
                response = %raw_response,
                "Client error (4xx)"
            );
        } else if status.is_server_error() {
            tracing::warn!(
                status = status.as_u16(),
                response = %raw_response,
                "Server error (5xx)"
            );
        }

        Err(Error::BadResponse {
            status,
            raw_response,
            headers: raw.headers,
        })
    }

    /// Makes a GET request and decodes the JSON response.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use convoy::Client;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct User { name: String }
    ///
    /// # async fn example() -> Result<(), convoy::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    ///
    /// let user: convoy::Response<User> = client.get("/users/123").await?;
    /// println!("User: {}", user.data.name);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.execute_as(Request::get(path).build()?).await
    }

    /// Makes a POST request with a JSON body.
    pub async fn post<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.execute_as(Request::post(path).json(body).build()?).await
    }

    /// Makes a PUT request with a JSON body.
    pub async fn put<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.execute_as(Request::put(path).json(body).build()?).await
    }

    /// Makes a DELETE request.
    pub async fn delete<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.execute_as(Request::delete(path).build()?).await
    }

    /// Makes a PATCH request with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.execute_as(Request::patch(path).json(body).build()?).await
    }
}

fn notify(waiters: Vec<Waiter>, result: Result<Response>) {
    for waiter in waiters {
        // A waiter that went away no longer needs the result.
        let _ = waiter.send(result.clone());
    }
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> serde_json::Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_slice(b"null")
    } else {
        serde_json::from_slice(body)
    }
}

fn parse_error(err: serde_json::Error, response: &Response) -> Error {
    Error::Parse {
        message: err.to_string(),
        raw_response: String::from_utf8_lossy(&response.raw_body).into_owned(),
        status: Some(response.status),
    }
}

/// Resolves URL, headers, body and timeouts for the transport.
fn prepare(request: &Request, settings: &Settings) -> Result<OutgoingRequest> {
    let mut url = resolve_url(settings.base_url.as_ref(), request.path())?;
    let query = request.query_params();
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, &param_to_string(value));
        }
    }

    let mut headers = settings.default_headers.clone();
    for (name, value) in request.headers() {
        headers.insert(name.clone(), value.clone());
    }

    let body = request.effective_body();
    let params_as_json = request.body().is_none() && params_in_body(request.method());
    if body.is_some() && params_as_json && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    Ok(OutgoingRequest {
        method: request.method().clone(),
        url,
        headers,
        body,
        timeouts: Timeouts {
            receive: request.timeout().unwrap_or(settings.timeouts.receive),
            ..settings.timeouts
        },
    })
}

/// Joins `path` onto the base URL's path; absolute URLs are used as-is.
fn resolve_url(base: Option<&Url>, path: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(path) {
        if url.has_host() {
            return Ok(url);
        }
    }

    let base = base.ok_or_else(|| {
        Error::configuration(format!("No base URL configured for relative path '{}'", path))
    })?;
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    let mut url = base.clone();
    url.set_path(&format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    ));
    url.set_query(query);
    url.set_fragment(None);
    Ok(url)
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use convoy::{ClientBuilder, ClientConfig, RetryStrategy};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), convoy::Error> {
/// let config = ClientConfig::from_json(r#"{"base_url": "https://api.example.com"}"#)?;
/// let client = ClientBuilder::new()
///     .config(&config)?
///     .default_header("User-Agent", "my-app/1.0")?
///     .accept_status(|status| status.is_success())
///     .pacing(Duration::from_millis(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    settings: Settings,
    transport: Option<Arc<dyn Transport>>,
    accepts: Option<AcceptStatus>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    retry_predicate: Option<Box<dyn RetryPredicate>>,
    pacing: Duration,
    sweep_interval: Duration,
    hook_timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            transport: None,
            accepts: None,
            classifier: None,
            retry_predicate: None,
            pacing: Duration::from_millis(10),
            sweep_interval: Duration::from_secs(1),
            hook_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Applies a full configuration, replacing earlier settings.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid base URL or header.
    pub fn config(mut self, config: &ClientConfig) -> Result<Self> {
        self.settings = Settings::from_config(config)?;
        Ok(self)
    }

    /// Sets the base URL relative request paths are resolved against.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.settings.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a header sent with every request unless the request overrides it.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.settings.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the default receive timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeouts.receive = timeout;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.settings.timeouts = timeouts;
        self
    }

    /// Cache policy for requests that carry none.
    pub fn default_cache(mut self, policy: CachePolicy) -> Self {
        self.settings.cache = policy;
        self
    }

    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.settings.retry_strategy = strategy;
        self
    }

    /// Sets a custom retry predicate.
    ///
    /// By default, failures are retried based on [`Error::is_retryable`].
    pub fn retry_predicate(mut self, predicate: Box<dyn RetryPredicate>) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    /// Replaces the reqwest-backed transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets which statuses count as success. Defaults to 2xx and 304.
    pub fn accept_status<F>(mut self, accepts: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.accepts = Some(Arc::new(accepts));
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Pause after each queued execution.
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn cache_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Bounds each plugin hook; `None` waits indefinitely.
    pub fn plugin_hook_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Builds the configured `Client`.
    ///
    /// The cache sweeper starts if a Tokio runtime is available; otherwise
    /// entries expire lazily on read.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero sweep interval or if the default
    /// transport cannot be built.
    pub fn build(self) -> Result<Client> {
        if self.sweep_interval.is_zero() {
            return Err(Error::configuration("Cache sweep interval must be positive"));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.settings.timeouts.connect)?),
        };

        let cache = Arc::new(CacheStore::new());
        let sweeper = cache.spawn_sweeper(self.sweep_interval);

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                settings: RwLock::new(Arc::new(self.settings)),
                accepts: self.accepts.unwrap_or_else(|| Arc::new(default_accepts)),
                classifier: self
                    .classifier
                    .unwrap_or_else(|| Arc::new(DefaultClassifier)),
                retry_predicate: self
                    .retry_predicate
                    .unwrap_or_else(|| Box::new(RetryOnRetryable)),
                cache,
                scheduler: Arc::new(Scheduler::new(self.pacing)),
                pipeline: Pipeline::new(self.hook_timeout),
                in_flight: Mutex::new(InFlightTable::default()),
                closed: AtomicBool::new(false),
                sweeper: Mutex::new(sweeper),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
