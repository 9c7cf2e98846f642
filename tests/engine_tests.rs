//! Engine behaviour against a scripted in-process transport.

use async_trait::async_trait;
use bytes::Bytes;
use convoy::classify::ErrorClassifier;
use convoy::plugin::HookResult;
use convoy::transport::{OutgoingRequest, RawResponse};
use convoy::{
    CachePolicy, Client, ClientConfig, Error, ErrorKind, Interceptor, Plugin, PluginState,
    Priority, Request, Response, RetryStrategy, Transport, TransportError,
};
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

type Handler = Box<dyn Fn(&OutgoingRequest, usize) -> Result<RawResponse, TransportError> + Send + Sync>;

/// Answers from a handler and records every call. Calls to `/block` wait
/// until [`release`](Scripted::release) is called.
struct Scripted {
    handler: Handler,
    delay: Duration,
    gate: Notify,
    calls: Mutex<Vec<OutgoingRequest>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Scripted {
    fn new() -> Arc<Self> {
        Self::with_handler(Duration::ZERO, |request, _| Ok(echo(request)))
    }

    fn with_handler<F>(delay: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(&OutgoingRequest, usize) -> Result<RawResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delay,
            gate: Notify::new(),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn release(&self) {
        self.gate.notify_one();
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn paths(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|call| call.url.path().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push(request.clone());
            calls.len()
        };
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if request.url.path() == "/block" {
            self.gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        (self.handler)(&request, call)
    }
}

fn respond(status: u16, body: impl Into<Bytes>) -> RawResponse {
    RawResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        body: body.into(),
        elapsed: Duration::ZERO,
    }
}

fn echo(request: &OutgoingRequest) -> RawResponse {
    respond(200, format!("{{\"path\":\"{}\"}}", request.url.path()))
}

fn client(transport: &Arc<Scripted>) -> Client {
    Client::builder()
        .base_url("http://api.test")
        .unwrap()
        .transport(transport.clone())
        .pacing(Duration::ZERO)
        .build()
        .unwrap()
}

fn get(path: &str) -> Request {
    Request::get(path).build().unwrap()
}

fn with_priority(path: &str, priority: Priority) -> Request {
    Request::get(path).priority(priority).build().unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn spawn_execute(
    client: &Client,
    request: Request,
) -> tokio::task::JoinHandle<convoy::Result<Response>> {
    let client = client.clone();
    tokio::spawn(async move { client.execute(request).await })
}

#[tokio::test]
async fn test_identical_requests_share_one_call() {
    let transport = Scripted::with_handler(Duration::from_millis(50), |request, _| Ok(echo(request)));
    let client = client(&transport);

    let results = futures::future::join_all((0..5).map(|_| {
        client.execute(
            Request::get("/users")
                .param("page", 1)
                .param("sort", "name")
                .build()
                .unwrap(),
        )
    }))
    .await;

    assert_eq!(transport.call_count(), 1);
    for result in results {
        assert_eq!(result.unwrap().text(), "{\"path\":\"/users\"}");
    }
    assert_eq!(client.status().in_flight, 0);
}

#[tokio::test]
async fn test_coalesced_callers_share_failure() {
    let transport = Scripted::with_handler(Duration::from_millis(20), |_, _| {
        Ok(respond(503, "down"))
    });
    let client = client(&transport);

    let (a, b) = tokio::join!(client.execute(get("/x")), client.execute(get("/x")));

    assert_eq!(transport.call_count(), 1);
    assert_eq!(a.unwrap_err().status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(b.unwrap_err().raw_response(), Some("down"));
}

#[tokio::test]
async fn test_different_fingerprints_do_not_coalesce() {
    let transport = Scripted::new();
    let client = client(&transport);

    let post = |id: u32| {
        Request::post("/items")
            .json(&serde_json::json!({ "id": id }))
            .build()
            .unwrap()
    };
    let (a, b) = tokio::join!(client.execute(post(1)), client.execute(post(2)));
    a.unwrap();
    b.unwrap();
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cache_entry_expires_after_ttl() {
    let transport = Scripted::new();
    let client = client(&transport);
    let request = || {
        Request::get("/profile")
            .cache(CachePolicy::enabled(Duration::from_secs(60)))
            .build()
            .unwrap()
    };

    assert!(!client.execute(request()).await.unwrap().from_cache);
    assert!(client.execute(request()).await.unwrap().from_cache);
    assert_eq!(transport.call_count(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;

    assert!(!client.execute(request()).await.unwrap().from_cache);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let transport = Scripted::with_handler(Duration::ZERO, |request, call| {
        if call == 1 {
            Ok(respond(500, "boom"))
        } else {
            Ok(echo(request))
        }
    });
    let client = client(&transport);
    let request = || {
        Request::get("/flaky")
            .cache(CachePolicy::enabled(Duration::from_secs(60)))
            .build()
            .unwrap()
    };

    assert!(client.execute(request()).await.is_err());
    let second = client.execute(request()).await.unwrap();
    assert!(!second.from_cache);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_explicit_cache_key_and_invalidation() {
    let transport = Scripted::new();
    let client = client(&transport);
    let request = |path: &str| {
        Request::get(path)
            .cache(CachePolicy::enabled(Duration::from_secs(60)).with_key("me"))
            .build()
            .unwrap()
    };

    client.execute(request("/users/me")).await.unwrap();
    // Different fingerprint, same explicit key.
    let aliased = client.execute(request("/users/42")).await.unwrap();
    assert!(aliased.from_cache);
    assert_eq!(aliased.text(), "{\"path\":\"/users/me\"}");

    assert!(client.invalidate_cache("me"));
    assert!(!client.execute(request("/users/42")).await.unwrap().from_cache);

    client.clear_cache();
    assert_eq!(client.status().cache_size, 0);
}

#[tokio::test]
async fn test_undecodable_cached_payload_is_refetched() {
    let transport = Scripted::with_handler(Duration::ZERO, |_, call| {
        if call == 1 {
            Ok(respond(200, "not json"))
        } else {
            Ok(respond(200, "{\"id\":7}"))
        }
    });
    let client = client(&transport);
    let request = || {
        Request::get("/thing")
            .cache(CachePolicy::enabled(Duration::from_secs(60)))
            .build()
            .unwrap()
    };

    client.execute(request()).await.unwrap();
    let decoded = client
        .execute_as::<serde_json::Value>(request())
        .await
        .unwrap();

    assert!(!decoded.from_cache);
    assert_eq!(decoded.data["id"], 7);
    assert_eq!(transport.call_count(), 2);
}

/// Records lifecycle hooks without touching traffic.
#[derive(Default)]
struct Ledger {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl Plugin for Ledger {
    fn name(&self) -> &str {
        "ledger"
    }

    async fn on_request_start(&self, request: &Request) -> HookResult {
        self.events.lock().push(format!("start {}", request.path()));
        Ok(())
    }

    async fn on_request_complete(&self, _request: &Request, response: &Response) -> HookResult {
        self.events
            .lock()
            .push(format!("complete {}", response.status.as_u16()));
        Ok(())
    }

    async fn on_request_error(&self, _request: &Request, error: &Error) -> HookResult {
        self.events.lock().push(format!("error {}", error.kind()));
        Ok(())
    }
}

#[tokio::test]
async fn test_refetch_after_bad_cache_fires_hooks_once() {
    let transport = Scripted::with_handler(Duration::ZERO, |_, call| {
        if call == 1 {
            Ok(respond(200, "not json"))
        } else {
            Ok(respond(200, "{\"id\":7}"))
        }
    });
    let client = client(&transport);
    let request = || {
        Request::get("/thing")
            .cache(CachePolicy::enabled(Duration::from_secs(60)))
            .build()
            .unwrap()
    };
    client.execute(request()).await.unwrap();

    let ledger = Arc::new(Ledger::default());
    client.register_plugin(ledger.clone()).await.unwrap();
    let decoded = client
        .execute_as::<serde_json::Value>(request())
        .await
        .unwrap();

    assert_eq!(decoded.data["id"], 7);
    assert_eq!(*ledger.events.lock(), vec!["start /thing", "complete 200"]);

    let cached = client
        .execute_as::<serde_json::Value>(request())
        .await
        .unwrap();
    assert!(cached.from_cache);
    assert_eq!(
        *ledger.events.lock(),
        vec!["start /thing", "complete 200", "start /thing", "complete 200"]
    );
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_lanes_drain_highest_first() {
    let transport = Scripted::new();
    let client = client(&transport);

    let blocker = spawn_execute(&client, get("/block"));
    wait_until(|| transport.call_count() == 1).await;

    let low = spawn_execute(&client, with_priority("/low", Priority::Low));
    let normal = spawn_execute(&client, with_priority("/normal", Priority::Normal));
    let high = spawn_execute(&client, with_priority("/high", Priority::High));
    wait_until(|| client.status().queued.total() == 3).await;

    let status = client.status();
    assert_eq!(status.in_flight, 4);
    assert!(status.draining);
    assert_eq!((status.queued.high, status.queued.normal, status.queued.low), (1, 1, 1));

    transport.release();
    for handle in [blocker, low, normal, high] {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(transport.paths(), vec!["/block", "/high", "/normal", "/low"]);
    wait_until(|| !client.status().draining).await;
}

#[tokio::test]
async fn test_critical_bypasses_queue() {
    let transport = Scripted::new();
    let client = client(&transport);

    let blocker = spawn_execute(&client, get("/block"));
    wait_until(|| transport.call_count() == 1).await;
    let queued = spawn_execute(&client, with_priority("/high", Priority::High));
    wait_until(|| client.status().queued.high == 1).await;

    let urgent = tokio::time::timeout(
        Duration::from_secs(5),
        client.execute(with_priority("/urgent", Priority::Critical)),
    )
    .await
    .expect("critical request waited for the queue")
    .unwrap();

    assert_eq!(urgent.text(), "{\"path\":\"/urgent\"}");
    assert!(!blocker.is_finished());
    assert_eq!(client.status().queued.high, 1);

    transport.release();
    blocker.await.unwrap().unwrap();
    queued.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_batch_preserves_order_and_isolates_failures() {
    let transport = Scripted::with_handler(Duration::ZERO, |request, _| {
        if request.url.path() == "/fail" {
            Ok(respond(500, "nope"))
        } else {
            Ok(echo(request))
        }
    });
    let client = client(&transport);

    let results = client
        .execute_batch(vec![get("/a"), get("/fail"), get("/b")])
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().text(), "{\"path\":\"/a\"}");
    assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::BadResponse);
    assert_eq!(results[2].as_ref().unwrap().text(), "{\"path\":\"/b\"}");
}

#[tokio::test]
async fn test_batch_rejects_empty_input() {
    let client = client(&Scripted::new());

    let err = client.execute_batch(Vec::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = client.execute_concurrent(vec![get("/a")], 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = client.execute_concurrent(Vec::new(), 2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_concurrent_execution_is_bounded() {
    let transport = Scripted::with_handler(Duration::from_millis(20), |request, _| Ok(echo(request)));
    let client = client(&transport);

    // Critical requests skip the drain loop, so only the bound limits overlap.
    let requests: Vec<Request> = (0..5)
        .map(|i| with_priority(&format!("/item/{}", i), Priority::Critical))
        .collect();
    let results = client.execute_concurrent(requests, 2).await.unwrap();

    assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(
            result.as_ref().unwrap().text(),
            format!("{{\"path\":\"/item/{}\"}}", i)
        );
    }
}

#[tokio::test]
async fn test_cancel_queued_request() {
    let transport = Scripted::new();
    let client = client(&transport);

    let blocker = spawn_execute(&client, get("/block"));
    wait_until(|| transport.call_count() == 1).await;

    let first = spawn_execute(&client, get("/report"));
    let second = spawn_execute(&client, get("/report"));
    wait_until(|| client.status().queued.normal == 1).await;
    // Give the second caller time to attach to the in-flight record.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(client.cancel(&get("/report")));
    assert_eq!(first.await.unwrap().unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(second.await.unwrap().unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(!client.cancel(&get("/report")));

    transport.release();
    blocker.await.unwrap().unwrap();

    // A fresh call after cancellation starts a new execution.
    client.execute(get("/report")).await.unwrap();
    assert_eq!(transport.paths(), vec!["/block", "/report"]);
}

#[tokio::test]
async fn test_cancel_running_request_discards_result() {
    let transport = Scripted::with_handler(Duration::from_millis(100), |request, _| Ok(echo(request)));
    let client = Client::builder()
        .base_url("http://api.test")
        .unwrap()
        .transport(transport.clone())
        .pacing(Duration::ZERO)
        .default_cache(CachePolicy::enabled(Duration::from_secs(60)))
        .build()
        .unwrap();

    let running = spawn_execute(&client, get("/slow"));
    wait_until(|| transport.call_count() == 1).await;

    assert!(client.cancel(&get("/slow")));
    assert_eq!(running.await.unwrap().unwrap_err().kind(), ErrorKind::Cancelled);

    let fresh = client.execute(get("/slow")).await.unwrap();
    assert!(!fresh.from_cache);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn test_cancel_all() {
    let transport = Scripted::new();
    let client = client(&transport);

    let blocker = spawn_execute(&client, get("/block"));
    wait_until(|| transport.call_count() == 1).await;
    let queued: Vec<_> = ["/a", "/b", "/c"]
        .into_iter()
        .map(|path| spawn_execute(&client, get(path)))
        .collect();
    wait_until(|| client.status().queued.total() == 3).await;

    assert_eq!(client.cancel_all(), 4);

    assert_eq!(blocker.await.unwrap().unwrap_err().kind(), ErrorKind::Cancelled);
    for handle in queued {
        assert_eq!(handle.await.unwrap().unwrap_err().kind(), ErrorKind::Cancelled);
    }
    let status = client.status();
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.queued.total(), 0);

    transport.release();
}

#[tokio::test]
async fn test_transport_failures_are_classified() {
    let transport = Scripted::with_handler(Duration::ZERO, |request, _| {
        match request.url.path() {
            "/connect" => Err(TransportError::connect_timeout("dial took too long")),
            "/receive" => Err(TransportError::new("Receive_Timeout", "slow body")),
            "/refused" => Err(TransportError::connection("refused")),
            _ => Err(TransportError::new("mystery", "???")),
        }
    });
    let client = client(&transport);

    let kind = |path: &'static str| {
        let client = client.clone();
        async move { client.execute(get(path)).await.unwrap_err().kind() }
    };

    assert_eq!(kind("/connect").await, ErrorKind::ConnectTimeout);
    assert_eq!(kind("/receive").await, ErrorKind::ReceiveTimeout);
    assert_eq!(kind("/refused").await, ErrorKind::Connection);
    assert_eq!(kind("/other").await, ErrorKind::Unknown);

    let err = client.execute(get("/connect")).await.unwrap_err();
    assert_eq!(
        err.transport_error().map(|e| e.message().to_string()),
        Some("dial took too long".to_string())
    );
}

#[tokio::test]
async fn test_server_error_stays_bad_response_with_custom_acceptance() {
    let transport = Scripted::with_handler(Duration::ZERO, |request, _| {
        match request.url.path() {
            "/missing" => Ok(respond(404, "")),
            _ => Ok(respond(500, "internal")),
        }
    });
    let client = Client::builder()
        .base_url("http://api.test")
        .unwrap()
        .transport(transport.clone())
        .accept_status(|status| status.is_success() || status == StatusCode::NOT_FOUND)
        .build()
        .unwrap();

    assert_eq!(
        client.execute(get("/missing")).await.unwrap().status,
        StatusCode::NOT_FOUND
    );
    let err = client.execute(get("/broken")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadResponse);
    assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
}

struct AlwaysConnection;

impl ErrorClassifier for AlwaysConnection {
    fn classify(&self, failure: TransportError) -> Error {
        Error::Connection {
            message: failure.to_string(),
            source: None,
        }
    }
}

#[tokio::test]
async fn test_request_classifier_overrides_default() {
    let transport =
        Scripted::with_handler(Duration::ZERO, |_, _| Err(TransportError::new("mystery", "?")));
    let client = client(&transport);

    let request = Request::get("/x")
        .classifier(Arc::new(AlwaysConnection))
        .build()
        .unwrap();
    let err = client.execute(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_retries_share_one_execution() {
    let transport = Scripted::with_handler(Duration::from_millis(5), |request, call| {
        if call < 3 {
            Err(TransportError::connection("reset"))
        } else {
            Ok(echo(request))
        }
    });
    let client = Client::builder()
        .base_url("http://api.test")
        .unwrap()
        .transport(transport.clone())
        .pacing(Duration::ZERO)
        .retry_strategy(RetryStrategy::Linear {
            delay: Duration::from_millis(5),
            max_retries: 3,
        })
        .build()
        .unwrap();

    let (a, b) = tokio::join!(client.execute(get("/retry")), client.execute(get("/retry")));

    let a = a.unwrap();
    assert_eq!(a.attempts, 3);
    assert_eq!(b.unwrap().attempts, 3);
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn test_cancel_stops_pending_retries() {
    let transport = Scripted::with_handler(Duration::ZERO, |_, _| Ok(respond(503, "unavailable")));
    let client = Client::builder()
        .base_url("http://api.test")
        .unwrap()
        .transport(transport.clone())
        .pacing(Duration::ZERO)
        .retry_strategy(RetryStrategy::Linear {
            delay: Duration::from_millis(100),
            max_retries: 5,
        })
        .build()
        .unwrap();

    let running = spawn_execute(&client, get("/flaky"));
    wait_until(|| transport.call_count() == 1).await;

    assert!(client.cancel(&get("/flaky")));
    assert_eq!(running.await.unwrap().unwrap_err().kind(), ErrorKind::Cancelled);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(transport.call_count(), 1);
    assert_eq!(client.status().in_flight, 0);
}

#[tokio::test]
async fn test_cancelled_is_never_retried() {
    let transport =
        Scripted::with_handler(Duration::ZERO, |_, _| Err(TransportError::cancelled()));
    let client = Client::builder()
        .base_url("http://api.test")
        .unwrap()
        .transport(transport.clone())
        .retry_strategy(RetryStrategy::Linear {
            delay: Duration::from_millis(1),
            max_retries: 5,
        })
        .build()
        .unwrap();

    let err = client.execute(get("/x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(transport.call_count(), 1);
}

struct Stamp;

#[async_trait]
impl Interceptor for Stamp {
    async fn on_request(&self, request: &mut OutgoingRequest) -> convoy::Result<()> {
        request
            .headers
            .insert("x-stamp", HeaderValue::from_static("stamped"));
        Ok(())
    }

    async fn on_response(
        &self,
        _request: &OutgoingRequest,
        response: &mut RawResponse,
    ) -> convoy::Result<()> {
        response.body = Bytes::from_static(b"rewritten");
        Ok(())
    }
}

struct Reject;

#[async_trait]
impl Interceptor for Reject {
    async fn on_request(&self, _request: &mut OutgoingRequest) -> convoy::Result<()> {
        Err(Error::ConfigurationError("missing credentials".to_string()))
    }
}

#[tokio::test]
async fn test_interceptors_rewrite_traffic() {
    let transport = Scripted::new();
    let client = client(&transport);

    let id = client.add_interceptor(Arc::new(Stamp));
    let response = client.execute(get("/x")).await.unwrap();
    assert_eq!(response.text(), "rewritten");
    assert_eq!(transport.calls.lock()[0].headers["x-stamp"], "stamped");

    assert!(client.remove_interceptor(id));
    let response = client.execute(get("/x")).await.unwrap();
    assert_eq!(response.text(), "{\"path\":\"/x\"}");
}

struct Explode;

#[async_trait]
impl Interceptor for Explode {
    async fn on_request(&self, _request: &mut OutgoingRequest) -> convoy::Result<()> {
        panic!("interceptor exploded");
    }
}

#[tokio::test]
async fn test_panicking_execution_resolves_and_queue_continues() {
    let transport = Scripted::new();
    let client = client(&transport);

    let request = Request::get("/x").interceptor(Arc::new(Explode)).build().unwrap();
    let err = client.execute(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert_eq!(client.status().in_flight, 0);

    let response = client.execute(get("/after")).await.unwrap();
    assert_eq!(response.text(), "{\"path\":\"/after\"}");
    assert_eq!(transport.paths(), vec!["/after"]);
}

#[tokio::test]
async fn test_interceptor_error_becomes_result() {
    let transport = Scripted::new();
    let client = client(&transport);

    let request = Request::get("/x").interceptor(Arc::new(Reject)).build().unwrap();
    let err = client.execute(request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(transport.call_count(), 0);
}

#[derive(Default)]
struct Audit {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl Plugin for Audit {
    fn name(&self) -> &str {
        "audit"
    }

    fn version(&self) -> &str {
        "1.2.0"
    }

    fn interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        vec![Arc::new(Stamp)]
    }

    async fn dispose(&self) -> HookResult {
        self.events.lock().push("dispose".to_string());
        Ok(())
    }

    async fn on_request_start(&self, request: &Request) -> HookResult {
        self.events.lock().push(format!("start {}", request.path()));
        Ok(())
    }

    async fn on_request_complete(&self, _request: &Request, response: &Response) -> HookResult {
        self.events
            .lock()
            .push(format!("complete {}", response.status.as_u16()));
        Ok(())
    }

    async fn on_request_error(&self, _request: &Request, error: &Error) -> HookResult {
        self.events.lock().push(format!("error {}", error.kind()));
        Ok(())
    }
}

struct Faulty;

#[async_trait]
impl Plugin for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn on_request_start(&self, _request: &Request) -> HookResult {
        Err("cannot start".into())
    }

    async fn on_request_complete(&self, _request: &Request, _response: &Response) -> HookResult {
        panic!("hook exploded");
    }
}

#[tokio::test]
async fn test_plugin_lifecycle_and_isolation() {
    let transport = Scripted::with_handler(Duration::ZERO, |request, _| {
        if request.url.path() == "/fail" {
            Ok(respond(502, "bad gateway"))
        } else {
            Ok(echo(request))
        }
    });
    let client = client(&transport);
    let audit = Arc::new(Audit::default());

    client.register_plugin(Arc::new(Faulty)).await.unwrap();
    client.register_plugin(audit.clone()).await.unwrap();
    assert_eq!(client.plugin_state("audit"), Some(PluginState::Active));

    let err = client.register_plugin(Arc::new(Audit::default())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let response = client.execute(get("/ok")).await.unwrap();
    assert_eq!(response.text(), "rewritten");
    assert!(client.execute(get("/fail")).await.is_err());

    assert_eq!(
        *audit.events.lock(),
        vec!["start /ok", "complete 200", "start /fail", "error bad-response"]
    );

    let info = client.plugins();
    assert_eq!(info.len(), 2);
    assert_eq!(info[1].version, "1.2.0");

    client.unregister_plugin("audit").await.unwrap();
    assert_eq!(client.plugin_state("audit"), None);
    assert_eq!(audit.events.lock().last().map(String::as_str), Some("dispose"));
    assert_eq!(client.execute(get("/ok")).await.unwrap().text(), "{\"path\":\"/ok\"}");
    assert!(client.unregister_plugin("audit").await.is_err());
}

#[tokio::test]
async fn test_shutdown_disposes_and_rejects() {
    let transport = Scripted::new();
    let client = client(&transport);
    let audit = Arc::new(Audit::default());
    client.register_plugin(audit.clone()).await.unwrap();

    client.shutdown().await;

    assert!(client.plugins().is_empty());
    assert_eq!(*audit.events.lock(), vec!["dispose"]);
    let err = client.execute(get("/x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_reconfigure_applies_to_new_calls() {
    let transport = Scripted::new();
    let client = client(&transport);

    client.execute(get("/x")).await.unwrap();

    let config = ClientConfig {
        base_url: Some("http://other.test/v2".to_string()),
        ..ClientConfig::default()
    };
    client.reconfigure(&config).unwrap();
    client.execute(get("/x")).await.unwrap();

    let hosts: Vec<String> = transport
        .calls
        .lock()
        .iter()
        .map(|call| call.url.to_string())
        .collect();
    assert_eq!(hosts, vec!["http://api.test/x", "http://other.test/v2/x"]);
}

#[tokio::test]
async fn test_relative_path_without_base_url() {
    let transport = Scripted::new();
    let client = Client::builder().transport(transport.clone()).build().unwrap();

    let err = client.execute(get("/x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let absolute = client.execute(get("http://elsewhere.test/y")).await.unwrap();
    assert_eq!(absolute.text(), "{\"path\":\"/y\"}");
}

#[tokio::test]
async fn test_isolated_clients_share_nothing() {
    let transport = Scripted::new();
    let first = client(&transport);
    let second = client(&transport);
    let request = || {
        Request::get("/shared")
            .cache(CachePolicy::enabled(Duration::from_secs(60)))
            .build()
            .unwrap()
    };

    first.execute(request()).await.unwrap();
    assert!(!second.execute(request()).await.unwrap().from_cache);
    assert_eq!(transport.call_count(), 2);
}
