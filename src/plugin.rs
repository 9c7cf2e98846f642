//! Interceptors, plugins, and the pipeline that hosts them.
//!
//! Interceptors sit on the transport path and may rewrite the outgoing
//! request or the raw response. They run in installation order on the way
//! in and in reverse order on the way out.
//!
//! Plugins are named bundles of interceptors plus request lifecycle hooks.
//! A plugin moves through `Registered -> Initialized -> Active -> Disposed`.
//! Hook failures (errors, panics, and hooks exceeding the configured time
//! limit) are logged and never change the outcome of a request.

use crate::transport::{BoxError, OutgoingRequest, RawResponse};
use crate::{Error, Request, Response, Result};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a plugin lifecycle call or hook.
pub type HookResult = std::result::Result<(), BoxError>;

/// Observes or rewrites traffic on the transport path.
///
/// An error returned from [`on_request`](Self::on_request) or
/// [`on_response`](Self::on_response) becomes the request's result.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use convoy::plugin::Interceptor;
/// use convoy::transport::OutgoingRequest;
/// use http::HeaderValue;
///
/// struct BearerAuth(String);
///
/// #[async_trait]
/// impl Interceptor for BearerAuth {
///     async fn on_request(&self, request: &mut OutgoingRequest) -> convoy::Result<()> {
///         let value = HeaderValue::try_from(format!("Bearer {}", self.0))
///             .map_err(|e| convoy::Error::ConfigurationError(e.to_string()))?;
///         request.headers.insert(http::header::AUTHORIZATION, value);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn on_request(&self, _request: &mut OutgoingRequest) -> Result<()> {
        Ok(())
    }

    async fn on_response(
        &self,
        _request: &OutgoingRequest,
        _response: &mut RawResponse,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_error(&self, _request: &OutgoingRequest, _error: &Error) {}
}

/// A named, lifecycle-managed bundle of interceptors and hooks.
///
/// Every method except [`name`](Self::name) has a no-op default.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique within a client.
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn description(&self) -> &str {
        ""
    }

    /// Interceptors installed while the plugin is active.
    fn interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        Vec::new()
    }

    async fn initialize(&self) -> HookResult {
        Ok(())
    }

    async fn dispose(&self) -> HookResult {
        Ok(())
    }

    async fn on_request_start(&self, _request: &Request) -> HookResult {
        Ok(())
    }

    async fn on_request_complete(&self, _request: &Request, _response: &Response) -> HookResult {
        Ok(())
    }

    async fn on_request_error(&self, _request: &Request, _error: &Error) -> HookResult {
        Ok(())
    }
}

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Registered,
    Initialized,
    Active,
    Disposed,
}

/// Read-only description of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub state: PluginState,
}

/// Handle for removing a global interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

struct PluginSlot {
    name: String,
    plugin: Arc<dyn Plugin>,
    state: PluginState,
}

struct Installed {
    id: InterceptorId,
    owner: Option<String>,
    interceptor: Arc<dyn Interceptor>,
}

pub(crate) struct Pipeline {
    plugins: RwLock<Vec<PluginSlot>>,
    interceptors: RwLock<Vec<Installed>>,
    next_id: AtomicU64,
    hook_timeout: Option<Duration>,
}

impl Pipeline {
    pub(crate) fn new(hook_timeout: Option<Duration>) -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
            interceptors: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            hook_timeout,
        }
    }

    pub(crate) async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let name = plugin.name().to_string();
        if name.is_empty() {
            return Err(Error::configuration("Plugin name must not be empty"));
        }

        {
            let mut plugins = self.plugins.write();
            if plugins.iter().any(|slot| slot.name == name) {
                return Err(Error::configuration(format!(
                    "Plugin '{}' is already registered",
                    name
                )));
            }
            plugins.push(PluginSlot {
                name: name.clone(),
                plugin: Arc::clone(&plugin),
                state: PluginState::Registered,
            });
        }

        if let Err(reason) = self.guarded(&name, "initialize", plugin.initialize()).await {
            self.plugins.write().retain(|slot| slot.name != name);
            return Err(Error::configuration(format!(
                "Plugin '{}' failed to initialize: {}",
                name, reason
            )));
        }
        self.set_state(&name, PluginState::Initialized);

        let interceptors = plugin.interceptors();
        let installed = interceptors.len();
        for interceptor in interceptors {
            self.install(Some(name.clone()), interceptor);
        }
        self.set_state(&name, PluginState::Active);

        tracing::info!(
            plugin = %name,
            version = plugin.version(),
            interceptors = installed,
            "Plugin registered"
        );
        Ok(())
    }

    pub(crate) async fn unregister(&self, name: &str) -> Result<()> {
        let plugin = {
            let mut plugins = self.plugins.write();
            let index = plugins
                .iter()
                .position(|slot| slot.name == name)
                .ok_or_else(|| {
                    Error::configuration(format!("Plugin '{}' is not registered", name))
                })?;
            plugins.remove(index).plugin
        };

        self.interceptors
            .write()
            .retain(|installed| installed.owner.as_deref() != Some(name));

        if let Err(reason) = self.guarded(name, "dispose", plugin.dispose()).await {
            tracing::warn!(plugin = %name, error = %reason, "Plugin disposed with errors");
        }
        tracing::info!(plugin = %name, state = ?PluginState::Disposed, "Plugin unregistered");
        Ok(())
    }

    pub(crate) fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) -> InterceptorId {
        self.install(None, interceptor)
    }

    pub(crate) fn remove_interceptor(&self, id: InterceptorId) -> bool {
        let mut interceptors = self.interceptors.write();
        let before = interceptors.len();
        interceptors.retain(|installed| installed.id != id || installed.owner.is_some());
        interceptors.len() != before
    }

    fn install(&self, owner: Option<String>, interceptor: Arc<dyn Interceptor>) -> InterceptorId {
        let id = InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.interceptors.write().push(Installed {
            id,
            owner,
            interceptor,
        });
        id
    }

    fn set_state(&self, name: &str, state: PluginState) {
        if let Some(slot) = self.plugins.write().iter_mut().find(|slot| slot.name == name) {
            slot.state = state;
        }
    }

    /// Installed interceptors in installation order, as of now.
    pub(crate) fn interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        self.interceptors
            .read()
            .iter()
            .map(|installed| Arc::clone(&installed.interceptor))
            .collect()
    }

    pub(crate) fn plugin_names(&self) -> Vec<String> {
        self.plugins.read().iter().map(|slot| slot.name.clone()).collect()
    }

    pub(crate) fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.plugins
            .read()
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.state)
    }

    pub(crate) fn plugin_info(&self) -> Vec<PluginInfo> {
        self.plugins
            .read()
            .iter()
            .map(|slot| PluginInfo {
                name: slot.name.clone(),
                version: slot.plugin.version().to_string(),
                description: slot.plugin.description().to_string(),
                state: slot.state,
            })
            .collect()
    }

    fn active_plugins(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        self.plugins
            .read()
            .iter()
            .filter(|slot| slot.state == PluginState::Active)
            .map(|slot| (slot.name.clone(), Arc::clone(&slot.plugin)))
            .collect()
    }

    pub(crate) async fn request_started(&self, request: &Request) {
        for (name, plugin) in self.active_plugins() {
            let _ = self
                .guarded(&name, "on_request_start", plugin.on_request_start(request))
                .await;
        }
    }

    pub(crate) async fn request_completed(&self, request: &Request, response: &Response) {
        for (name, plugin) in self.active_plugins() {
            let _ = self
                .guarded(
                    &name,
                    "on_request_complete",
                    plugin.on_request_complete(request, response),
                )
                .await;
        }
    }

    pub(crate) async fn request_failed(&self, request: &Request, error: &Error) {
        for (name, plugin) in self.active_plugins() {
            let _ = self
                .guarded(&name, "on_request_error", plugin.on_request_error(request, error))
                .await;
        }
    }

    /// Runs one plugin call, containing errors, panics and overruns.
    async fn guarded<F>(&self, plugin: &str, hook: &'static str, call: F) -> std::result::Result<(), String>
    where
        F: Future<Output = HookResult>,
    {
        let call = AssertUnwindSafe(call).catch_unwind();
        let outcome = match self.hook_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        plugin = %plugin,
                        hook = hook,
                        timeout_ms = limit.as_millis(),
                        "Plugin hook timed out"
                    );
                    return Err(format!("{} timed out", hook));
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(plugin = %plugin, hook = hook, error = %e, "Plugin hook failed");
                Err(e.to_string())
            }
            Err(_) => {
                tracing::warn!(plugin = %plugin, hook = hook, "Plugin hook panicked");
                Err(format!("{} panicked", hook))
            }
        }
    }
}

pub(crate) async fn intercept_request(
    chain: &[Arc<dyn Interceptor>],
    request: &mut OutgoingRequest,
) -> Result<()> {
    for interceptor in chain {
        interceptor.on_request(request).await?;
    }
    Ok(())
}

pub(crate) async fn intercept_response(
    chain: &[Arc<dyn Interceptor>],
    request: &OutgoingRequest,
    response: &mut RawResponse,
) -> Result<()> {
    for interceptor in chain.iter().rev() {
        interceptor.on_response(request, response).await?;
    }
    Ok(())
}

pub(crate) async fn intercept_error(
    chain: &[Arc<dyn Interceptor>],
    request: &OutgoingRequest,
    error: &Error,
) {
    for interceptor in chain.iter().rev() {
        interceptor.on_error(request, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    struct Tagger {
        tag: &'static str,
        log: Arc<Recording>,
    }

    #[async_trait]
    impl Interceptor for Tagger {
        async fn on_request(&self, _request: &mut OutgoingRequest) -> Result<()> {
            self.log.events.lock().push(format!("in:{}", self.tag));
            Ok(())
        }

        async fn on_response(
            &self,
            _request: &OutgoingRequest,
            _response: &mut RawResponse,
        ) -> Result<()> {
            self.log.events.lock().push(format!("out:{}", self.tag));
            Ok(())
        }
    }

    struct TestPlugin {
        name: &'static str,
        log: Arc<Recording>,
        fail_init: bool,
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
            vec![Arc::new(Tagger {
                tag: self.name,
                log: Arc::clone(&self.log),
            })]
        }

        async fn initialize(&self) -> HookResult {
            self.log.events.lock().push(format!("init:{}", self.name));
            if self.fail_init {
                return Err("boom".into());
            }
            Ok(())
        }

        async fn dispose(&self) -> HookResult {
            self.log.events.lock().push(format!("dispose:{}", self.name));
            Ok(())
        }
    }

    fn plugin(name: &'static str, log: &Arc<Recording>) -> Arc<dyn Plugin> {
        Arc::new(TestPlugin {
            name,
            log: Arc::clone(log),
            fail_init: false,
        })
    }

    fn outgoing() -> OutgoingRequest {
        OutgoingRequest {
            method: http::Method::GET,
            url: url::Url::parse("http://localhost/x").unwrap(),
            headers: http::HeaderMap::new(),
            body: None,
            timeouts: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_register_lifecycle_and_duplicates() {
        let log = Arc::new(Recording::default());
        let pipeline = Pipeline::new(None);

        pipeline.register(plugin("auth", &log)).await.unwrap();
        assert_eq!(pipeline.plugin_state("auth"), Some(PluginState::Active));
        assert_eq!(pipeline.interceptors().len(), 1);

        let err = pipeline.register(plugin("auth", &log)).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
        assert_eq!(pipeline.plugin_names(), vec!["auth".to_string()]);

        pipeline.unregister("auth").await.unwrap();
        assert_eq!(pipeline.plugin_state("auth"), None);
        assert!(pipeline.interceptors().is_empty());
        assert!(pipeline.unregister("auth").await.is_err());

        assert_eq!(
            *log.events.lock(),
            vec!["init:auth".to_string(), "dispose:auth".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_initialize_leaves_no_trace() {
        let log = Arc::new(Recording::default());
        let pipeline = Pipeline::new(None);
        let failing = Arc::new(TestPlugin {
            name: "flaky",
            log: Arc::clone(&log),
            fail_init: true,
        });

        assert!(pipeline.register(failing).await.is_err());
        assert!(pipeline.plugin_info().is_empty());
        assert!(pipeline.interceptors().is_empty());
    }

    #[tokio::test]
    async fn test_interceptor_order_in_and_out() {
        let log = Arc::new(Recording::default());
        let pipeline = Pipeline::new(None);

        pipeline.add_interceptor(Arc::new(Tagger {
            tag: "global",
            log: Arc::clone(&log),
        }));
        pipeline.register(plugin("plugin", &log)).await.unwrap();
        log.events.lock().clear();

        let chain = pipeline.interceptors();
        let mut request = outgoing();
        intercept_request(&chain, &mut request).await.unwrap();
        let mut response = RawResponse {
            status: http::StatusCode::OK,
            headers: http::HeaderMap::new(),
            body: bytes::Bytes::new(),
            elapsed: Duration::ZERO,
        };
        intercept_response(&chain, &request, &mut response).await.unwrap();

        assert_eq!(
            *log.events.lock(),
            vec!["in:global", "in:plugin", "out:plugin", "out:global"]
        );
    }

    #[tokio::test]
    async fn test_snapshot_is_stable_across_removal() {
        let log = Arc::new(Recording::default());
        let pipeline = Pipeline::new(None);
        let id = pipeline.add_interceptor(Arc::new(Tagger {
            tag: "global",
            log: Arc::clone(&log),
        }));

        let snapshot = pipeline.interceptors();
        assert!(pipeline.remove_interceptor(id));
        assert!(!pipeline.remove_interceptor(id));
        assert!(pipeline.interceptors().is_empty());
        assert_eq!(snapshot.len(), 1);
    }

    struct Panicky;

    #[async_trait]
    impl Plugin for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn on_request_start(&self, _request: &Request) -> HookResult {
            panic!("hook exploded");
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Plugin for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn on_request_start(&self, _request: &Request) -> HookResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hooks_are_isolated() {
        let pipeline = Pipeline::new(Some(Duration::from_secs(1)));
        pipeline.register(Arc::new(Panicky)).await.unwrap();
        pipeline.register(Arc::new(Sleepy)).await.unwrap();

        let request = Request::get("/x").build().unwrap();
        let started = tokio::time::Instant::now();
        pipeline.request_started(&request).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
