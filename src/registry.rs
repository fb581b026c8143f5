//! Lazily-initialized, per-server tool clients.
//!
//! Each configured server moves through `Uninitialized -> Initializing ->
//! Ready`. A failed initialization drops the server back to `Uninitialized`
//! so a later call can retry. Initialization runs at most once at a time per
//! server: the first caller spawns it, concurrent callers wait on the same
//! shared result, and only the spawned task publishes the outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::{ToolCatalog, ToolClient, ToolClientFactory};
use crate::config::{ServerCatalog, ServerConfig};
use crate::error::{GatewayError, GatewayResult};

/// Upper bound on client construction plus tool enumeration.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A live client for one server together with the tools it reported.
pub struct ClientEntry {
    server_name: String,
    client: Arc<dyn ToolClient>,
    catalog: ToolCatalog,
}

impl ClientEntry {
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn client(&self) -> &Arc<dyn ToolClient> {
        &self.client
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }
}

impl std::fmt::Debug for ClientEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEntry")
            .field("server_name", &self.server_name)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

/// Externally visible lifecycle state of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Initializing,
    Ready,
}

type InitFuture = Shared<BoxFuture<'static, GatewayResult<Arc<ClientEntry>>>>;

enum Slot {
    Initializing { attempt: u64, result: InitFuture },
    Ready(Arc<ClientEntry>),
}

#[derive(Default)]
struct RegistryState {
    slots: HashMap<String, Slot>,
    next_attempt: u64,
}

struct Inner {
    catalog: Arc<ServerCatalog>,
    factory: Arc<dyn ToolClientFactory>,
    init_timeout: Duration,
    state: Mutex<RegistryState>,
}

/// Owns every [`ClientEntry`]; cheap to clone and share between handlers.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<Inner>,
}

impl ClientRegistry {
    pub fn new(catalog: Arc<ServerCatalog>, factory: Arc<dyn ToolClientFactory>) -> Self {
        Self::with_init_timeout(catalog, factory, DEFAULT_INIT_TIMEOUT)
    }

    pub fn with_init_timeout(
        catalog: Arc<ServerCatalog>,
        factory: Arc<dyn ToolClientFactory>,
        init_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                factory,
                init_timeout,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    pub fn catalog(&self) -> &ServerCatalog {
        &self.inner.catalog
    }

    /// Configured server names in document order.
    pub fn server_names(&self) -> Vec<String> {
        self.inner.catalog.names()
    }

    /// Return the ready entry for `server_name`, initializing it if needed.
    pub async fn ensure_client(&self, server_name: &str) -> GatewayResult<Arc<ClientEntry>> {
        let pending = {
            let mut state = self.inner.state.lock().await;
            match state.slots.get(server_name) {
                Some(Slot::Ready(entry)) => {
                    debug!("Using cached client for `{server_name}`");
                    return Ok(entry.clone());
                }
                Some(Slot::Initializing { result, .. }) => {
                    debug!("Waiting for in-flight initialization of `{server_name}`");
                    result.clone()
                }
                None => {
                    let config = self.admit(server_name)?;
                    let attempt = state.next_attempt;
                    state.next_attempt += 1;
                    let result = self.spawn_initialization(config, attempt);
                    state.slots.insert(
                        server_name.to_string(),
                        Slot::Initializing {
                            attempt,
                            result: result.clone(),
                        },
                    );
                    result
                }
            }
        };

        pending.await
    }

    /// Checks that run before any connection attempt: the server must be
    /// configured, enabled and free of placeholder credentials.
    fn admit(&self, server_name: &str) -> GatewayResult<ServerConfig> {
        let Some(config) = self.inner.catalog.lookup(server_name) else {
            warn!("Server `{server_name}` not found in configuration");
            return Err(GatewayError::ServerNotConfigured(server_name.to_string()));
        };

        if config.disabled {
            warn!("Server `{server_name}` is disabled in configuration");
            return Err(GatewayError::ServerDisabled(server_name.to_string()));
        }

        if let Some(key) = config.unresolved_placeholder() {
            warn!(
                "Placeholder found for `{key}` in `{server_name}` config; replace it with the actual value"
            );
            return Err(GatewayError::UnresolvedCredential {
                server: server_name.to_string(),
                key: key.to_string(),
            });
        }

        Ok(config.clone())
    }

    fn spawn_initialization(&self, config: ServerConfig, attempt: u64) -> InitFuture {
        let inner = self.inner.clone();
        let name = config.name.clone();

        let task = tokio::spawn({
            let inner = inner.clone();
            async move {
                let outcome = match tokio::time::timeout(
                    inner.init_timeout,
                    initialize(inner.factory.as_ref(), &config),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!("Initialization of `{}` timed out after {:?}", config.name, inner.init_timeout);
                        Err(GatewayError::Timeout)
                    }
                };
                inner.publish(&config.name, attempt, outcome).await
            }
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    inner.discard(&name, attempt).await;
                    Err(GatewayError::initialization(format!("initialization task failed: {e}")))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Current lifecycle state of `server_name`.
    pub async fn server_state(&self, server_name: &str) -> ServerState {
        match self.inner.state.lock().await.slots.get(server_name) {
            None => ServerState::Uninitialized,
            Some(Slot::Initializing { .. }) => ServerState::Initializing,
            Some(Slot::Ready(_)) => ServerState::Ready,
        }
    }

    /// Names of servers with a ready client, in document order.
    pub async fn ready_servers(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        self.inner
            .catalog
            .names()
            .into_iter()
            .filter(|name| matches!(state.slots.get(name), Some(Slot::Ready(_))))
            .collect()
    }

    /// Forget `server_name`; the next call re-initializes it. An in-flight
    /// initialization is detached and will not publish. Returns whether
    /// anything was removed.
    pub async fn evict(&self, server_name: &str) -> bool {
        let removed = self.inner.state.lock().await.slots.remove(server_name);
        match removed {
            Some(Slot::Ready(entry)) => {
                info!("Evicting client for `{server_name}`");
                entry.client.shutdown().await;
                true
            }
            Some(Slot::Initializing { .. }) => true,
            None => false,
        }
    }

    /// Drop every entry and close the underlying clients.
    pub async fn shutdown(&self) {
        let slots = std::mem::take(&mut self.inner.state.lock().await.slots);
        for (name, slot) in slots {
            if let Slot::Ready(entry) = slot {
                debug!("Shutting down client for `{name}`");
                entry.client.shutdown().await;
            }
        }
        info!("Client registry shut down");
    }
}

impl Inner {
    /// Store the outcome of `attempt` if its slot is still current; a
    /// success is turned into an error (and its client closed) otherwise.
    async fn publish(
        &self,
        name: &str,
        attempt: u64,
        outcome: GatewayResult<Arc<ClientEntry>>,
    ) -> GatewayResult<Arc<ClientEntry>> {
        let mut state = self.state.lock().await;
        let current = matches!(
            state.slots.get(name),
            Some(Slot::Initializing { attempt: a, .. }) if *a == attempt
        );

        if !current {
            drop(state);
            let entry = outcome?;
            entry.client.shutdown().await;
            return Err(GatewayError::initialization(format!(
                "client for `{name}` was evicted during initialization"
            )));
        }

        match &outcome {
            Ok(entry) => {
                state.slots.insert(name.to_string(), Slot::Ready(entry.clone()));
            }
            Err(_) => {
                state.slots.remove(name);
            }
        }
        outcome
    }

    async fn discard(&self, name: &str, attempt: u64) {
        let mut state = self.state.lock().await;
        if matches!(
            state.slots.get(name),
            Some(Slot::Initializing { attempt: a, .. }) if *a == attempt
        ) {
            state.slots.remove(name);
        }
    }
}

/// Build a client scoped to this single server and fetch its tools.
async fn initialize(
    factory: &dyn ToolClientFactory,
    config: &ServerConfig,
) -> GatewayResult<Arc<ClientEntry>> {
    if let Some(reason) = &config.invalid {
        error!("Cannot initialize `{}`: invalid configuration: {reason}", config.name);
        return Err(GatewayError::initialization(format!("invalid configuration: {reason}")));
    }

    let client = factory.connect(config).await.map_err(|e| {
        error!("Error initializing client for `{}`: {e:#}", config.name);
        GatewayError::initialization(format!("{e:#}"))
    })?;

    let tools = match client.list_tools().await {
        Ok(tools) => tools,
        Err(e) => {
            error!("Error fetching tools for `{}`: {e:#}", config.name);
            client.shutdown().await;
            return Err(GatewayError::initialization(format!("{e:#}")));
        }
    };

    let catalog = ToolCatalog::new(tools, &config.disabled_tools);
    if catalog.is_empty() {
        warn!("Server `{}` reported no tools", config.name);
    }
    info!(
        "Successfully initialized client and fetched {} tools for `{}`",
        catalog.len(),
        config.name
    );

    Ok(Arc::new(ClientEntry {
        server_name: config.name.clone(),
        client,
        catalog,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StubFactory, StubTool, catalog, server, server_with_env};
    use crate::error::ErrorKind;
    use futures_util::future::join_all;

    fn registry(factory: &Arc<StubFactory>, servers: Vec<ServerConfig>) -> ClientRegistry {
        ClientRegistry::new(catalog(servers), factory.clone())
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let factory = Arc::new(StubFactory::new().with_server("a", vec![StubTool::echo("x")]));
        let registry = registry(&factory, vec![server("a")]);

        let first = registry.ensure_client("a").await.unwrap();
        let second = registry.ensure_client("a").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.connects(), 1);
        assert_eq!(first.server_name(), "a");
        assert_eq!(first.catalog().names(), vec!["x"]);
        assert_eq!(registry.server_state("a").await, ServerState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_initialization() {
        let factory = Arc::new(
            StubFactory::new()
                .with_server("a", vec![StubTool::echo("x")])
                .with_connect_delay("a", Duration::from_millis(50)),
        );
        let registry = registry(&factory, vec![server("a")]);

        let results = join_all((0..16).map(|_| registry.ensure_client("a"))).await;

        assert_eq!(factory.connects(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failure() {
        let factory = Arc::new(
            StubFactory::new()
                .failing("connection refused")
                .with_connect_delay("a", Duration::from_millis(50)),
        );
        let registry = registry(&factory, vec![server("a")]);

        let results = join_all((0..8).map(|_| registry.ensure_client("a"))).await;

        assert_eq!(factory.connects(), 1);
        for result in results {
            assert_eq!(
                result.unwrap_err(),
                GatewayError::Initialization("connection refused".to_string())
            );
        }
        assert_eq!(registry.server_state("a").await, ServerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_failed_initialization_can_be_retried() {
        let factory = Arc::new(
            StubFactory::new()
                .with_server("a", vec![StubTool::echo("x")])
                .failing_first(1, "handshake failed"),
        );
        let registry = registry(&factory, vec![server("a")]);

        let err = registry.ensure_client("a").await.unwrap_err();
        assert!(err.to_string().starts_with("initialization error"));
        assert_eq!(registry.server_state("a").await, ServerState::Uninitialized);

        let entry = registry.ensure_client("a").await.unwrap();
        assert_eq!(entry.catalog().len(), 1);
        assert_eq!(factory.connects(), 2);
    }

    #[tokio::test]
    async fn test_placeholder_credential_is_rejected_before_connecting() {
        let factory = Arc::new(StubFactory::new());
        let registry = registry(&factory, vec![server_with_env("gh", "TOKEN", "<YOUR_TOKEN>")]);

        let err = registry.ensure_client("gh").await.unwrap_err();

        assert_eq!(
            err,
            GatewayError::UnresolvedCredential {
                server: "gh".to_string(),
                key: "TOKEN".to_string()
            }
        );
        assert_eq!(factory.connects(), 0);
        assert_eq!(registry.server_state("gh").await, ServerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_unknown_server_leaves_registry_untouched() {
        let factory = Arc::new(StubFactory::new());
        let registry = registry(&factory, vec![server("a"), server("b")]);

        assert_eq!(registry.server_names(), vec!["a", "b"]);
        let err = registry.ensure_client("c").await.unwrap_err();

        assert_eq!(err, GatewayError::ServerNotConfigured("c".to_string()));
        assert_eq!(factory.connects(), 0);
        assert_eq!(registry.server_state("c").await, ServerState::Uninitialized);
        assert!(registry.ready_servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_entry_fails_at_initialization() {
        let factory = Arc::new(StubFactory::new());
        let broken = ServerConfig {
            name: "broken".to_string(),
            invalid: Some("invalid type: string, expected a sequence".to_string()),
            ..Default::default()
        };
        let registry = registry(&factory, vec![broken, server("ok")]);

        assert_eq!(registry.server_names(), vec!["broken", "ok"]);
        let err = registry.ensure_client("broken").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Initialization);
        assert!(err.to_string().contains("expected a sequence"));
        assert_eq!(factory.connects(), 0);
        assert_eq!(registry.server_state("broken").await, ServerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_disabled_server_is_refused() {
        let factory = Arc::new(StubFactory::new());
        let mut cfg = server("off");
        cfg.disabled = true;
        let registry = registry(&factory, vec![cfg]);

        let err = registry.ensure_client("off").await.unwrap_err();
        assert_eq!(err, GatewayError::ServerDisabled("off".to_string()));
        assert_eq!(factory.connects(), 0);
    }

    #[tokio::test]
    async fn test_disabled_tools_are_hidden() {
        let factory = Arc::new(
            StubFactory::new().with_server("a", vec![StubTool::echo("keep"), StubTool::echo("drop")]),
        );
        let mut cfg = server("a");
        cfg.disabled_tools = vec!["drop".to_string()];
        let registry = registry(&factory, vec![cfg]);

        let entry = registry.ensure_client("a").await.unwrap();
        assert_eq!(entry.catalog().names(), vec!["keep"]);
    }

    #[tokio::test]
    async fn test_slow_server_does_not_block_others() {
        let factory = Arc::new(
            StubFactory::new()
                .with_server("fast", vec![StubTool::echo("x")])
                .with_connect_delay("slow", Duration::from_millis(500)),
        );
        let registry = registry(&factory, vec![server("slow"), server("fast")]);

        let slow = tokio::spawn({
            let registry = registry.clone();
            async move { registry.ensure_client("slow").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.server_state("slow").await, ServerState::Initializing);

        let fast = tokio::time::timeout(Duration::from_millis(200), registry.ensure_client("fast")).await;
        assert!(fast.unwrap().is_ok());

        assert!(slow.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_init_timeout_discards_attempt() {
        let factory = Arc::new(StubFactory::new().with_connect_delay("a", Duration::from_secs(5)));
        let registry = ClientRegistry::with_init_timeout(
            catalog(vec![server("a")]),
            factory.clone(),
            Duration::from_millis(50),
        );

        let err = registry.ensure_client("a").await.unwrap_err();
        assert_eq!(err, GatewayError::Timeout);
        assert_eq!(registry.server_state("a").await, ServerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_abandoned_wait_still_publishes() {
        let factory = Arc::new(
            StubFactory::new()
                .with_server("a", vec![StubTool::echo("x")])
                .with_connect_delay("a", Duration::from_millis(100)),
        );
        let registry = registry(&factory, vec![server("a")]);

        let waited = tokio::time::timeout(Duration::from_millis(10), registry.ensure_client("a")).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(registry.server_state("a").await, ServerState::Ready);
        registry.ensure_client("a").await.unwrap();
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn test_evict_forces_reinitialization() {
        let factory = Arc::new(StubFactory::new().with_server("a", vec![StubTool::echo("x")]));
        let registry = registry(&factory, vec![server("a")]);

        let first = registry.ensure_client("a").await.unwrap();
        assert!(registry.evict("a").await);
        assert!(!registry.evict("a").await);
        assert_eq!(factory.shutdowns(), 1);

        let second = registry.ensure_client("a").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.connects(), 2);
    }

    #[tokio::test]
    async fn test_eviction_during_initialization_is_not_published() {
        let factory = Arc::new(
            StubFactory::new()
                .with_server("a", vec![StubTool::echo("x")])
                .with_connect_delay("a", Duration::from_millis(100)),
        );
        let registry = registry(&factory, vec![server("a")]);

        let pending = tokio::spawn({
            let registry = registry.clone();
            async move { registry.ensure_client("a").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.evict("a").await);

        let result = pending.await.unwrap();
        assert!(result.is_err());
        assert_eq!(registry.server_state("a").await, ServerState::Uninitialized);
        assert_eq!(factory.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_client() {
        let factory = Arc::new(
            StubFactory::new()
                .with_server("a", vec![StubTool::echo("x")])
                .with_server("b", vec![StubTool::echo("y")]),
        );
        let registry = registry(&factory, vec![server("a"), server("b")]);

        registry.ensure_client("b").await.unwrap();
        registry.ensure_client("a").await.unwrap();
        assert_eq!(registry.ready_servers().await, vec!["a", "b"]);

        registry.shutdown().await;

        assert_eq!(factory.shutdowns(), 2);
        assert!(registry.ready_servers().await.is_empty());
    }
}
