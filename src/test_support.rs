//! In-process stand-ins for the transport, used by unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::client::{JsonObject, Tool, ToolClient, ToolClientFactory};
use crate::config::{ServerCatalog, ServerConfig};

pub(crate) enum StubOutput {
    /// Returns the arguments it was given.
    Echo,
    Value(Value),
    Error(String),
    Slow(Duration, Value),
}

pub(crate) struct StubTool {
    name: String,
    output: StubOutput,
    calls: AtomicUsize,
}

impl StubTool {
    pub(crate) fn new(name: &str, output: StubOutput) -> Self {
        Self {
            name: name.to_string(),
            output,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn echo(name: &str) -> Self {
        Self::new(name, StubOutput::Echo)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "stub tool"
    }

    fn args_schema(&self) -> JsonObject {
        JsonObject::new()
    }

    async fn invoke(&self, args: JsonObject) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.output {
            StubOutput::Echo => Ok(Value::Object(args)),
            StubOutput::Value(v) => Ok(v.clone()),
            StubOutput::Error(msg) => Err(anyhow::anyhow!("{msg}")),
            StubOutput::Slow(delay, v) => {
                tokio::time::sleep(*delay).await;
                Ok(v.clone())
            }
        }
    }
}

struct StubClient {
    tools: Vec<Arc<StubTool>>,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolClient for StubClient {
    async fn list_tools(&self) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        Ok(self
            .tools
            .iter()
            .map(|t| t.clone() as Arc<dyn Tool>)
            .collect())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory that counts constructions and can be slowed down or made to fail.
#[derive(Default)]
pub(crate) struct StubFactory {
    servers: HashMap<String, Vec<Arc<StubTool>>>,
    connects: AtomicUsize,
    connect_delay: HashMap<String, Duration>,
    /// Error message and how many connects fail before one succeeds.
    fail_connect: Option<(String, usize)>,
    shutdowns: Arc<AtomicUsize>,
}

impl StubFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_server(mut self, name: &str, tools: Vec<StubTool>) -> Self {
        self.servers
            .insert(name.to_string(), tools.into_iter().map(Arc::new).collect());
        self
    }

    pub(crate) fn with_connect_delay(mut self, name: &str, delay: Duration) -> Self {
        self.connect_delay.insert(name.to_string(), delay);
        self
    }

    pub(crate) fn failing(self, msg: &str) -> Self {
        self.failing_first(usize::MAX, msg)
    }

    pub(crate) fn failing_first(mut self, times: usize, msg: &str) -> Self {
        self.fail_connect = Some((msg.to_string(), times));
        self
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Total tool invocations across every server.
    pub(crate) fn invocations(&self) -> usize {
        self.servers.values().flatten().map(|t| t.calls()).sum()
    }
}

#[async_trait]
impl ToolClientFactory for StubFactory {
    async fn connect(&self, config: &ServerConfig) -> anyhow::Result<Arc<dyn ToolClient>> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay.get(&config.name) {
            tokio::time::sleep(*delay).await;
        }
        if let Some((msg, times)) = &self.fail_connect {
            if attempt < *times {
                anyhow::bail!("{msg}");
            }
        }
        let tools = self.servers.get(&config.name).cloned().unwrap_or_default();
        Ok(Arc::new(StubClient {
            tools,
            shutdowns: self.shutdowns.clone(),
        }))
    }
}

pub(crate) fn server(name: &str) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        command: Some(format!("{name}-server")),
        ..Default::default()
    }
}

pub(crate) fn server_with_env(name: &str, key: &str, value: &str) -> ServerConfig {
    let mut cfg = server(name);
    cfg.env.insert(key.to_string(), value.to_string());
    cfg
}

pub(crate) fn catalog(servers: Vec<ServerConfig>) -> Arc<ServerCatalog> {
    Arc::new(ServerCatalog::from_servers(servers))
}

pub(crate) fn args(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

pub(crate) fn names_payload() -> Value {
    json!("- names:\n  - foo\n  - bar")
}
