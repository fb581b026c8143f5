//! Capability traits the registry uses to talk to tool servers.
//!
//! A transport supplies a [`ToolClientFactory`]; each client it builds is
//! scoped to exactly one server and enumerates that server's [`Tool`]s.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ServerConfig;

/// JSON object used for tool arguments and schemas.
pub type JsonObject = Map<String, Value>;

/// Display form of a tool: what `GET /tools` returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub args_schema: JsonObject,
}

/// One invocable operation offered by a tool server.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Advisory argument schema; empty when the server did not publish one.
    fn args_schema(&self) -> JsonObject;

    /// Call the tool with the whole argument map as its single input.
    async fn invoke(&self, args: JsonObject) -> anyhow::Result<Value>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            args_schema: self.args_schema(),
        }
    }
}

/// A live connection to one tool server.
///
/// `list_tools` is called once per initialization. Tools returned from it may
/// be invoked concurrently; a transport that cannot multiplex calls must
/// serialize them itself.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<Arc<dyn Tool>>>;

    /// Release the connection. Tools obtained from this client fail afterwards.
    async fn shutdown(&self) {}
}

/// Builds a [`ToolClient`] for a single server's configuration.
#[async_trait]
pub trait ToolClientFactory: Send + Sync {
    async fn connect(&self, config: &ServerConfig) -> anyhow::Result<Arc<dyn ToolClient>>;
}

/// Ordered tools of one server, fixed at initialization.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolCatalog {
    /// Build a catalog, dropping any tool named in `disabled`.
    pub fn new(tools: Vec<Arc<dyn Tool>>, disabled: &[String]) -> Self {
        let tools = tools
            .into_iter()
            .filter(|t| !disabled.iter().any(|d| d == t.name()))
            .collect();
        Self { tools }
    }

    /// Exact-name lookup.
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
