//! Routes `(server, tool)` calls to the registry's cached catalogs.

use std::time::Duration;

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::client::{JsonObject, ToolDescriptor};
use crate::error::{GatewayError, GatewayResult};
use crate::normalize::normalize;
use crate::registry::ClientRegistry;

/// Default bound on one invocation, initialization included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// One tool call as received from a front end.
#[derive(Debug, Clone, Default)]
pub struct InvocationRequest {
    pub server_name: String,
    pub tool_name: String,
    pub args: JsonObject,
    /// Overrides the dispatcher's call timeout when set.
    pub timeout: Option<Duration>,
}

impl InvocationRequest {
    pub fn new(server_name: impl Into<String>, tool_name: impl Into<String>, args: JsonObject) -> Self {
        Self {
            server_name: server_name.into(),
            tool_name: tool_name.into(),
            args,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of [`ToolDispatcher::invoke`].
///
/// Serializes as `{"success": true, "result": ...}` or
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Success { value: Value },
    Failure { error: GatewayError },
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success { value } => Some(value),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&GatewayError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }
}

impl From<GatewayResult<Value>> for InvocationResult {
    fn from(result: GatewayResult<Value>) -> Self {
        match result {
            Ok(value) => Self::Success { value },
            Err(error) => Self::Failure { error },
        }
    }
}

impl Serialize for InvocationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("InvocationResult", 2)?;
        match self {
            Self::Success { value } => {
                s.serialize_field("success", &true)?;
                s.serialize_field("result", value)?;
            }
            Self::Failure { error } => {
                s.serialize_field("success", &false)?;
                s.serialize_field("error", &error.to_string())?;
            }
        }
        s.end()
    }
}

/// Resolves tools against the registry and calls them.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: ClientRegistry,
    call_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: ClientRegistry) -> Self {
        Self::with_call_timeout(registry, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_call_timeout(registry: ClientRegistry, call_timeout: Duration) -> Self {
        Self {
            registry,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn list_server_names(&self) -> Vec<String> {
        self.registry.server_names()
    }

    /// The server's cached tool catalog, initializing the server if needed.
    pub async fn list_tools(&self, server_name: &str) -> GatewayResult<Vec<ToolDescriptor>> {
        if server_name.is_empty() {
            return Err(GatewayError::MissingField("server_name"));
        }

        let entry = tokio::time::timeout(self.call_timeout, self.registry.ensure_client(server_name))
            .await
            .map_err(|_| GatewayError::Timeout)??;
        Ok(entry.catalog().descriptors())
    }

    /// Call a tool; every failure is reported in the returned value.
    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        self.try_invoke(request).await.into()
    }

    /// Like [`ToolDispatcher::invoke`] but as a plain `Result`.
    pub async fn try_invoke(&self, request: InvocationRequest) -> GatewayResult<Value> {
        let InvocationRequest {
            server_name,
            tool_name,
            args,
            timeout,
        } = request;

        if server_name.is_empty() {
            return Err(GatewayError::MissingField("server_name"));
        }
        if tool_name.is_empty() {
            return Err(GatewayError::MissingField("tool_name"));
        }

        let limit = timeout.unwrap_or(self.call_timeout);
        match tokio::time::timeout(limit, self.dispatch(&server_name, &tool_name, args)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Call to `{tool_name}` on `{server_name}` timed out after {limit:?}");
                Err(GatewayError::Timeout)
            }
        }
    }

    async fn dispatch(&self, server_name: &str, tool_name: &str, args: JsonObject) -> GatewayResult<Value> {
        let entry = self.registry.ensure_client(server_name).await?;

        let tool = entry
            .catalog()
            .find(tool_name)
            .cloned()
            .ok_or_else(|| GatewayError::ToolNotFound {
                server: server_name.to_string(),
                tool: tool_name.to_string(),
            })?;

        debug!("Invoking `{tool_name}` on `{server_name}`");
        let raw = tool.invoke(args).await.map_err(|e| {
            error!("Error executing tool `{tool_name}` on `{server_name}`: {e:#}");
            GatewayError::invocation(format!("{e:#}"))
        })?;

        Ok(normalize(raw))
    }
}
