//! Gateway exposing configured MCP tool servers through one request/response
//! surface: list servers, list a server's tools, call a tool.

mod client;
mod config;
mod dispatcher;
mod error;
mod mcp_client;
mod normalize;
mod registry;
pub mod api;

#[cfg(test)]
mod test_support;

pub use client::{JsonObject, Tool, ToolCatalog, ToolClient, ToolClientFactory, ToolDescriptor};
pub use config::{DEFAULT_CONFIG_FILE, ServerCatalog, ServerConfig, is_placeholder, resolve_config_path};
pub use dispatcher::{DEFAULT_CALL_TIMEOUT, InvocationRequest, InvocationResult, ToolDispatcher};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use mcp_client::{RmcpClientFactory, RmcpTool, RmcpToolClient};
pub use normalize::{STRUCTURED_MARKER, normalize};
pub use registry::{ClientEntry, ClientRegistry, DEFAULT_INIT_TIMEOUT, ServerState};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Runtime settings for [`create_dispatcher`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Explicit config document; see [`resolve_config_path`] when `None`.
    pub config_path: Option<PathBuf>,
    pub init_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Convenience function to build an rmcp-backed dispatcher.
///
/// Loads the server catalog (an unreadable document yields an empty one) and
/// wires a fresh [`ClientRegistry`] into a [`ToolDispatcher`].
pub fn create_dispatcher(config: &GatewayConfig) -> ToolDispatcher {
    let path = resolve_config_path(config.config_path.as_deref());
    let catalog = Arc::new(ServerCatalog::load(&path));

    let registry = ClientRegistry::with_init_timeout(catalog, Arc::new(RmcpClientFactory), config.init_timeout);

    ToolDispatcher::with_call_timeout(registry, config.call_timeout)
}
