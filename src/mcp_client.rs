// MCP transport backed by rmcp

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool as McpTool};
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::ServiceExt;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{JsonObject, Tool, ToolClient, ToolClientFactory};
use crate::config::ServerConfig;

type McpService = RunningService<RoleClient, ()>;

/// Connects over a child process when `command` is set, otherwise over
/// streamable HTTP to `url`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmcpClientFactory;

#[async_trait]
impl ToolClientFactory for RmcpClientFactory {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn ToolClient>> {
        let service = match (&config.command, &config.url) {
            (Some(command), _) => start_stdio_service(config, command).await?,
            (None, Some(url)) => start_http_service(config, url).await?,
            (None, None) => bail!("Server `{}` must have either `command` or `url`", config.name),
        };
        Ok(Arc::new(RmcpToolClient::new(config.name.clone(), service)))
    }
}

async fn start_stdio_service(cfg: &ServerConfig, command: &str) -> Result<McpService> {
    info!("Starting MCP stdio service `{}` via rmcp", cfg.name);

    let cmd = Command::new(command).configure(|cmd| {
        cmd.args(&cfg.args).envs(&cfg.env);
        if let Some(cwd) = &cfg.cwd {
            cmd.current_dir(cwd);
        }
    });
    let child = TokioChildProcess::new(cmd)?;

    Ok(().serve(child).await?)
}

async fn start_http_service(cfg: &ServerConfig, url: &str) -> Result<McpService> {
    info!("Starting MCP HTTP service `{}` at `{url}` via rmcp streamable HTTP", cfg.name);

    let mut transport_cfg = StreamableHttpClientTransportConfig::with_uri(url.to_string());
    for (name, value) in &cfg.headers {
        match bearer_token(name, value) {
            Some(token) => transport_cfg = transport_cfg.auth_header(token.to_string()),
            None => warn!("Ignoring unsupported header `{name}` for MCP HTTP service `{}`", cfg.name),
        }
    }
    let transport = StreamableHttpClientTransport::from_config(transport_cfg);

    Ok(().serve(transport).await?)
}

/// Token of an `Authorization: Bearer <token>` header.
fn bearer_token<'a>(name: &str, value: &'a str) -> Option<&'a str> {
    if !name.eq_ignore_ascii_case("authorization") {
        return None;
    }
    value.strip_prefix("Bearer ").map(str::trim)
}

/// One rmcp session. Tools share its [`Peer`], so calls can run concurrently.
pub struct RmcpToolClient {
    server_name: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<McpService>>,
}

impl RmcpToolClient {
    fn new(server_name: String, service: McpService) -> Self {
        Self {
            server_name,
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        }
    }
}

#[async_trait]
impl ToolClient for RmcpToolClient {
    async fn list_tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
        let tools = self.peer.list_tools(Default::default()).await?.tools;
        debug!("Service `{}` listed {} tools", self.server_name, tools.len());

        Ok(tools
            .into_iter()
            .map(|tool| Arc::new(RmcpTool::new(tool, self.peer.clone())) as Arc<dyn Tool>)
            .collect())
    }

    async fn shutdown(&self) {
        if let Some(service) = self.service.lock().await.take() {
            if let Err(e) = service.cancel().await {
                warn!("Error disconnecting from MCP service `{}`: {e}", self.server_name);
            }
        }
    }
}

pub struct RmcpTool {
    name: String,
    description: String,
    input_schema: JsonObject,
    peer: Peer<RoleClient>,
}

impl RmcpTool {
    fn new(tool: McpTool, peer: Peer<RoleClient>) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
            input_schema: (*tool.input_schema).clone(),
            peer,
        }
    }
}

#[async_trait]
impl Tool for RmcpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn args_schema(&self) -> JsonObject {
        self.input_schema.clone()
    }

    async fn invoke(&self, args: JsonObject) -> Result<Value> {
        let request = CallToolRequestParam {
            name: Cow::from(self.name.clone()),
            arguments: Some(args),
            meta: None,
            task: None,
        };

        let resp = self.peer.call_tool(request).await?;
        result_to_value(resp)
    }
}

/// Flatten a tool result into one JSON value.
///
/// Errors become `Err` with the tool's text. Otherwise structured content
/// wins, then all-text content joined by newlines, then the raw content list.
fn result_to_value(result: CallToolResult) -> Result<Value> {
    let texts: Vec<&str> = result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.as_str()))
        .collect();

    if result.is_error.unwrap_or(false) {
        if texts.is_empty() {
            bail!("tool reported an error");
        }
        bail!("{}", texts.join("\n"));
    }

    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }

    if !texts.is_empty() && texts.len() == result.content.len() {
        return Ok(Value::String(texts.join("\n")));
    }

    Ok(serde_json::to_value(&result.content)?)
}
