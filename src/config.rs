//! Server catalog loaded from an `mcpServers` JSON document.
//!
//! The catalog is built once at startup and is read-only afterwards. A missing
//! or malformed document yields an empty catalog so the gateway keeps serving
//! (every lookup then reports the server as not configured).

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing::{error, info, warn};

/// File looked up in the working directory when nothing else is configured.
pub const DEFAULT_CONFIG_FILE: &str = "mcp_config_file.json";

/// Marker that opens a templated secret, e.g. `<YOUR_GITHUB_TOKEN>`.
const PLACEHOLDER_OPEN: &str = "<YOUR_";

#[derive(Debug, Deserialize)]
struct McpJsonConfig {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: Map<String, Value>,
}

/// Connection configuration for one tool server.
///
/// Apart from `env`, `disabled` and `disabled_tools` the fields are only
/// interpreted by the transport (see [`crate::mcp_client`]).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(skip)]
    pub name: String,

    // stdio server
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, deserialize_with = "lenient_env")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,

    // http server
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    // flags
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, alias = "disabledTools")]
    pub disabled_tools: Vec<String>,

    /// Fields the gateway does not understand, kept for the transport.
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    /// Why the entry could not be decoded. Such a server is still listed,
    /// and initializing it fails with this reason.
    #[serde(skip)]
    pub invalid: Option<String>,
}

/// `env` values that are not strings are passed on in their JSON form;
/// `null` values and a `null` map are dropped.
fn lenient_env<'de, D: Deserializer<'de>>(de: D) -> Result<BTreeMap<String, String>, D::Error> {
    let raw: Option<Map<String, Value>> = Option::deserialize(de)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

impl ServerConfig {
    /// Returns the first `env` key whose value is still an unfilled
    /// `<YOUR_...>` placeholder.
    pub fn unresolved_placeholder(&self) -> Option<&str> {
        self.env
            .iter()
            .find(|(_, value)| is_placeholder(value))
            .map(|(key, _)| key.as_str())
    }

    fn expand(mut self, lookup: &impl Fn(&str) -> Option<String>) -> Self {
        for val in self.env.values_mut() {
            *val = expand_vars(val, lookup);
        }
        for val in self.headers.values_mut() {
            *val = expand_vars(val, lookup);
        }
        if let Some(cmd) = self.command.as_mut() {
            *cmd = expand_vars(cmd, lookup);
        }
        self.args = self.args.iter().map(|a| expand_vars(a, lookup)).collect();
        if let Some(url) = self.url.as_mut() {
            *url = expand_vars(url, lookup);
        }
        self
    }
}

/// `true` when `value` contains `<YOUR_` followed later by `>`.
pub fn is_placeholder(value: &str) -> bool {
    value
        .find(PLACEHOLDER_OPEN)
        .is_some_and(|start| value[start + PLACEHOLDER_OPEN.len()..].contains('>'))
}

/// Substitutes `${NAME}` references; unknown names are left verbatim.
fn expand_vars(input: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            match lookup(&name).filter(|_| closed) {
                Some(val) => out.push_str(&val),
                None => {
                    out.push_str("${");
                    out.push_str(&name);
                    if closed {
                        out.push('}');
                    }
                }
            }
        } else {
            out.push(ch);
        }
    }

    out
}

/// Immutable mapping from server name to its [`ServerConfig`], in document order.
#[derive(Debug, Clone, Default)]
pub struct ServerCatalog {
    servers: Vec<ServerConfig>,
    index: HashMap<String, usize>,
}

impl ServerCatalog {
    /// Build a catalog from already-parsed configs. Later duplicates replace
    /// earlier ones but keep the original position.
    pub fn from_servers(servers: impl IntoIterator<Item = ServerConfig>) -> Self {
        let mut catalog = Self::default();
        for server in servers {
            match catalog.index.get(&server.name) {
                Some(&pos) => catalog.servers[pos] = server,
                None => {
                    catalog.index.insert(server.name.clone(), catalog.servers.len());
                    catalog.servers.push(server);
                }
            }
        }
        catalog
    }

    /// Parse an `{"mcpServers": {...}}` document, expanding `${VAR}` from the
    /// process environment.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        Self::from_json_str_with(raw, |name| env::var(name).ok())
    }

    fn from_json_str_with(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let doc: McpJsonConfig = serde_json::from_str(raw)?;

        let mut servers = Vec::with_capacity(doc.mcp_servers.len());
        for (name, value) in doc.mcp_servers {
            match serde_json::from_value::<ServerConfig>(value) {
                Ok(mut cfg) => {
                    cfg.name = name;
                    servers.push(cfg.expand(&lookup));
                }
                Err(e) => {
                    warn!("MCP server `{name}` has an invalid configuration: {e}");
                    servers.push(ServerConfig {
                        name,
                        invalid: Some(e.to_string()),
                        ..Default::default()
                    });
                }
            }
        }

        Ok(Self::from_servers(servers))
    }

    /// Read and parse the document at `path`.
    pub fn try_load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("could not read {}: {e}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(|e| anyhow::anyhow!("could not decode JSON from {}: {e}", path.display()))
    }

    /// Like [`ServerCatalog::try_load`], but a failure is logged and yields an
    /// empty catalog.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(catalog) => {
                info!("Loaded {} MCP server configurations from {}", catalog.len(), path.display());
                catalog
            }
            Err(e) => {
                error!("Error loading MCP server configuration: {e}");
                Self::default()
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&ServerConfig> {
        self.index.get(name).map(|&pos| &self.servers[pos])
    }

    /// Server names in document order.
    pub fn names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Pick the configuration document: explicit path, `MCP_CONFIG`,
/// `$XDG_CONFIG_HOME/mcp/mcp.json`, then [`DEFAULT_CONFIG_FILE`].
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    if let Ok(p) = env::var("MCP_CONFIG") {
        return PathBuf::from(p);
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("mcp").join("mcp.json");
        if candidate.exists() {
            return candidate;
        }
    }

    PathBuf::from(DEFAULT_CONFIG_FILE)
}
