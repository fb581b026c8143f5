//! Error taxonomy shared by the registry, the dispatcher and the HTTP layer.

use thiserror::Error;

/// Broad class of a [`GatewayError`], used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is incomplete.
    BadRequest,
    /// Unknown or disabled server, or a config problem.
    Configuration,
    /// A templated secret was never filled in.
    Credential,
    /// Client construction or tool enumeration failed.
    Initialization,
    ToolNotFound,
    /// The tool or the transport failed mid-call.
    Invocation,
    Timeout,
}

/// Errors produced by the gateway core.
///
/// `Clone` so that one in-flight initialization result can be handed to
/// every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("server not configured: {0}")]
    ServerNotConfigured(String),

    #[error("server is disabled: {0}")]
    ServerDisabled(String),

    #[error("unresolved credential placeholder for key {key} (server {server})")]
    UnresolvedCredential { server: String, key: String },

    #[error("initialization error: {0}")]
    Initialization(String),

    #[error("tool not found: {tool} (server {server})")]
    ToolNotFound { server: String, tool: String },

    #[error("{0}")]
    Invocation(String),

    #[error("timeout")]
    Timeout,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingField(_) | Self::InvalidBody(_) => ErrorKind::BadRequest,
            Self::ServerNotConfigured(_) | Self::ServerDisabled(_) => ErrorKind::Configuration,
            Self::UnresolvedCredential { .. } => ErrorKind::Credential,
            Self::Initialization(_) => ErrorKind::Initialization,
            Self::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            Self::Invocation(_) => ErrorKind::Invocation,
            Self::Timeout => ErrorKind::Timeout,
        }
    }

    pub fn initialization(err: impl std::fmt::Display) -> Self {
        Self::Initialization(err.to_string())
    }

    pub fn invocation(err: impl std::fmt::Display) -> Self {
        Self::Invocation(err.to_string())
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
