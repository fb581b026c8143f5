// REST API endpoints for the gateway

use axum::{
    Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::JsonObject;
use crate::dispatcher::{InvocationRequest, InvocationResult, ToolDispatcher};
use crate::error::{ErrorKind, GatewayError};

pub type AppState = ToolDispatcher;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/servers", get(list_servers))
        .route("/tools", get(list_tools))
        .route("/send_command", post(send_command))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "ready_servers": state.registry().ready_servers().await,
    }))
}

async fn list_servers(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.list_server_names())
}

#[derive(Debug, Deserialize)]
struct ToolsQuery {
    server: Option<String>,
}

async fn list_tools(State(state): State<AppState>, Query(query): Query<ToolsQuery>) -> Response {
    let server = query.server.unwrap_or_default();
    match state.list_tools(&server).await {
        Ok(tools) => Json(tools).into_response(),
        Err(e) => (status_for(&e), Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct SendCommandBody {
    #[serde(default, alias = "serverName")]
    server_name: Option<String>,
    #[serde(default, alias = "toolName")]
    tool_name: Option<String>,
    #[serde(default, alias = "argumentMap")]
    args: Option<JsonObject>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

async fn send_command(
    State(state): State<AppState>,
    payload: Result<Json<SendCommandBody>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            let result = InvocationResult::Failure {
                error: GatewayError::InvalidBody(rejection.body_text()),
            };
            return (StatusCode::BAD_REQUEST, Json(result)).into_response();
        }
    };

    let mut request = InvocationRequest::new(
        body.server_name.unwrap_or_default(),
        body.tool_name.unwrap_or_default(),
        body.args.unwrap_or_default(),
    );
    if let Some(ms) = body.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    let result = state.invoke(request).await;
    let status = match &result {
        InvocationResult::Success { .. } => StatusCode::OK,
        InvocationResult::Failure { error } => status_for(error),
    };
    (status, Json(result)).into_response()
}

fn status_for(error: &GatewayError) -> StatusCode {
    match error.kind() {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Configuration if matches!(error, GatewayError::ServerDisabled(_)) => StatusCode::FORBIDDEN,
        ErrorKind::Configuration | ErrorKind::ToolNotFound => StatusCode::NOT_FOUND,
        ErrorKind::Credential => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Initialization | ErrorKind::Invocation => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}
