use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use mcp_gateway::{GatewayConfig, InvocationRequest, JsonObject, create_dispatcher};

#[derive(Parser)]
#[command(name = "mcp-gateway")]
#[command(about = "HTTP gateway for configured MCP tool servers")]
struct Cli {
    /// Path to the `mcpServers` JSON document
    #[arg(long, global = true, env = "MCP_GATEWAY_CONFIG")]
    config: Option<PathBuf>,
    /// Seconds allowed for connecting to a server and listing its tools
    #[arg(long, global = true, default_value_t = 30, env = "MCP_GATEWAY_INIT_TIMEOUT")]
    init_timeout_secs: u64,
    /// Default seconds allowed for one tool call
    #[arg(long, global = true, default_value_t = 120, env = "MCP_GATEWAY_CALL_TIMEOUT")]
    call_timeout_secs: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        #[arg(short, long, default_value = "5006", env = "MCP_GATEWAY_PORT")]
        port: u16,
        #[arg(long, default_value = "127.0.0.1", env = "MCP_GATEWAY_BIND")]
        bind: String,
    },
    /// Print configured server names
    Servers,
    /// Print a server's tools as JSON
    Tools { server: String },
    /// Call a tool and print the JSON response
    Call {
        server: String,
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("mcp_gateway=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let dispatcher = create_dispatcher(&GatewayConfig {
        config_path: cli.config,
        init_timeout: Duration::from_secs(cli.init_timeout_secs),
        call_timeout: Duration::from_secs(cli.call_timeout_secs),
    });

    match cli.command {
        Commands::Serve { port, bind } => {
            let app = mcp_gateway::api::create_router(dispatcher.clone());
            let listener = tokio::net::TcpListener::bind((bind.as_str(), port)).await?;

            info!("Gateway listening on http://{}", listener.local_addr()?);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            dispatcher.registry().shutdown().await;
        }
        Commands::Servers => {
            for name in dispatcher.list_server_names() {
                println!("{name}");
            }
        }
        Commands::Tools { server } => {
            let tools = dispatcher.list_tools(&server).await;
            dispatcher.registry().shutdown().await;
            println!("{}", serde_json::to_string_pretty(&tools?)?);
        }
        Commands::Call { server, tool, args } => {
            let args: JsonObject = serde_json::from_str(&args)?;
            let result = dispatcher
                .invoke(InvocationRequest::new(server, tool, args))
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            dispatcher.registry().shutdown().await;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
