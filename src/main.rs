//! MCP session gateway
//!
//! Serves the streamable HTTP transport on a single endpoint and multiplexes
//! any number of independent MCP sessions over it.

use clap::{Args, Parser, Subcommand};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use mcp_gateway::config::{
    secs_to_option, GatewayConfig, DEFAULT_BIND, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_PATH,
    DEFAULT_SSE_KEEP_ALIVE_SECS,
};
use mcp_gateway::http::{GatewayService, OriginCheckService};
use mcp_gateway::server::{DefaultCapabilities, McpTransportFactory};
use mcp_gateway::session::Router;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mcp-gateway", version, about = "Session-multiplexing MCP gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway over streamable HTTP (default)
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address (e.g., 127.0.0.1:3000)
    #[arg(long, default_value = DEFAULT_BIND)]
    bind: String,
    /// Endpoint path
    #[arg(long, default_value = DEFAULT_PATH)]
    path: String,
    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_SSE_KEEP_ALIVE_SECS)]
    sse_keep_alive_secs: u64,
    /// Close sessions idle for this many seconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    idle_timeout_secs: u64,
    /// Allowed Origin values (comma-separated). Defaults to localhost only.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "http://localhost,http://127.0.0.1"
    )]
    allow_origin: Vec<String>,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            path: DEFAULT_PATH.to_string(),
            sse_keep_alive_secs: DEFAULT_SSE_KEEP_ALIVE_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            allow_origin: vec![
                "http://localhost".to_string(),
                "http://127.0.0.1".to_string(),
            ],
        }
    }
}

impl ServeArgs {
    fn into_config(self) -> anyhow::Result<GatewayConfig> {
        let bind: SocketAddr = self
            .bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;
        if !self.path.starts_with('/') {
            anyhow::bail!("endpoint path must start with '/': {}", self.path);
        }
        let allowed_origins: HashSet<String> = self
            .allow_origin
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(GatewayConfig {
            bind,
            path: self.path,
            sse_keep_alive: secs_to_option(self.sse_keep_alive_secs),
            idle_timeout: secs_to_option(self.idle_timeout_secs),
            allowed_origins,
            ..GatewayConfig::default()
        })
    }
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays clean for tooling.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mcp_gateway=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => run_server(args.into_config()?),
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

fn run_server(config: GatewayConfig) -> anyhow::Result<()> {
    info!("Starting MCP gateway (streamable HTTP)");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create tokio runtime: {e}"))?;

    let result = rt.block_on(serve(Arc::new(config)));
    if let Err(err) = &result {
        error!("HTTP server error: {err}");
    }
    info!("Server stopped");
    result
}

async fn serve(config: Arc<GatewayConfig>) -> anyhow::Result<()> {
    let router = Arc::new(Router::new(
        McpTransportFactory::new(config.clone()),
        DefaultCapabilities,
    ));
    let service = GatewayService::new(router.clone(), config.path.as_str());
    let service = OriginCheckService::new(service, Arc::new(config.allowed_origins.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed: {e}"))?;
    info!("MCP gateway listening on http://{}{}", config.bind, config.path);

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            cancel_for_signal.cancel();
        } else {
            info!("Shutdown signal handler failed; server will continue running");
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(sessions = router.registry().len(), "HTTP server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept failed: {e}");
                        continue;
                    }
                };
                let svc = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new()
                        .serve_connection(io, TowerToHyperService::new(svc));
                    if let Err(err) = conn.await {
                        tracing::debug!(%peer, "http connection error: {err}");
                    }
                });
            }
        }
    }

    router.shutdown();
    Ok(())
}
