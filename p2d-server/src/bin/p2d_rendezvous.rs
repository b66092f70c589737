use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, Level};

use p2d_server::{ws_handler, Registry};

#[derive(Parser, Debug)]
#[command(name = "p2d-rendezvous")]
#[command(about = "Rendezvous server for p2d full-mesh rooms", long_about = None)]
struct Args {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Listen port
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Verbose logging
    #[arg(short, long, action)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Initializing rendezvous server...");

    let registry = Registry::spawn();

    // Browser clients connect from arbitrary origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(registry);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!("Rendezvous server listening on ws://{addr}/ws");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
