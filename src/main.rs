use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::connect_info::IntoMakeServiceWithConnectInfo;
use clap::Parser;
use dnswarden::config::ConfigStore;
use dnswarden::manager::Manager;
use dnswarden::server::{doh, http};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port for the DNS proxy. Overrides the persisted config.
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the persisted JSON config document.
    #[arg(short, long, default_value = "data/dns-config.json")]
    config: PathBuf,

    /// Address the control/DoH HTTP server binds to.
    #[arg(long, default_value = "0.0.0.0:8053")]
    http_addr: SocketAddr,

    /// Skip starting the UDP listener on launch; control it via the API.
    #[arg(long, default_value_t = false)]
    no_start: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();

    let config = ConfigStore::new(args.config);
    let bus = Arc::new(dnswarden::bus::EventBus::new());
    bus.spawn_heartbeat();

    let manager = Arc::new(Manager::new(config, Arc::clone(&bus)));

    let state = http::AppState { manager: Arc::clone(&manager), bus: Arc::clone(&bus) };
    let app = http::router(state).merge(doh::router(manager.resolver()));
    let make_service: IntoMakeServiceWithConnectInfo<_, SocketAddr> =
        app.into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(args.http_addr).await?;
    tracing::info!(addr = %args.http_addr, "control/doh http server listening");
    let http_handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, make_service).await {
            tracing::error!(%err, "http server exited with error");
        }
    });

    if !args.no_start {
        if let Err(err) = manager.start(args.port).await {
            tracing::error!(%err, "manager failed to start on launch");
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    manager.stop().await;
    http_handle.abort();

    Ok(())
}
