use clap::Parser;
use fileshare_server::auth::Auth;
use fileshare_server::blocklist::BlockList;
use fileshare_server::config::Config;
use fileshare_server::disk::DiskProbe;
use fileshare_server::ftp::FtpEngine;
use fileshare_server::http::{routes, AppState};
use fileshare_server::pathguard::PathGuard;
use fileshare_server::proxy::ProxyBridge;
use fileshare_server::ratelimit::RateLimiter;
use fileshare_server::settings::Settings;
use fileshare_server::stats::Stats;
use fileshare_server::streamer::Streamer;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = Config::parse();

    let guard = match PathGuard::new(&config.path).await {
        Ok(guard) => Arc::new(guard),
        Err(err) => {
            error!(path = %config.path.display(), error = %err, "share path does not exist or is not accessible");
            std::process::exit(1);
        }
    };

    let fileshare_dir = guard.root().join(".fileshare");
    if let Err(err) = tokio::fs::create_dir_all(&fileshare_dir).await {
        error!(error = %err, "failed to create .fileshare state directory");
        std::process::exit(1);
    }

    let mut defaults = serde_json::Map::new();
    defaults.insert("uploads".to_string(), json!({"maxFileSizeBytes": 10u64 * 1024 * 1024 * 1024, "directoryQuotaBytes": 0}));
    defaults.insert("haproxy".to_string(), json!({"proxyProtocolV2": config.proxy_bridge_port.is_some()}));

    let auth = Auth::init(&fileshare_dir).await;
    let blocklist = Arc::new(BlockList::init(&fileshare_dir).await);
    let settings = Arc::new(Settings::init(&fileshare_dir, defaults).await);
    let stats = Arc::new(Stats::new());
    let rate_limiter = Arc::new(RateLimiter::new());
    let disk = Arc::new(DiskProbe::new());
    let streamer = Arc::new(Streamer::init(fileshare_dir.join("cache/hls"), config.transcoder_binary.clone()));

    let streamer_janitor = streamer.clone();
    tokio::spawn(async move {
        streamer_janitor.run_janitor().await;
    });

    let state = AppState {
        guard: guard.clone(),
        blocklist: blocklist.clone(),
        auth: auth.clone(),
        stats: stats.clone(),
        rate_limiter,
        settings,
        streamer: streamer.clone(),
        disk,
    };

    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(http_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr = %http_addr, error = %err, "failed to bind HTTP port");
            std::process::exit(1);
        }
    };
    info!(addr = %http_addr, "http server listening");

    let router = routes::build(state).into_make_service_with_connect_info::<SocketAddr>();
    let http_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            error!(error = %err, "http server terminated");
        }
    });

    let ftp_addr = SocketAddr::from(([0, 0, 0, 0], config.ftp_port));
    let ftp_engine = FtpEngine::new(ftp_addr, guard.clone(), blocklist.clone(), auth.clone(), stats.clone(), config.pasv_port_min, config.pasv_port_max, config.anonymous_read, config.lan_ip.clone());
    tokio::spawn(async move {
        if let Err(err) = ftp_engine.run().await {
            error!(error = %err, "ftp engine terminated");
        }
    });

    if let Some(bridge_port) = config.proxy_bridge_port {
        let bridge_addr = SocketAddr::from(([0, 0, 0, 0], bridge_port));
        let upstream_addr = SocketAddr::from(([127, 0, 0, 1], config.port));
        let bridge = ProxyBridge::new(bridge_addr, upstream_addr);
        tokio::spawn(async move {
            if let Err(err) = bridge.run().await {
                error!(error = %err, "proxy bridge terminated");
            }
        });
    }

    tokio::signal::ctrl_c().await.expect("failed to listen for shutdown signal");
    info!("shutdown signal received, flushing state");
    auth.flush().await;
    streamer.shutdown_cleanup();
    http_task.abort();
}
