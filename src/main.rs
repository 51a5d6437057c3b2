//! boxgate daemon entrypoint
//!
//! Wires configuration, the application context, the recovery sweep,
//! the retention loop, and the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use boxgate::config::Args;
use boxgate::context::AppContext;
use boxgate::routes::create_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("boxgate={}", args.log_level).parse()?),
        )
        .init();

    if let Err(e) = args.validate() {
        error!("invalid configuration: {e}");
        std::process::exit(1);
    }

    info!("Starting boxgate");
    info!("Listen: {}", args.listen);
    info!("Database: {}", args.sqlite_path.display());
    info!("Provisioner: {}", args.provisioner_path.display());

    let ctx = Arc::new(AppContext::open(&args).await?);

    // Re-arm destruction for sessions that survived a restart
    if args.recover_on_start {
        match ctx.scheduler.recover().await {
            Ok(0) => {}
            Ok(n) => info!(sessions = n, "recovery sweep re-armed destruction"),
            Err(e) => warn!("recovery sweep failed: {e}"),
        }
    }

    // Periodic retention sweep for terminal sessions
    {
        let store = Arc::clone(&ctx.store);
        let retention_days = args.retention_days;
        let interval = Duration::from_secs(args.cleanup_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = store.purge_older_than(retention_days).await {
                    warn!("retention sweep failed: {e}");
                }
            }
        });
    }

    let router = create_router(Arc::clone(&ctx));
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!("boxgate listening on {}", args.listen);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ctx.close();
    info!("boxgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install ctrl-c handler: {e}");
    }
    info!("shutdown signal received");
}
