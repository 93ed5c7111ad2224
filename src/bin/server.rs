// ABOUTME: Sendspin server binary
// ABOUTME: Streams a test tone to players, listening or connecting out

use clap::Parser;
use sendspin::server::{SendspinServer, ServerArgs};

#[derive(Parser, Debug)]
#[command(name = "sendspin-server")]
#[command(author, version, about = "Sendspin streaming audio server", long_about = None)]
struct Args {
    #[command(flatten)]
    server: ServerArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    args.server.init_tracing();
    args.server.log_startup_info();

    let server = SendspinServer::with_config(args.server.build_config());
    if let Some(addr) = server.start().await? {
        tracing::info!("Listening on ws://{}{}", addr, server.config().ws_path);
    }

    let client_manager = server.client_manager();
    let report_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            let clients = client_manager.infos();
            if clients.is_empty() {
                continue;
            }
            tracing::info!("Connected clients: {}", clients.len());
            for client in clients {
                tracing::info!(
                    "  - {} ({}): roles={:?}, playing={}, volume={:?}, muted={:?}",
                    client.name.as_deref().unwrap_or("?"),
                    client.client_id.as_deref().unwrap_or("?"),
                    client.roles.names(),
                    client.playing,
                    client.volume,
                    client.muted
                );
            }
        }
    });

    tracing::info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    report_task.abort();
    server.stop().await;
    Ok(())
}
