// ABOUTME: Sendspin player binary
// ABOUTME: Plays a sender's stream in sync, writing raw PCM to a file, stdout or nowhere

use clap::Parser;
use sendspin::player::{Player, PlayerArgs};

#[derive(Parser, Debug)]
#[command(name = "sendspin")]
#[command(author, version, about = "Sendspin synchronized audio player", long_about = None)]
struct Args {
    #[command(flatten)]
    player: PlayerArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    args.player.init_tracing();
    args.player.log_startup_info();

    let output = args.player.create_output()?;
    let player = Player::with_output(args.player.build_config(), output);
    if let Some(addr) = player.start().await? {
        tracing::info!("Listening on ws://{}{}", addr, player.config().path);
    }

    let reporter = player.clone();
    let report_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            for session in reporter.sessions() {
                tracing::info!(
                    "Server {} ({}): roles={:?}, format={:?}, time exchanges={}, rate={:.6}",
                    session.server_name.as_deref().unwrap_or("?"),
                    session.server_id.as_deref().unwrap_or("?"),
                    session.active_roles.names(),
                    session.format,
                    session.time_exchanges,
                    session.rate
                );
            }
        }
    });

    tracing::info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    report_task.abort();
    player.stop().await;
    Ok(())
}
