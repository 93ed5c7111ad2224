// ABOUTME: Ticker that drives every client's audio stream
// ABOUTME: Runs a chunk-interval loop until the shutdown signal flips

use crate::server::client_manager::ClientManager;
use crate::sync::MonotonicClock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Audio engine
///
/// Each tick asks every client to send the audio that falls due within the
/// next interval. Clients keep their own timelines, so a late tick only
/// makes the next one send more.
pub struct AudioEngine {
    clients: Arc<ClientManager>,
    clock: MonotonicClock,
    chunk_interval: Duration,
}

impl AudioEngine {
    /// Create a new audio engine
    pub fn new(clients: Arc<ClientManager>, clock: MonotonicClock, chunk_interval_ms: u64) -> Self {
        Self {
            clients,
            clock,
            chunk_interval: Duration::from_millis(chunk_interval_ms.max(1)),
        }
    }

    /// Chunk interval
    pub fn chunk_interval(&self) -> Duration {
        self.chunk_interval
    }

    /// Run the loop; spawn this as its own task
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.chunk_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!(
            "audio engine started: {} ms chunks",
            self.chunk_interval.as_millis()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("audio engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Send one interval of audio to every client
    pub fn tick(&self) {
        let now = self.clock.now_us();
        let interval_us = self.chunk_interval.as_micros() as u64;
        for client in self.clients.clients() {
            client.pump(now, interval_us);
        }
    }
}

/// Spawn an audio engine task
pub fn spawn_audio_engine(
    clients: Arc<ClientManager>,
    clock: MonotonicClock,
    chunk_interval_ms: u64,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = AudioEngine::new(clients, clock, chunk_interval_ms);
    let handle = tokio::spawn(async move { engine.run(shutdown_rx).await });
    (handle, shutdown_tx)
}
