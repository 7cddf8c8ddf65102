use clap::Parser;
use log::{info, warn};
use server::config::ServerConfig;
use server::network::Server;
use shared::packets::{register_builtin, CustomEvent, Heartbeat, PerformanceSample, SessionStats};
use shared::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Main-method of the telemetry server.
/// Parses command-line arguments, binds the socket and runs until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// UDP port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Number of workers (0 = one per CPU)
        #[clap(short, long, default_value = "0")]
        workers: usize,
        /// Dispatch queue capacity
        #[clap(long, default_value = "65535")]
        queue_capacity: usize,
        /// How long to wait for queue space before dropping a datagram
        #[clap(long, default_value = "10000")]
        queue_timeout_ms: u64,
        /// Largest accepted datagram in bytes
        #[clap(long, default_value_t = shared::MAX_PACKET_SIZE)]
        max_packet_size: usize,
        /// Require this shared secret as the auth token
        #[clap(long)]
        auth_secret: Option<String>,
        /// Seconds between stats log lines (0 disables)
        #[clap(long, default_value = "30")]
        stats_interval_secs: u64,
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        workers: args.workers,
        queue_capacity: args.queue_capacity,
        queue_timeout: Duration::from_millis(args.queue_timeout_ms),
        max_packet_size: args.max_packet_size,
        auth_secret: args.auth_secret,
        ..ServerConfig::default()
    };

    let mut builder = Registry::builder();
    register_builtin(&mut builder);
    let registry = Arc::new(builder.build());

    let mut server = Server::bind(config, registry).await?;
    server.add_handler(|sender, header, packet| {
        if let Some(heartbeat) = packet.downcast_ref::<Heartbeat>() {
            info!(
                "heartbeat from {} (v{}): session {} sent at {}",
                sender, header.protocol_version, heartbeat.session_id, heartbeat.sent_at_ms
            );
        } else if let Some(stats) = packet.downcast_ref::<SessionStats>() {
            info!(
                "session stats from {}: {} players, {} Hz, {} ms ping",
                sender, stats.player_count, stats.tick_rate, stats.avg_ping_ms
            );
        } else if let Some(sample) = packet.downcast_ref::<PerformanceSample>() {
            info!(
                "performance from {} [{}]: {:.1} fps, {:.2} ms/frame",
                sender, sample.label, sample.fps, sample.frame_time_ms
            );
        } else if let Some(event) = packet.downcast_ref::<CustomEvent>() {
            info!(
                "event '{}' from {} with {} attributes",
                event.name,
                sender,
                event.attributes.len()
            );
        } else {
            info!("packet {} from {}", header.packet_id, sender);
        }
        Ok(())
    });

    if args.stats_interval_secs > 0 {
        let stats = server.stats_handle();
        let period = Duration::from_secs(args.stats_interval_secs);
        tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the first tick since it fires immediately
            timer.tick().await;
            loop {
                timer.tick().await;
                info!("stats: {}", stats.snapshot());
            }
        });
    }

    server
        .run_until_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(err) => warn!("failed to listen for Ctrl+C: {}", err),
            }
        })
        .await;

    Ok(())
}
