use clap::Parser;
use client::network::TelemetryClient;
use log::{info, warn};
use rand::Rng;
use shared::packets::{CustomEvent, Heartbeat, PerformanceSample, SessionStats};
use shared::Packet;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to send telemetry to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Auth token placed in every packet header
    #[arg(short = 't', long, default_value = "")]
    token: String,

    /// Protocol version to declare
    #[arg(long, default_value_t = shared::CURRENT_PROTOCOL_VERSION)]
    protocol_version: u64,

    /// Number of packets to send (0 = until Ctrl+C)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// Delay between packets in milliseconds
    #[arg(short = 'i', long, default_value = "100")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let client = TelemetryClient::new(&args.server, args.token.as_bytes())
        .await?
        .with_protocol_version(args.protocol_version);
    let session_id = rand::thread_rng().gen::<u64>();
    info!(
        "Sending telemetry for session {} to {} (protocol v{})",
        session_id,
        client.server_addr(),
        client.protocol_version()
    );

    let mut timer = interval(Duration::from_millis(args.interval_ms.max(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sent = 0u64;
    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                break;
            }
        }

        let packet = sample_packet(session_id, sent);
        match client.send(packet.as_ref()).await {
            Ok(written) => info!("sent packet {} ({} bytes)", packet.id(), written),
            Err(err) => warn!("failed to send packet {}: {}", packet.id(), err),
        }

        sent += 1;
        if args.count > 0 && sent >= args.count {
            break;
        }
    }

    info!("Sent {} packets", sent);
    Ok(())
}

/// Builds a plausible random telemetry packet
fn sample_packet(session_id: u64, sequence: u64) -> Box<dyn Packet> {
    let mut rng = rand::thread_rng();
    match sequence % 4 {
        0 => Box::new(Heartbeat {
            sent_at_ms: unix_millis(),
            session_id,
        }),
        1 => Box::new(SessionStats {
            player_count: rng.gen_range(1..=16),
            tick_rate: 60,
            avg_ping_ms: rng.gen_range(10..150),
        }),
        2 => {
            let frame_time_ms = rng.gen_range(8.0f32..40.0);
            Box::new(PerformanceSample {
                fps: 1000.0 / frame_time_ms,
                frame_time_ms,
                label: "main_loop".to_string(),
            })
        }
        _ => {
            let mut attributes = HashMap::new();
            attributes.insert("sequence".to_string(), sequence.to_string());
            attributes.insert("level".to_string(), rng.gen_range(1..10u32).to_string());
            Box::new(CustomEvent {
                name: "level_loaded".to_string(),
                attributes,
            })
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
