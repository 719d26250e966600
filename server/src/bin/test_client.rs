//! Scripted bot for smoke testing a running server.
//!
//! Connects, joins a team, picks a class and then wanders: every few
//! seconds it asks for its move targets, steps to one at random and attacks
//! or heals whoever it can reach.

use bincode::{deserialize, serialize};
use clap::Parser;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use shared::{MoveResult, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:3000")]
    server: String,

    /// Team to join
    #[arg(short, long, default_value = "red")]
    team: String,

    /// Class to play
    #[arg(short, long, default_value = "fighter")]
    class: String,

    /// Seconds between moves
    #[arg(long, default_value = "3")]
    step_secs: u64,

    /// Number of moves before disconnecting
    #[arg(long, default_value = "20")]
    steps: u32,
}

async fn send(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&serialize(packet)?, addr).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = args.server.parse()?;
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Client socket bound to {}", socket.local_addr()?);

    send(
        &socket,
        &Packet::Connect {
            client_version: PROTOCOL_VERSION,
        },
        server_addr,
    )
    .await?;

    let mut buffer = vec![0u8; 65536];
    let mut step = interval(Duration::from_secs(args.step_secs.max(1)));
    step.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut heartbeat = interval(Duration::from_secs(5));
    let mut rng = rand::thread_rng();
    let mut steps_taken = 0;

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buffer) => {
                let (len, _) = received?;
                let packet = match deserialize::<Packet>(&buffer[..len]) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Failed to deserialize packet: {}", e);
                        continue;
                    }
                };

                match packet {
                    Packet::Connected { client_id } => {
                        info!("Connected as client {}", client_id);
                        send(&socket, &Packet::JoinTeam { team: args.team.clone() }, server_addr).await?;
                    }
                    Packet::Disconnected { reason } => {
                        warn!("Disconnected by server: {}", reason);
                        return Ok(());
                    }
                    Packet::TeamJoined { team } => {
                        info!("Joined {} team", team);
                        send(&socket, &Packet::SelectClass { class_name: args.class.clone() }, server_addr).await?;
                    }
                    Packet::ClassSelected { class, x, y, health, .. } => {
                        info!("Playing {} at ({}, {}) with {} health", class, x, y, health);
                    }
                    Packet::IntentRejected { reason } => warn!("Request rejected: {}", reason),
                    Packet::MoveTargets(targets) => {
                        if let Some(cell) = targets.choose(&mut rng) {
                            send(&socket, &Packet::Move { x: cell.x, y: cell.y }, server_addr).await?;
                        }
                    }
                    Packet::PlayerMoveResult(MoveResult::Moved { x, y, attack_targets, .. }) => {
                        debug!("Moved to ({}, {})", x, y);
                        if let Some(target) = attack_targets.first() {
                            send(&socket, &Packet::Act { x: target.x, y: target.y }, server_addr).await?;
                        }
                    }
                    Packet::PlayerMoveResult(MoveResult::Rejected { reason }) => {
                        debug!("Move rejected: {}", reason);
                    }
                    Packet::ActionConfirmed { outcome, .. } => {
                        info!("{:?} on player {} for {}", outcome.kind, outcome.target_id, outcome.amount);
                    }
                    Packet::ActionFailed { reason } => debug!("Action failed: {}", reason),
                    Packet::Respawn { x, y, health } => {
                        info!("Respawned at ({}, {}) with {} health", x, y, health);
                    }
                    Packet::PointCaptured { point_id, team } => {
                        info!("Point {} captured by {}", point_id, team);
                    }
                    Packet::GameEnd { winner, red_score, blue_score, .. } => {
                        info!("Game over: {:?} (red {}, blue {})", winner, red_score, blue_score);
                    }
                    Packet::NewGame { snapshot, .. } => {
                        info!("New game {} started, rejoining", snapshot.game_id);
                        send(&socket, &Packet::JoinTeam { team: args.team.clone() }, server_addr).await?;
                    }
                    Packet::GameUpdate(snapshot) => {
                        debug!("{}s left, red {} blue {}", snapshot.time_remaining, snapshot.scores.red, snapshot.scores.blue);
                    }
                    other => debug!("Received {:?}", other),
                }
            }

            _ = step.tick() => {
                if steps_taken >= args.steps {
                    break;
                }
                steps_taken += 1;
                send(&socket, &Packet::RequestMoveTargets, server_addr).await?;
            }

            _ = heartbeat.tick() => {
                send(&socket, &Packet::Heartbeat, server_addr).await?;
            }
        }
    }

    send(&socket, &Packet::Disconnect, server_addr).await?;
    info!("Test client finished");
    Ok(())
}
