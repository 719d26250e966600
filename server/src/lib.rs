//! # Territory Control Server
//!
//! Authoritative server for a two-team, grid-based territory game. Red and
//! Blue players pick a class, move across procedurally generated terrain,
//! fight or heal within line of sight, and contest five control points.
//! A team wins by holding every point, or by holding more points when the
//! match clock runs out; a new match starts after a short intermission.
//!
//! ## Architecture
//!
//! ### Single Owner
//! All match state lives in one [`game::World`]. The network loop owns it and
//! applies connection events, player intents and scheduler ticks one at a
//! time, so no two mutations ever interleave. Each call returns an
//! [`game::Outbox`] describing which packets go to whom.
//!
//! ### Injected Time
//! Cooldowns, respawns, capture progress and the match clock read time through
//! [`clock::Clock`]. Tests drive the world with a [`clock::ManualClock`].
//!
//! ### UDP Transport
//! Clients exchange `bincode` encoded [`shared::Packet`]s over UDP. Background
//! tasks receive packets, send queued packets and expire silent clients.
//!
//! ## Module Organization
//!
//! - `game`: world state, team membership, intent dispatch
//! - `combat`: team joins, class selection, movement and actions
//! - `scheduler`: per-tick capture, clock, victory, respawn and restart
//! - `spatial`: walkability, occupancy, distance, line of sight
//! - `client_manager`: connection table and heartbeat timeouts
//! - `network`: the UDP server loop
//! - `audit`: optional JSON-lines history of match events
//! - `clock`, `config`: time source and simulation settings
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::audit::AuditLog;
//! use server::clock::SystemClock;
//! use server::config::GameConfig;
//! use server::game::World;
//! use server::network::Server;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let world = World::new(GameConfig::default(), Arc::new(SystemClock), 7, AuditLog::disabled());
//!     let mut server = Server::new(
//!         "127.0.0.1:3000",
//!         Duration::from_millis(1000),
//!         64,
//!         Duration::from_secs(30),
//!         world,
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod client_manager;
pub mod clock;
pub mod combat;
pub mod config;
pub mod game;
pub mod network;
pub mod scheduler;
pub mod spatial;
