//! Authoritative world state and intent dispatch
//!
//! [`World`] is the single owned aggregate for a running match. The server
//! loop owns exactly one and feeds it connection events, player intents and
//! ticks one at a time; every call returns an [`Outbox`] of packets for the
//! network layer to deliver. Validation lives in `combat`, per-tick evolution
//! in `scheduler`, pure geometry in `spatial`.

use crate::audit::{AuditEvent, AuditLog};
use crate::clock::Clock;
use crate::config::GameConfig;
use crate::scheduler::CapturePoint;
use crate::spatial;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::{
    ActionError, AttackTarget, Cell, ClassDef, ClassKind, Grid, MoveResult, Packet, PlayerView,
    Scores, Team, TeamCounts, WorldSnapshot, CONTROL_POINTS,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: u32,
    pub team: Team,
    pub class: ClassKind,
    pub x: i32,
    pub y: i32,
    pub health: u32,
    pub is_dead: bool,
    pub respawn_at: Option<u64>,
    pub last_action_at: Option<u64>,
}

impl Player {
    pub fn spawn(id: u32, team: Team, class: ClassKind, cell: Cell) -> Self {
        Self {
            id,
            team,
            class,
            x: cell.x,
            y: cell.y,
            health: class.def().max_health,
            is_dead: false,
            respawn_at: None,
            last_action_at: None,
        }
    }

    pub fn def(&self) -> &'static ClassDef {
        self.class.def()
    }

    pub fn cell(&self) -> Cell {
        Cell::new(self.x, self.y)
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id,
            team: self.team,
            class: self.class,
            x: self.x,
            y: self.y,
            health: self.health,
            is_dead: self.is_dead,
        }
    }
}

/// Players keyed by connection id. Ordered so that every scan over the
/// roster visits players in the same sequence.
pub type Roster = BTreeMap<u32, Player>;

/// Team membership, used for size limits and counts only
#[derive(Debug, Clone, Default)]
pub struct Teams {
    red: Vec<u32>,
    blue: Vec<u32>,
}

impl Teams {
    fn members_mut(&mut self, team: Team) -> &mut Vec<u32> {
        match team {
            Team::Red => &mut self.red,
            Team::Blue => &mut self.blue,
        }
    }

    pub fn members(&self, team: Team) -> &[u32] {
        match team {
            Team::Red => &self.red,
            Team::Blue => &self.blue,
        }
    }

    pub fn len(&self, team: Team) -> usize {
        self.members(team).len()
    }

    pub fn contains(&self, team: Team, id: u32) -> bool {
        self.members(team).contains(&id)
    }

    /// Adds `id` to `team`. Returns false if it was already a member.
    pub fn insert(&mut self, team: Team, id: u32) -> bool {
        let members = self.members_mut(team);
        if members.contains(&id) {
            return false;
        }
        members.push(id);
        true
    }

    /// Removes `id` from both teams
    pub fn remove(&mut self, id: u32) {
        self.red.retain(|&m| m != id);
        self.blue.retain(|&m| m != id);
    }

    pub fn counts(&self) -> TeamCounts {
        TeamCounts {
            red: self.red.len() as u32,
            blue: self.blue.len() as u32,
        }
    }

    pub fn clear(&mut self) {
        self.red.clear();
        self.blue.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    InProgress,
    /// Match over; the next one starts on the first tick at or after `restart_at`
    Ended { restart_at: u64 },
}

/// Where an outbound packet goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Client(u32),
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub packet: Packet,
}

/// Packets produced while handling one event, in emission order
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<Outbound>,
}

impl Outbox {
    pub fn send(&mut self, client_id: u32, packet: Packet) {
        self.messages.push(Outbound {
            to: Recipient::Client(client_id),
            packet,
        });
    }

    pub fn broadcast(&mut self, packet: Packet) {
        self.messages.push(Outbound {
            to: Recipient::All,
            packet,
        });
    }

    pub fn append(&mut self, other: Outbox) {
        self.messages.extend(other.messages);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outbound> {
        self.messages.iter()
    }

    /// Every packet `client_id` would receive, direct or broadcast
    pub fn received_by(&self, client_id: u32) -> impl Iterator<Item = &Packet> {
        self.messages
            .iter()
            .filter(move |m| m.to == Recipient::Client(client_id) || m.to == Recipient::All)
            .map(|m| &m.packet)
    }

    pub fn broadcasts(&self) -> impl Iterator<Item = &Packet> {
        self.messages
            .iter()
            .filter(|m| m.to == Recipient::All)
            .map(|m| &m.packet)
    }
}

impl IntoIterator for Outbox {
    type Item = Outbound;
    type IntoIter = std::vec::IntoIter<Outbound>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

/// A player request, stripped of transport concerns
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    JoinTeam(String),
    SelectClass(String),
    Move { x: i32, y: i32 },
    Act { x: i32, y: i32 },
    RequestMoveTargets,
    RequestAttackTargets,
    RequestGameState,
    RegenerateTerrain,
}

impl Intent {
    /// Maps gameplay packets onto intents. Connection management and
    /// server-to-client packets yield None.
    pub fn from_packet(packet: Packet) -> Option<Intent> {
        match packet {
            Packet::JoinTeam { team } => Some(Intent::JoinTeam(team)),
            Packet::SelectClass { class_name } => Some(Intent::SelectClass(class_name)),
            Packet::Move { x, y } => Some(Intent::Move { x, y }),
            Packet::Act { x, y } => Some(Intent::Act { x, y }),
            Packet::RequestMoveTargets => Some(Intent::RequestMoveTargets),
            Packet::RequestAttackTargets => Some(Intent::RequestAttackTargets),
            Packet::RequestGameState => Some(Intent::RequestGameState),
            Packet::RegenerateTerrain => Some(Intent::RegenerateTerrain),
            _ => None,
        }
    }
}

pub struct World {
    pub(crate) config: GameConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rng: StdRng,
    pub(crate) audit: AuditLog,

    pub(crate) game_id: u64,
    pub(crate) seed: String,
    pub(crate) terrain: Grid,
    pub(crate) players: Roster,
    pub(crate) control_points: Vec<CapturePoint>,
    pub(crate) scores: Scores,
    pub(crate) teams: Teams,
    /// Team chosen by each connection, before and after class selection
    pub(crate) selections: HashMap<u32, Team>,
    pub(crate) start_time: u64,
    pub(crate) time_remaining: u64,
    pub(crate) phase: Phase,
}

impl World {
    pub fn new(config: GameConfig, clock: Arc<dyn Clock>, rng_seed: u64, audit: AuditLog) -> Self {
        let mut world = Self {
            config,
            clock,
            rng: StdRng::seed_from_u64(rng_seed),
            audit,
            game_id: 0,
            seed: String::new(),
            terrain: Grid::filled(0, 0, shared::Terrain::Open),
            players: Roster::new(),
            control_points: Vec::new(),
            scores: Scores::default(),
            teams: Teams::default(),
            selections: HashMap::new(),
            start_time: 0,
            time_remaining: 0,
            phase: Phase::InProgress,
        };
        world.start_game();
        world
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Resets every field for a fresh match
    pub(crate) fn start_game(&mut self) {
        let now = self.now();
        self.game_id = now;
        self.seed = self
            .config
            .first_seed
            .take()
            .unwrap_or_else(|| now.to_string());
        self.terrain = shared::generate(&self.seed);
        self.players.clear();
        self.teams.clear();
        self.selections.clear();
        self.scores = Scores::default();
        self.control_points = CONTROL_POINTS
            .iter()
            .map(|&(id, x, y)| CapturePoint::new(id, x, y))
            .collect();
        self.start_time = now;
        self.time_remaining = self.config.game_duration_secs();
        self.phase = Phase::InProgress;

        info!(
            "Game {} started with terrain seed {:?}, {} control points",
            self.game_id,
            self.seed,
            self.control_points.len()
        );
        self.audit.record(
            now,
            AuditEvent::GameStarted {
                game_id: self.game_id,
                seed: self.seed.clone(),
            },
        );
    }

    pub fn game_id(&self) -> u64 {
        self.game_id
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn terrain(&self) -> &Grid {
        &self.terrain
    }

    pub fn players(&self) -> &Roster {
        &self.players
    }

    pub fn player(&self, id: u32) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn scores(&self) -> Scores {
        self.scores
    }

    pub fn teams(&self) -> &Teams {
        &self.teams
    }

    pub fn team_counts(&self) -> TeamCounts {
        self.teams.counts()
    }

    pub fn control_points(&self) -> &[CapturePoint] {
        &self.control_points
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn in_progress(&self) -> bool {
        self.phase == Phase::InProgress
    }

    pub fn time_remaining(&self) -> u64 {
        self.time_remaining
    }

    pub fn selected_team(&self, id: u32) -> Option<Team> {
        self.selections.get(&id).copied()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            game_id: self.game_id,
            in_progress: self.in_progress(),
            time_remaining: self.time_remaining,
            control_points: self.control_points.iter().map(CapturePoint::view).collect(),
            scores: self.scores,
            team_counts: self.teams.counts(),
        }
    }

    pub fn player_views(&self) -> Vec<PlayerView> {
        self.players.values().map(Player::view).collect()
    }

    fn game_state_packet(&self) -> Packet {
        Packet::GameState {
            snapshot: self.snapshot(),
            terrain: self.terrain.clone(),
            players: self.player_views(),
        }
    }

    pub(crate) fn new_game_packet(&self) -> Packet {
        Packet::NewGame {
            snapshot: self.snapshot(),
            terrain: self.terrain.clone(),
        }
    }

    pub(crate) fn ensure_in_progress(&self) -> Result<(), ActionError> {
        if self.in_progress() {
            Ok(())
        } else {
            Err(ActionError::NotAvailable)
        }
    }

    /// Moves a player can make right now; empty for unknown or dead players
    pub fn move_targets(&self, id: u32) -> Vec<Cell> {
        match self.players.get(&id) {
            Some(player) => spatial::valid_move_targets(&self.terrain, &self.players, player),
            None => Vec::new(),
        }
    }

    pub fn attack_targets(&self, id: u32) -> Vec<AttackTarget> {
        match self.players.get(&id) {
            Some(player) => spatial::valid_attack_targets(&self.terrain, &self.players, player),
            None => Vec::new(),
        }
    }

    /// Picks a random free cell in the team's home band
    pub(crate) fn spawn_cell(&mut self, team: Team, for_id: u32) -> Option<Cell> {
        let cells = spatial::free_home_cells(&self.terrain, &self.players, team, Some(for_id));
        cells.choose(&mut self.rng).copied()
    }

    /// A new connection gets the full state and current team sizes
    pub fn connect(&mut self, id: u32) -> Outbox {
        let mut out = Outbox::default();
        out.send(id, self.game_state_packet());
        out.send(id, Packet::TeamCounts(self.teams.counts()));
        out
    }

    /// Idempotent cleanup for a lost or closed connection
    pub fn disconnect(&mut self, id: u32) -> Outbox {
        let mut out = Outbox::default();
        self.teams.remove(id);
        self.selections.remove(&id);

        if self.players.remove(&id).is_some() {
            info!("Player {} left game {}", id, self.game_id);
            self.audit.record(
                self.now(),
                AuditEvent::PlayerLeft {
                    game_id: self.game_id,
                    player_id: id,
                },
            );
            out.broadcast(Packet::PlayerLeft { id });
        }
        out.broadcast(Packet::TeamCounts(self.teams.counts()));
        out
    }

    pub fn handle_intent(&mut self, id: u32, intent: Intent) -> Outbox {
        let mut out = Outbox::default();

        match intent {
            Intent::JoinTeam(team) => match self.assign_team(id, &team) {
                Ok(assignment) => {
                    if assignment.dropped_player {
                        out.broadcast(Packet::PlayerLeft { id });
                    }
                    out.send(
                        id,
                        Packet::TeamJoined {
                            team: assignment.team,
                        },
                    );
                    out.broadcast(Packet::TeamCounts(self.teams.counts()));
                }
                Err(reason) => {
                    debug!("Client {} could not join {:?}: {}", id, team, reason);
                    out.send(id, Packet::IntentRejected { reason });
                }
            },

            Intent::SelectClass(class_name) => match self.select_class(id, &class_name) {
                Ok(view) => {
                    out.send(
                        id,
                        Packet::ClassSelected {
                            class: view.class,
                            x: view.x,
                            y: view.y,
                            health: view.health,
                            move_targets: self.move_targets(id),
                            attack_targets: self.attack_targets(id),
                        },
                    );
                    out.broadcast(Packet::PlayerJoined(view));
                }
                Err(reason) => {
                    debug!("Client {} could not select {:?}: {}", id, class_name, reason);
                    out.send(id, Packet::IntentRejected { reason });
                }
            },

            Intent::Move { x, y } => match self.move_player(id, x, y) {
                Ok(cell) => {
                    out.send(
                        id,
                        Packet::PlayerMoveResult(MoveResult::Moved {
                            x: cell.x,
                            y: cell.y,
                            move_targets: self.move_targets(id),
                            attack_targets: self.attack_targets(id),
                        }),
                    );
                    out.broadcast(Packet::PlayerMoved {
                        id,
                        x: cell.x,
                        y: cell.y,
                    });
                }
                Err(reason) => {
                    debug!("Client {} move to ({}, {}) rejected: {}", id, x, y, reason);
                    out.send(id, Packet::PlayerMoveResult(MoveResult::Rejected { reason }));
                }
            },

            Intent::Act { x, y } => match self.act(id, x, y) {
                Ok(outcome) => {
                    out.send(
                        id,
                        Packet::ActionConfirmed {
                            outcome: outcome.clone(),
                            move_targets: self.move_targets(id),
                            attack_targets: self.attack_targets(id),
                        },
                    );
                    out.broadcast(Packet::ActionResult {
                        source_id: id,
                        outcome,
                    });
                }
                Err(reason) => {
                    debug!("Client {} action at ({}, {}) failed: {}", id, x, y, reason);
                    out.send(id, Packet::ActionFailed { reason });
                }
            },

            Intent::RequestMoveTargets => {
                if self.players.contains_key(&id) {
                    out.send(id, Packet::MoveTargets(self.move_targets(id)));
                }
            }

            Intent::RequestAttackTargets => {
                if self.players.contains_key(&id) {
                    out.send(id, Packet::AttackTargets(self.attack_targets(id)));
                }
            }

            Intent::RequestGameState => {
                out.send(id, self.game_state_packet());
            }

            Intent::RegenerateTerrain => {
                if let Err(reason) = self.ensure_in_progress() {
                    out.send(id, Packet::IntentRejected { reason });
                    return out;
                }
                info!("Terrain regeneration requested by client {}", id);
                let relocated = self.regenerate_terrain();
                out.broadcast(Packet::TerrainUpdated(self.terrain.clone()));
                for (player_id, cell) in relocated {
                    out.broadcast(Packet::PlayerMoved {
                        id: player_id,
                        x: cell.x,
                        y: cell.y,
                    });
                }
            }
        }

        out
    }

    /// Replaces the terrain with one from a fresh seed. Live players left on
    /// cells that are no longer walkable are moved to their home band;
    /// returns those moves.
    pub fn regenerate_terrain(&mut self) -> Vec<(u32, Cell)> {
        self.seed = self.now().to_string();
        self.terrain = shared::generate(&self.seed);

        let stranded: Vec<(u32, Team)> = self
            .players
            .values()
            .filter(|p| !p.is_dead && !spatial::is_walkable(&self.terrain, p.x, p.y))
            .map(|p| (p.id, p.team))
            .collect();

        let mut relocated = Vec::new();
        for (id, team) in stranded {
            if let Some(cell) = self.spawn_cell(team, id) {
                if let Some(player) = self.players.get_mut(&id) {
                    player.x = cell.x;
                    player.y = cell.y;
                    relocated.push((id, cell));
                }
            }
        }

        info!(
            "Terrain regenerated with seed {:?}, {} players relocated",
            self.seed,
            relocated.len()
        );
        relocated
    }
}
