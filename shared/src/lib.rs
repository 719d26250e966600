//! Protocol and game rules shared between the territory server and its clients.
//!
//! Everything a client needs to render the same world as the server lives
//! here: grid and balance constants, the class table, the deterministic terrain
//! generator and the wire `Packet` enum.

pub mod classes;
pub mod terrain;

pub use classes::{ClassDef, ClassKind, Effect, Team};
pub use terrain::{generate, Grid, Terrain, TerrainError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PROTOCOL_VERSION: u32 = 1;

pub const GRID_WIDTH: i32 = 30;
pub const GRID_HEIGHT: i32 = 20;
/// Width of each team's spawn band, counted from its edge of the map
pub const HOME_COLUMNS: i32 = 4;
pub const MAX_PLAYERS_PER_TEAM: usize = 20;

pub const GAME_DURATION_SECS: u64 = 30 * 60;
pub const RESTART_DELAY_MS: u64 = 30_000;
pub const RESPAWN_DELAY_MS: u64 = 10_000;
pub const TICK_INTERVAL_MS: u64 = 1000;

pub const CAPTURE_RADIUS: f64 = 2.0;

/// Control point ids and cells
pub const CONTROL_POINTS: [(char, i32, i32); 5] = [
    ('A', 15, 10),
    ('B', 7, 5),
    ('C', 22, 5),
    ('D', 7, 15),
    ('E', 22, 15),
];

/// Reasons an intent was refused. Sent only to the requesting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum ActionError {
    #[error("invalid team")]
    TeamInvalid,
    #[error("team is full")]
    TeamFull,
    #[error("must join a team first")]
    NoTeam,
    #[error("invalid class")]
    ClassInvalid,
    #[error("invalid move")]
    InvalidMove,
    #[error("action on cooldown")]
    OnCooldown,
    #[error("target out of range")]
    OutOfRange,
    #[error("no line of sight")]
    NoLineOfSight,
    #[error("no target at that cell")]
    NoTarget,
    #[error("target already at full health")]
    TargetFullHealth,
    #[error("invalid target")]
    InvalidTarget,
    #[error("not available")]
    NotAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Public view of a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: u32,
    pub team: Team,
    pub class: ClassKind,
    pub x: i32,
    pub y: i32,
    pub health: u32,
    pub is_dead: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackTarget {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    pub team: Team,
}

/// Capture progress per team, in percent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureProgress {
    pub red: f32,
    pub blue: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub id: char,
    pub x: i32,
    pub y: i32,
    pub controlling_team: Option<Team>,
    pub capture_progress: CaptureProgress,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub red: u32,
    pub blue: u32,
}

impl Scores {
    pub fn increment(&mut self, team: Team) {
        match team {
            Team::Red => self.red += 1,
            Team::Blue => self.blue += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamCounts {
    pub red: u32,
    pub blue: u32,
}

/// The one serialized view of match state, reused by every packet that
/// carries it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub game_id: u64,
    pub in_progress: bool,
    pub time_remaining: u64,
    pub control_points: Vec<ControlPoint>,
    pub scores: Scores,
    pub team_counts: TeamCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Attack,
    Heal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub kind: ActionKind,
    pub target_id: u32,
    /// Damage dealt or health restored
    pub amount: u32,
    pub killed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    Team(Team),
    Tie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MoveResult {
    Moved {
        x: i32,
        y: i32,
        move_targets: Vec<Cell>,
        attack_targets: Vec<AttackTarget>,
    },
    Rejected {
        reason: ActionError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    // Client to server
    Connect {
        client_version: u32,
    },
    Heartbeat,
    Disconnect,
    JoinTeam {
        team: String,
    },
    SelectClass {
        class_name: String,
    },
    Move {
        x: i32,
        y: i32,
    },
    Act {
        x: i32,
        y: i32,
    },
    RequestMoveTargets,
    RequestAttackTargets,
    RequestGameState,
    RegenerateTerrain,

    // Server to client
    Connected {
        client_id: u32,
    },
    Disconnected {
        reason: String,
    },
    TeamJoined {
        team: Team,
    },
    TeamCounts(TeamCounts),
    ClassSelected {
        class: ClassKind,
        x: i32,
        y: i32,
        health: u32,
        move_targets: Vec<Cell>,
        attack_targets: Vec<AttackTarget>,
    },
    IntentRejected {
        reason: ActionError,
    },
    GameState {
        snapshot: WorldSnapshot,
        terrain: Grid,
        players: Vec<PlayerView>,
    },
    GameUpdate(WorldSnapshot),
    PlayerJoined(PlayerView),
    PlayerLeft {
        id: u32,
    },
    PlayerMoved {
        id: u32,
        x: i32,
        y: i32,
    },
    PlayerRespawned(PlayerView),
    PlayerMoveResult(MoveResult),
    MoveTargets(Vec<Cell>),
    AttackTargets(Vec<AttackTarget>),
    ActionConfirmed {
        outcome: ActionOutcome,
        move_targets: Vec<Cell>,
        attack_targets: Vec<AttackTarget>,
    },
    ActionResult {
        source_id: u32,
        outcome: ActionOutcome,
    },
    ActionFailed {
        reason: ActionError,
    },
    PointCaptured {
        point_id: char,
        team: Team,
    },
    Respawn {
        x: i32,
        y: i32,
        health: u32,
    },
    NewGame {
        snapshot: WorldSnapshot,
        terrain: Grid,
    },
    GameEnd {
        winner: Winner,
        red_score: u32,
        blue_score: u32,
        control_points: Vec<ControlPoint>,
    },
    TerrainUpdated(Grid),
}

impl Packet {
    /// True for packets a client may send
    pub fn is_client_intent(&self) -> bool {
        matches!(
            self,
            Packet::Connect { .. }
                | Packet::Heartbeat
                | Packet::Disconnect
                | Packet::JoinTeam { .. }
                | Packet::SelectClass { .. }
                | Packet::Move { .. }
                | Packet::Act { .. }
                | Packet::RequestMoveTargets
                | Packet::RequestAttackTargets
                | Packet::RequestGameState
                | Packet::RegenerateTerrain
        )
    }
}
