use shared::{
    GAME_DURATION_SECS, MAX_PLAYERS_PER_TEAM, RESPAWN_DELAY_MS, RESTART_DELAY_MS,
};
use std::time::Duration;

/// Simulation knobs. `Default` gives the standard match rules.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Length of a match
    pub game_duration: Duration,
    /// Pause between the end of a match and the next one
    pub restart_delay: Duration,
    pub respawn_delay: Duration,
    pub max_per_team: usize,
    /// Terrain seed for the first match. Later matches always use a fresh seed.
    pub first_seed: Option<String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            game_duration: Duration::from_secs(GAME_DURATION_SECS),
            restart_delay: Duration::from_millis(RESTART_DELAY_MS),
            respawn_delay: Duration::from_millis(RESPAWN_DELAY_MS),
            max_per_team: MAX_PLAYERS_PER_TEAM,
            first_seed: None,
        }
    }
}

impl GameConfig {
    pub fn game_duration_secs(&self) -> u64 {
        self.game_duration.as_secs()
    }

    pub fn respawn_delay_ms(&self) -> u64 {
        self.respawn_delay.as_millis() as u64
    }

    pub fn restart_delay_ms(&self) -> u64 {
        self.restart_delay.as_millis() as u64
    }
}
