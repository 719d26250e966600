//! Fixed-rate evolution of the match: capture progress, the match clock,
//! victory, respawns and the restart after a finished match.

use crate::audit::AuditEvent;
use crate::game::{Outbox, Phase, World};
use crate::spatial;
use log::{debug, info};
use shared::{
    CaptureProgress, Cell, ControlPoint, Packet, Team, Winner, CAPTURE_RADIUS,
};
use std::cmp::Ordering;

/// Ticks of uncontested majority needed to capture a point
pub const CAPTURE_TICKS: u32 = 60;
/// Progress lost per tick by a team without the majority
pub const DECAY_PER_TICK: u32 = 2;

/// Server-side control point. Progress is counted in whole ticks so that
/// exactly `CAPTURE_TICKS` gaining ticks complete a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePoint {
    pub id: char,
    pub x: i32,
    pub y: i32,
    pub controlling_team: Option<Team>,
    red: u32,
    blue: u32,
}

impl CapturePoint {
    pub fn new(id: char, x: i32, y: i32) -> Self {
        Self {
            id,
            x,
            y,
            controlling_team: None,
            red: 0,
            blue: 0,
        }
    }

    pub fn cell(&self) -> Cell {
        Cell::new(self.x, self.y)
    }

    pub fn progress(&self, team: Team) -> u32 {
        match team {
            Team::Red => self.red,
            Team::Blue => self.blue,
        }
    }

    fn progress_mut(&mut self, team: Team) -> &mut u32 {
        match team {
            Team::Red => &mut self.red,
            Team::Blue => &mut self.blue,
        }
    }

    pub fn percent(&self, team: Team) -> f32 {
        self.progress(team) as f32 * 100.0 / CAPTURE_TICKS as f32
    }

    pub fn view(&self) -> ControlPoint {
        ControlPoint {
            id: self.id,
            x: self.x,
            y: self.y,
            controlling_team: self.controlling_team,
            capture_progress: CaptureProgress {
                red: self.percent(Team::Red),
                blue: self.percent(Team::Blue),
            },
        }
    }

    /// Advances one tick given the number of live players of each team in
    /// range. Returns the team that captured the point on this tick.
    pub fn step(&mut self, red: usize, blue: usize) -> Option<Team> {
        match red.cmp(&blue) {
            Ordering::Greater => self.advance(Team::Red),
            Ordering::Less => self.advance(Team::Blue),
            Ordering::Equal => {
                self.red = self.red.saturating_sub(DECAY_PER_TICK);
                self.blue = self.blue.saturating_sub(DECAY_PER_TICK);
                None
            }
        }
    }

    fn advance(&mut self, team: Team) -> Option<Team> {
        let gained = self.progress_mut(team);
        *gained = (*gained + 1).min(CAPTURE_TICKS);
        let other = self.progress_mut(team.opponent());
        *other = other.saturating_sub(DECAY_PER_TICK);

        if self.progress(team) >= CAPTURE_TICKS && self.controlling_team != Some(team) {
            self.controlling_team = Some(team);
            *self.progress_mut(team) = CAPTURE_TICKS;
            *self.progress_mut(team.opponent()) = 0;
            return Some(team);
        }
        None
    }
}

impl World {
    /// One scheduler tick. During a match this updates every control
    /// point, the clock and victory, then revives players whose timer ran
    /// out. After a match it only waits for the restart time.
    pub fn tick(&mut self) -> Outbox {
        let mut out = Outbox::default();
        let now = self.now();

        if let Phase::Ended { restart_at } = self.phase {
            if now >= restart_at {
                self.start_game();
                out.broadcast(self.new_game_packet());
                out.broadcast(Packet::TeamCounts(self.teams.counts()));
            }
            return out;
        }

        self.update_control_points(now, &mut out);
        self.update_clock(now);

        let sweep = self.team_controlling_all();
        if self.time_remaining == 0 || sweep.is_some() {
            self.end_game(now, &mut out);
            return out;
        }

        self.respawn_due(now, &mut out);
        out.broadcast(Packet::GameUpdate(self.snapshot()));

        if self.time_remaining % 60 == 0 {
            info!(
                "Game {}: {}s left, red {} blue {}, {} players",
                self.game_id,
                self.time_remaining,
                self.scores.red,
                self.scores.blue,
                self.players.len()
            );
        }
        out
    }

    fn update_control_points(&mut self, now: u64, out: &mut Outbox) {
        for index in 0..self.control_points.len() {
            let center = self.control_points[index].cell();
            let (mut red, mut blue) = (0, 0);
            for player in self.players.values().filter(|p| !p.is_dead) {
                if spatial::distance(center, player.cell()) <= CAPTURE_RADIUS {
                    match player.team {
                        Team::Red => red += 1,
                        Team::Blue => blue += 1,
                    }
                }
            }

            let point = &mut self.control_points[index];
            let captured = point.step(red, blue);
            if red > 0 || blue > 0 {
                debug!(
                    "Point {} - red {} blue {}, progress R {:.1}% B {:.1}%",
                    point.id,
                    red,
                    blue,
                    point.percent(Team::Red),
                    point.percent(Team::Blue)
                );
            }

            if let Some(team) = captured {
                let point_id = point.id;
                self.scores.increment(team);
                info!("{} team captured point {}", team, point_id);
                self.audit.record(
                    now,
                    AuditEvent::Capture {
                        game_id: self.game_id,
                        point_id,
                        team,
                    },
                );
                out.broadcast(Packet::PointCaptured { point_id, team });
            }
        }
    }

    fn update_clock(&mut self, now: u64) {
        let elapsed_secs = now.saturating_sub(self.start_time) / 1000;
        self.time_remaining = self.config.game_duration_secs().saturating_sub(elapsed_secs);
    }

    pub fn controlled_by(&self, team: Team) -> usize {
        self.control_points
            .iter()
            .filter(|p| p.controlling_team == Some(team))
            .count()
    }

    fn team_controlling_all(&self) -> Option<Team> {
        Team::ALL.into_iter().find(|&team| {
            !self.control_points.is_empty() && self.controlled_by(team) == self.control_points.len()
        })
    }

    /// Team with more controlled points, or a tie
    pub fn leading_team(&self) -> Winner {
        let red = self.controlled_by(Team::Red);
        let blue = self.controlled_by(Team::Blue);
        match red.cmp(&blue) {
            Ordering::Greater => Winner::Team(Team::Red),
            Ordering::Less => Winner::Team(Team::Blue),
            Ordering::Equal => Winner::Tie,
        }
    }

    fn end_game(&mut self, now: u64, out: &mut Outbox) {
        let winner = self.leading_team();
        self.phase = Phase::Ended {
            restart_at: now + self.config.restart_delay_ms(),
        };

        info!(
            "Game {} ended. Winner: {:?}, Red: {}, Blue: {}",
            self.game_id, winner, self.scores.red, self.scores.blue
        );
        self.audit.record(
            now,
            AuditEvent::GameEnded {
                game_id: self.game_id,
                winner,
                scores: self.scores,
                red_team_size: self.teams.len(Team::Red),
                blue_team_size: self.teams.len(Team::Blue),
            },
        );

        out.broadcast(Packet::GameEnd {
            winner,
            red_score: self.scores.red,
            blue_score: self.scores.blue,
            control_points: self.control_points.iter().map(|p| p.view()).collect(),
        });
    }

    fn respawn_due(&mut self, now: u64, out: &mut Outbox) {
        let due: Vec<u32> = self
            .players
            .values()
            .filter(|p| p.is_dead && p.respawn_at.is_some_and(|at| at <= now))
            .map(|p| p.id)
            .collect();

        let mut membership_changed = false;
        for id in due {
            let Some(team) = self.players.get(&id).map(|p| p.team) else {
                continue;
            };
            // No free home cell: try again next tick
            let Some(cell) = self.spawn_cell(team, id) else {
                continue;
            };

            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };
            player.is_dead = false;
            player.respawn_at = None;
            player.health = player.def().max_health;
            player.x = cell.x;
            player.y = cell.y;
            let view = player.view();

            membership_changed |= self.teams.insert(team, id);
            debug!("Player {} respawned at ({}, {})", id, cell.x, cell.y);

            out.send(
                id,
                Packet::Respawn {
                    x: view.x,
                    y: view.y,
                    health: view.health,
                },
            );
            out.broadcast(Packet::PlayerRespawned(view));
        }

        if membership_changed {
            out.broadcast(Packet::TeamCounts(self.teams.counts()));
        }
    }
}
