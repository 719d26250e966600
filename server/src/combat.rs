//! Validation and application of single-player intents
//!
//! Each resolver recomputes legality from the stored world state, never from
//! anything the client claims, and either mutates the world and returns what
//! happened or returns the first rule that failed.

use crate::audit::AuditEvent;
use crate::game::{Player, World};
use crate::spatial;
use log::info;
use shared::{ActionError, ActionKind, ActionOutcome, Cell, ClassKind, Effect, PlayerView, Team};

/// Result of a successful team join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamAssignment {
    pub team: Team,
    /// The connection had a player on the other team, which was removed
    pub dropped_player: bool,
}

impl World {
    /// Puts a connection on a team. Re-joining replaces any earlier
    /// membership rather than adding to it.
    pub fn assign_team(&mut self, id: u32, team_name: &str) -> Result<TeamAssignment, ActionError> {
        self.ensure_in_progress()?;
        let team: Team = team_name.parse()?;

        // A dead player stays on its team until the respawn timer runs out
        if self.players.get(&id).is_some_and(|p| p.is_dead && p.team != team) {
            return Err(ActionError::NotAvailable);
        }

        if !self.teams.contains(team, id) && self.teams.len(team) >= self.config.max_per_team {
            return Err(ActionError::TeamFull);
        }

        self.teams.remove(id);
        self.teams.insert(team, id);
        self.selections.insert(id, team);

        let dropped_player = self.players.get(&id).is_some_and(|p| p.team != team);
        if dropped_player {
            self.players.remove(&id);
        }

        let counts = self.teams.counts();
        info!(
            "Client {} joined {} team. Red: {}, Blue: {}",
            id, team, counts.red, counts.blue
        );
        Ok(TeamAssignment {
            team,
            dropped_player,
        })
    }

    /// Spawns the connection's player with the chosen class in its home band
    pub fn select_class(&mut self, id: u32, class_name: &str) -> Result<PlayerView, ActionError> {
        self.ensure_in_progress()?;
        let team = self.selections.get(&id).copied().ok_or(ActionError::NoTeam)?;
        let class: ClassKind = class_name.parse()?;

        if self.players.get(&id).is_some_and(|p| p.is_dead) {
            return Err(ActionError::NotAvailable);
        }

        let cell = self.spawn_cell(team, id).ok_or(ActionError::NotAvailable)?;
        let player = Player::spawn(id, team, class, cell);
        let view = player.view();
        self.players.insert(id, player);
        self.teams.insert(team, id);

        info!(
            "Player {} selected {} on {} team at ({}, {})",
            id, class, team, cell.x, cell.y
        );
        self.audit.record(
            self.now(),
            AuditEvent::PlayerJoined {
                game_id: self.game_id,
                player_id: id,
                team,
                class,
            },
        );
        Ok(view)
    }

    /// Moves a live player to `(x, y)` if that cell is one of its current
    /// valid move targets
    pub fn move_player(&mut self, id: u32, x: i32, y: i32) -> Result<Cell, ActionError> {
        self.ensure_in_progress()?;
        let player = self.players.get(&id).ok_or(ActionError::NotAvailable)?;
        if player.is_dead {
            return Err(ActionError::NotAvailable);
        }

        let target = Cell::new(x, y);
        let targets = spatial::valid_move_targets(&self.terrain, &self.players, player);
        if !targets.contains(&target) {
            return Err(ActionError::InvalidMove);
        }

        if let Some(player) = self.players.get_mut(&id) {
            player.x = x;
            player.y = y;
        }
        Ok(target)
    }

    /// Resolves an attack or heal aimed at the cell `(x, y)`.
    ///
    /// Checks run in a fixed order and the first failure is reported:
    /// actor alive, cooldown, range, line of sight, target present, then
    /// the class's team rule.
    pub fn act(&mut self, id: u32, x: i32, y: i32) -> Result<ActionOutcome, ActionError> {
        self.ensure_in_progress()?;
        let now = self.now();

        let actor = self.players.get(&id).ok_or(ActionError::NotAvailable)?;
        if actor.is_dead {
            return Err(ActionError::NotAvailable);
        }

        let def = actor.def();
        if let Some(last) = actor.last_action_at {
            if now.saturating_sub(last) < def.cooldown_ms {
                return Err(ActionError::OnCooldown);
            }
        }

        let origin = actor.cell();
        let target_cell = Cell::new(x, y);
        if spatial::distance(origin, target_cell) > def.range {
            return Err(ActionError::OutOfRange);
        }
        if !spatial::line_of_sight(&self.terrain, origin, target_cell) {
            return Err(ActionError::NoLineOfSight);
        }

        let target = spatial::occupant(&self.players, x, y).ok_or(ActionError::NoTarget)?;
        if !spatial::can_target(actor, target) {
            return Err(ActionError::InvalidTarget);
        }

        let target_id = target.id;
        let target_max = target.def().max_health;
        let target_health = target.health;

        let outcome = match def.effect {
            Effect::Heal(amount) => {
                if target_health >= target_max {
                    return Err(ActionError::TargetFullHealth);
                }
                if let Some(target) = self.players.get_mut(&target_id) {
                    target.health = (target.health + amount).min(target_max);
                }
                ActionOutcome {
                    kind: ActionKind::Heal,
                    target_id,
                    amount,
                    killed: false,
                }
            }
            Effect::Damage(amount) => {
                let respawn_at = now + self.config.respawn_delay_ms();
                let mut killed = false;
                if let Some(target) = self.players.get_mut(&target_id) {
                    target.health = target.health.saturating_sub(amount);
                    if target.health == 0 {
                        // Team membership is kept until respawn or disconnect
                        target.is_dead = true;
                        target.respawn_at = Some(respawn_at);
                        killed = true;
                    }
                }
                ActionOutcome {
                    kind: ActionKind::Attack,
                    target_id,
                    amount,
                    killed,
                }
            }
        };

        if let Some(actor) = self.players.get_mut(&id) {
            actor.last_action_at = Some(now);
        }

        if outcome.killed {
            info!("Player {} killed player {}", id, target_id);
        }
        self.audit.record(
            now,
            AuditEvent::Action {
                game_id: self.game_id,
                player_id: id,
                target_id,
                kind: outcome.kind,
                amount: outcome.amount,
                killed: outcome.killed,
            },
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::game::tests::{place, test_world};
    use crate::game::Intent;
    use shared::{MoveResult, Packet, TeamCounts};

    #[test]
    fn test_assign_team_rejects_unknown_team() {
        let (mut world, _) = test_world();
        assert_eq!(world.assign_team(1, "green"), Err(ActionError::TeamInvalid));
        assert_eq!(world.team_counts(), TeamCounts::default());
    }

    #[test]
    fn test_assign_team_full() {
        let (mut world, _) = test_world();
        for id in 1..=20 {
            assert!(world.assign_team(id, "red").is_ok());
        }
        assert_eq!(world.assign_team(21, "red"), Err(ActionError::TeamFull));
        // Re-joining one's own full team is not an overflow
        assert!(world.assign_team(5, "red").is_ok());
        assert!(world.assign_team(21, "blue").is_ok());
        assert_eq!(world.team_counts(), TeamCounts { red: 20, blue: 1 });
    }

    #[test]
    fn test_reselecting_team_moves_membership() {
        let (mut world, _) = test_world();
        world.assign_team(1, "red").unwrap();
        world.assign_team(1, "blue").unwrap();
        world.assign_team(1, "blue").unwrap();

        assert_eq!(world.team_counts(), TeamCounts { red: 0, blue: 1 });
        assert_eq!(world.selected_team(1), Some(Team::Blue));
    }

    #[test]
    fn test_switching_team_drops_player() {
        let (mut world, _) = test_world();
        world.assign_team(1, "red").unwrap();
        world.select_class(1, "archer").unwrap();

        let assignment = world.assign_team(1, "blue").unwrap();
        assert!(assignment.dropped_player);
        assert!(world.player(1).is_none());
    }

    #[test]
    fn test_dead_player_cannot_switch_team() {
        let (mut world, clock) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Magician, 1, 1);
        place(&mut world, 2, Team::Blue, ClassKind::Magician, 3, 1);
        world.players.get_mut(&2).unwrap().health = 15;
        assert!(world.act(1, 3, 1).unwrap().killed);

        assert_eq!(world.assign_team(2, "red"), Err(ActionError::NotAvailable));
        assert_eq!(world.team_counts(), TeamCounts { red: 1, blue: 1 });
        assert_eq!(world.select_class(2, "archer"), Err(ActionError::NotAvailable));
        assert_eq!(world.player(2).unwrap().respawn_at, Some(clock.now_ms() + 10_000));

        // Staying on the same team is still allowed
        assert!(world.assign_team(2, "blue").is_ok());
        assert!(world.player(2).unwrap().is_dead);
    }

    #[test]
    fn test_select_class_requires_team() {
        let (mut world, _) = test_world();
        assert_eq!(world.select_class(1, "fighter"), Err(ActionError::NoTeam));

        world.assign_team(1, "blue").unwrap();
        assert_eq!(world.select_class(1, "bard"), Err(ActionError::ClassInvalid));
    }

    #[test]
    fn test_select_class_spawns_in_home_band() {
        let (mut world, _) = test_world();
        world.assign_team(1, "blue").unwrap();
        let view = world.select_class(1, "magician").unwrap();

        assert!(view.x >= 26 && view.x < 30);
        assert_eq!(view.health, 60);
        assert!(!view.is_dead);
        let player = world.player(1).unwrap();
        assert_eq!(player.last_action_at, None);
        assert!(spatial::is_walkable(world.terrain(), player.x, player.y));
    }

    #[test]
    fn test_dead_player_cannot_reselect_class() {
        let (mut world, _) = test_world();
        world.assign_team(1, "red").unwrap();
        world.select_class(1, "fighter").unwrap();
        world.players.get_mut(&1).unwrap().is_dead = true;

        assert_eq!(world.select_class(1, "archer"), Err(ActionError::NotAvailable));
    }

    #[test]
    fn test_move_within_targets() {
        let (mut world, _) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Fighter, 1, 1);

        assert_eq!(world.move_player(1, 2, 2), Ok(Cell::new(2, 2)));
        assert_eq!(world.player(1).unwrap().cell(), Cell::new(2, 2));
        // Validated against the new position, not the original one
        assert_eq!(world.move_player(1, 0, 0), Ok(Cell::new(0, 0)));
    }

    #[test]
    fn test_move_rejections() {
        let (mut world, _) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Fighter, 1, 1);
        place(&mut world, 2, Team::Red, ClassKind::Fighter, 1, 2);

        assert_eq!(world.move_player(1, 1, 2), Err(ActionError::InvalidMove));
        assert_eq!(world.move_player(1, 1, 9), Err(ActionError::InvalidMove));
        assert_eq!(world.move_player(1, -1, 1), Err(ActionError::InvalidMove));
        assert_eq!(world.move_player(1, 1, 1), Err(ActionError::InvalidMove));
        assert_eq!(world.move_player(99, 1, 1), Err(ActionError::NotAvailable));
        assert_eq!(world.player(1).unwrap().cell(), Cell::new(1, 1));
    }

    #[test]
    fn test_move_succeeds_iff_in_valid_targets() {
        let (mut world, _) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Archer, 15, 10);
        place(&mut world, 2, Team::Blue, ClassKind::Fighter, 16, 10);

        for y in 4..=16 {
            for x in 9..=21 {
                let before = world.player(1).unwrap().cell();
                let allowed = world.move_targets(1).contains(&Cell::new(x, y));
                let result = world.move_player(1, x, y);
                assert_eq!(result.is_ok(), allowed, "move to ({}, {})", x, y);
                if result.is_ok() {
                    world.players.get_mut(&1).unwrap().x = before.x;
                    world.players.get_mut(&1).unwrap().y = before.y;
                }
            }
        }
    }

    #[test]
    fn test_attack_damages_enemy() {
        let (mut world, _) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Fighter, 1, 1);
        place(&mut world, 2, Team::Blue, ClassKind::Archer, 2, 1);

        let outcome = world.act(1, 2, 1).unwrap();
        assert_eq!(
            outcome,
            ActionOutcome {
                kind: ActionKind::Attack,
                target_id: 2,
                amount: 20,
                killed: false
            }
        );
        assert_eq!(world.player(2).unwrap().health, 50);
    }

    #[test]
    fn test_cooldown_boundary() {
        let (mut world, clock) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Fighter, 1, 1);
        place(&mut world, 2, Team::Blue, ClassKind::Fighter, 2, 1);

        assert!(world.act(1, 2, 1).is_ok());
        clock.advance_ms(1_999);
        assert_eq!(world.act(1, 2, 1), Err(ActionError::OnCooldown));
        clock.advance_ms(1);
        assert!(world.act(1, 2, 1).is_ok());
        assert_eq!(world.player(2).unwrap().health, 60);
    }

    #[test]
    fn test_failed_action_does_not_start_cooldown() {
        let (mut world, _) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Fighter, 1, 1);
        place(&mut world, 2, Team::Blue, ClassKind::Fighter, 2, 1);

        assert_eq!(world.act(1, 1, 2), Err(ActionError::NoTarget));
        assert!(world.act(1, 2, 1).is_ok());
    }

    #[test]
    fn test_action_check_order() {
        let (mut world, _) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Fighter, 1, 1);
        place(&mut world, 2, Team::Red, ClassKind::Archer, 2, 1);

        assert_eq!(world.act(1, 3, 3), Err(ActionError::OutOfRange));
        assert_eq!(world.act(1, 1, 2), Err(ActionError::NoTarget));
        assert_eq!(world.act(1, 2, 1), Err(ActionError::InvalidTarget));
        assert_eq!(world.act(1, 1, 1), Err(ActionError::InvalidTarget));
        assert_eq!(world.act(42, 2, 1), Err(ActionError::NotAvailable));
        assert_eq!(world.act(1, i32::MIN, i32::MAX), Err(ActionError::OutOfRange));
        assert_eq!(world.act(1, i32::MAX, i32::MIN), Err(ActionError::OutOfRange));
    }

    #[test]
    fn test_line_of_sight_blocks_action() {
        let (mut world, _) = test_world();
        world.terrain.set(2, 1, shared::Terrain::Mountain).unwrap();
        place(&mut world, 1, Team::Red, ClassKind::Archer, 1, 1);
        place(&mut world, 2, Team::Blue, ClassKind::Archer, 4, 1);

        assert_eq!(world.act(1, 4, 1), Err(ActionError::NoLineOfSight));
    }

    #[test]
    fn test_healer_rules() {
        let (mut world, _) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Healer, 1, 1);
        place(&mut world, 2, Team::Red, ClassKind::Fighter, 2, 1);
        place(&mut world, 3, Team::Blue, ClassKind::Fighter, 1, 2);

        assert_eq!(world.act(1, 2, 1), Err(ActionError::TargetFullHealth));
        assert_eq!(world.act(1, 1, 2), Err(ActionError::InvalidTarget));

        world.players.get_mut(&2).unwrap().health = 90;
        let outcome = world.act(1, 2, 1).unwrap();
        assert_eq!(outcome.kind, ActionKind::Heal);
        assert_eq!(outcome.amount, 15);
        // Capped at the target's class maximum
        assert_eq!(world.player(2).unwrap().health, 100);
    }

    #[test]
    fn test_kill_sets_respawn_and_keeps_membership() {
        let (mut world, clock) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Magician, 1, 1);
        place(&mut world, 2, Team::Blue, ClassKind::Magician, 3, 1);
        world.players.get_mut(&2).unwrap().health = 15;

        let outcome = world.act(1, 3, 1).unwrap();
        assert!(outcome.killed);

        let target = world.player(2).unwrap();
        assert!(target.is_dead);
        assert_eq!(target.health, 0);
        assert_eq!(target.respawn_at, Some(clock.now_ms() + 10_000));
        assert_eq!(world.team_counts(), TeamCounts { red: 1, blue: 1 });

        // The corpse is no longer a target
        clock.advance_ms(5_000);
        assert_eq!(world.act(1, 3, 1), Err(ActionError::NoTarget));
        assert!(!spatial::is_occupied(&world.players, 3, 1, None));
    }

    #[test]
    fn test_dead_actor_is_not_available() {
        let (mut world, _) = test_world();
        place(&mut world, 1, Team::Red, ClassKind::Fighter, 1, 1);
        place(&mut world, 2, Team::Blue, ClassKind::Fighter, 2, 1);
        world.players.get_mut(&1).unwrap().is_dead = true;

        assert_eq!(world.act(1, 2, 1), Err(ActionError::NotAvailable));
        assert_eq!(world.move_player(1, 1, 2), Err(ActionError::NotAvailable));
    }

    #[test]
    fn test_intent_packets() {
        let (mut world, _) = test_world();
        let out = world.handle_intent(1, Intent::JoinTeam("red".to_string()));
        assert!(out
            .received_by(1)
            .any(|p| matches!(p, Packet::TeamJoined { team: Team::Red })));
        assert!(out
            .broadcasts()
            .any(|p| matches!(p, Packet::TeamCounts(c) if c.red == 1)));

        let out = world.handle_intent(1, Intent::SelectClass("archer".to_string()));
        assert!(out
            .received_by(1)
            .any(|p| matches!(p, Packet::ClassSelected { health: 70, .. })));
        assert!(out.broadcasts().any(|p| matches!(p, Packet::PlayerJoined(_))));

        let out = world.handle_intent(1, Intent::Move { x: 29, y: 0 });
        assert!(out.received_by(1).any(|p| matches!(
            p,
            Packet::PlayerMoveResult(MoveResult::Rejected {
                reason: ActionError::InvalidMove
            })
        )));

        let out = world.handle_intent(1, Intent::Act { x: 29, y: 19 });
        assert!(out.received_by(1).any(|p| matches!(
            p,
            Packet::ActionFailed {
                reason: ActionError::OutOfRange
            }
        )));
    }
}
