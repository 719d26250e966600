//! Pure queries over terrain and player positions
//!
//! Nothing here mutates state. Every resolver decision about where a player
//! may go or whom they may hit is answered by these functions against the
//! current roster, so two calls with the same world always agree.

use crate::game::{Player, Roster};
use shared::{AttackTarget, Cell, Grid, Team, Terrain};

/// Forest cells block sight when `(x * 31 + y * 17) % 10` falls below this,
/// giving a spatially stable 30% foliage pattern
pub const FOREST_BLOCK_THRESHOLD: i32 = 3;

pub fn is_walkable(grid: &Grid, x: i32, y: i32) -> bool {
    grid.get(x, y).is_some_and(Terrain::is_walkable)
}

/// The live player standing on a cell, if any
pub fn occupant(players: &Roster, x: i32, y: i32) -> Option<&Player> {
    players
        .values()
        .find(|p| !p.is_dead && p.x == x && p.y == y)
}

/// True when a live player other than `excluding` stands on the cell
pub fn is_occupied(players: &Roster, x: i32, y: i32, excluding: Option<u32>) -> bool {
    players
        .values()
        .any(|p| !p.is_dead && p.x == x && p.y == y && Some(p.id) != excluding)
}

pub fn distance(a: Cell, b: Cell) -> f64 {
    let dx = f64::from(b.x) - f64::from(a.x);
    let dy = f64::from(b.y) - f64::from(a.y);
    (dx * dx + dy * dy).sqrt()
}

pub fn forest_blocks(x: i32, y: i32) -> bool {
    (x * 31 + y * 17).rem_euclid(10) < FOREST_BLOCK_THRESHOLD
}

/// Walks the Bresenham line between two cells, endpoints excluded.
/// Mountains always block; forests block on their fixed foliage cells.
pub fn line_of_sight(grid: &Grid, from: Cell, to: Cell) -> bool {
    let dx = (to.x - from.x).abs();
    let dy = (to.y - from.y).abs();
    let sx = if from.x < to.x { 1 } else { -1 };
    let sy = if from.y < to.y { 1 } else { -1 };
    let mut err = dx - dy;

    let (mut x, mut y) = (from.x, from.y);
    while x != to.x || y != to.y {
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x += sx;
        }
        if e2 < dx {
            err += dx;
            y += sy;
        }

        if x == to.x && y == to.y {
            break;
        }

        match grid.get(x, y) {
            Some(Terrain::Mountain) => return false,
            Some(Terrain::Forest) if forest_blocks(x, y) => return false,
            _ => {}
        }
    }

    true
}

/// Whether `actor` may aim its class effect at `target`: healers help
/// allies, everyone else hits enemies, nobody targets themselves
pub fn can_target(actor: &Player, target: &Player) -> bool {
    if actor.id == target.id {
        return false;
    }
    if actor.class.is_healer() {
        actor.team == target.team
    } else {
        actor.team != target.team
    }
}

/// Cells the player may move to this turn: within move range, walkable,
/// unoccupied and visible from the current cell. The current cell itself
/// is not a move.
pub fn valid_move_targets(grid: &Grid, players: &Roster, player: &Player) -> Vec<Cell> {
    if player.is_dead {
        return Vec::new();
    }

    let origin = player.cell();
    let move_range = player.def().move_range;
    let reach = move_range.floor() as i32;

    let mut targets = Vec::new();
    for y in (origin.y - reach).max(0)..=(origin.y + reach).min(grid.height() - 1) {
        for x in (origin.x - reach).max(0)..=(origin.x + reach).min(grid.width() - 1) {
            let cell = Cell::new(x, y);
            if cell == origin || distance(origin, cell) > move_range {
                continue;
            }
            if is_walkable(grid, x, y)
                && !is_occupied(players, x, y, Some(player.id))
                && line_of_sight(grid, origin, cell)
            {
                targets.push(cell);
            }
        }
    }
    targets
}

/// Live players the player could act on right now
pub fn valid_attack_targets(grid: &Grid, players: &Roster, player: &Player) -> Vec<AttackTarget> {
    if player.is_dead {
        return Vec::new();
    }

    let origin = player.cell();
    let range = player.def().range;

    players
        .values()
        .filter(|target| !target.is_dead && can_target(player, target))
        .filter(|target| distance(origin, target.cell()) <= range)
        .filter(|target| line_of_sight(grid, origin, target.cell()))
        .map(|target| AttackTarget {
            id: target.id,
            x: target.x,
            y: target.y,
            team: target.team,
        })
        .collect()
}

/// Walkable, unoccupied cells in the team's home band
pub fn free_home_cells(
    grid: &Grid,
    players: &Roster,
    team: Team,
    excluding: Option<u32>,
) -> Vec<Cell> {
    let mut cells = Vec::new();
    for x in team.home_columns(grid.width()) {
        for y in 0..grid.height() {
            if is_walkable(grid, x, y) && !is_occupied(players, x, y, excluding) {
                cells.push(Cell::new(x, y));
            }
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ClassKind;

    fn open_grid() -> Grid {
        Grid::filled(10, 10, Terrain::Open)
    }

    fn roster(players: Vec<Player>) -> Roster {
        players.into_iter().map(|p| (p.id, p)).collect()
    }

    fn player(id: u32, team: Team, class: ClassKind, x: i32, y: i32) -> Player {
        Player::spawn(id, team, class, Cell::new(x, y))
    }

    #[test]
    fn test_walkability() {
        let mut grid = open_grid();
        grid.set(1, 1, Terrain::Water).unwrap();
        grid.set(2, 2, Terrain::Mountain).unwrap();
        grid.set(3, 3, Terrain::Forest).unwrap();

        assert!(is_walkable(&grid, 0, 0));
        assert!(!is_walkable(&grid, 1, 1));
        assert!(!is_walkable(&grid, 2, 2));
        assert!(is_walkable(&grid, 3, 3));
        assert!(!is_walkable(&grid, -1, 0));
        assert!(!is_walkable(&grid, 10, 0));
    }

    #[test]
    fn test_occupancy_ignores_dead_and_excluded() {
        let mut dead = player(2, Team::Blue, ClassKind::Archer, 4, 4);
        dead.is_dead = true;
        let players = roster(vec![player(1, Team::Red, ClassKind::Fighter, 3, 3), dead]);

        assert!(is_occupied(&players, 3, 3, None));
        assert!(!is_occupied(&players, 3, 3, Some(1)));
        assert!(!is_occupied(&players, 4, 4, None));
        assert_eq!(occupant(&players, 3, 3).map(|p| p.id), Some(1));
        assert!(occupant(&players, 4, 4).is_none());
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance(Cell::new(0, 0), Cell::new(3, 4)), 5.0);
        assert_eq!(distance(Cell::new(2, 2), Cell::new(2, 2)), 0.0);
        // Extreme coordinates from the wire must not overflow
        let far = distance(Cell::new(5, 5), Cell::new(i32::MIN, i32::MAX));
        assert!(far.is_finite() && far > 1e9);
    }

    #[test]
    fn test_mountain_blocks_sight() {
        let mut grid = open_grid();
        grid.set(2, 0, Terrain::Mountain).unwrap();

        assert!(!line_of_sight(&grid, Cell::new(0, 0), Cell::new(4, 0)));
        assert!(line_of_sight(&grid, Cell::new(0, 1), Cell::new(4, 1)));
    }

    #[test]
    fn test_endpoints_do_not_block() {
        let mut grid = open_grid();
        grid.set(0, 0, Terrain::Mountain).unwrap();
        grid.set(4, 0, Terrain::Mountain).unwrap();

        assert!(line_of_sight(&grid, Cell::new(0, 0), Cell::new(4, 0)));
        assert!(line_of_sight(&grid, Cell::new(4, 0), Cell::new(0, 0)));
    }

    #[test]
    fn test_forest_blocks_only_on_foliage_cells() {
        // (1,0): 31 % 10 = 1 blocks; (2,0): 62 % 10 = 2 blocks; (3,0): 93 % 10 = 3 clear
        assert!(forest_blocks(1, 0));
        assert!(forest_blocks(2, 0));
        assert!(!forest_blocks(3, 0));

        let mut grid = open_grid();
        grid.set(3, 0, Terrain::Forest).unwrap();
        assert!(line_of_sight(&grid, Cell::new(0, 0), Cell::new(5, 0)));

        grid.set(2, 0, Terrain::Forest).unwrap();
        assert!(!line_of_sight(&grid, Cell::new(0, 0), Cell::new(5, 0)));
    }

    #[test]
    fn test_line_of_sight_is_stable() {
        let grid = shared::generate("42");
        let a = Cell::new(5, 5);
        let b = Cell::new(20, 14);
        let first = line_of_sight(&grid, a, b);
        for _ in 0..10 {
            assert_eq!(line_of_sight(&grid, a, b), first);
        }
    }

    #[test]
    fn test_move_targets_respect_range_and_terrain() {
        let mut grid = open_grid();
        grid.set(5, 4, Terrain::Water).unwrap();
        let mover = player(1, Team::Red, ClassKind::Magician, 5, 5);
        let blocker = player(2, Team::Blue, ClassKind::Fighter, 6, 5);
        let players = roster(vec![mover.clone(), blocker]);

        let targets = valid_move_targets(&grid, &players, &mover);

        assert!(!targets.contains(&Cell::new(5, 5)));
        assert!(!targets.contains(&Cell::new(5, 4)));
        assert!(!targets.contains(&Cell::new(6, 5)));
        assert!(targets.contains(&Cell::new(5, 7)));
        assert!(!targets.contains(&Cell::new(7, 7)));
        for cell in &targets {
            assert!(distance(mover.cell(), *cell) <= 2.0);
        }
    }

    #[test]
    fn test_move_targets_need_sight() {
        let mut grid = open_grid();
        grid.set(5, 4, Terrain::Mountain).unwrap();
        let mover = player(1, Team::Red, ClassKind::Fighter, 5, 5);
        let players = roster(vec![mover.clone()]);

        let targets = valid_move_targets(&grid, &players, &mover);
        assert!(targets.contains(&Cell::new(5, 6)));
        assert!(!targets.contains(&Cell::new(5, 3)));
        assert!(!targets.contains(&Cell::new(5, 2)));
    }

    #[test]
    fn test_dead_player_has_no_targets() {
        let grid = open_grid();
        let mut mover = player(1, Team::Red, ClassKind::Fighter, 5, 5);
        mover.is_dead = true;
        let enemy = player(2, Team::Blue, ClassKind::Fighter, 5, 6);
        let players = roster(vec![mover.clone(), enemy]);

        assert!(valid_move_targets(&grid, &players, &mover).is_empty());
        assert!(valid_attack_targets(&grid, &players, &mover).is_empty());
    }

    #[test]
    fn test_attack_targets_follow_team_rules() {
        let grid = open_grid();
        let fighter = player(1, Team::Red, ClassKind::Fighter, 5, 5);
        let healer = player(2, Team::Red, ClassKind::Healer, 5, 4);
        let enemy = player(3, Team::Blue, ClassKind::Archer, 6, 5);
        let far_enemy = player(4, Team::Blue, ClassKind::Archer, 9, 9);
        let players = roster(vec![fighter.clone(), healer.clone(), enemy, far_enemy]);

        let fighter_targets: Vec<u32> = valid_attack_targets(&grid, &players, &fighter)
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(fighter_targets, vec![3]);

        let healer_targets: Vec<u32> = valid_attack_targets(&grid, &players, &healer)
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(healer_targets, vec![1]);
    }

    #[test]
    fn test_free_home_cells() {
        let grid = shared::generate("42");
        let occupant = player(1, Team::Red, ClassKind::Fighter, 0, 0);
        let players = roster(vec![occupant]);

        let red = free_home_cells(&grid, &players, Team::Red, None);
        assert_eq!(red.len(), 4 * 20 - 1);
        assert!(!red.contains(&Cell::new(0, 0)));
        assert!(red.iter().all(|c| c.x < 4));

        let blue = free_home_cells(&grid, &players, Team::Blue, None);
        assert_eq!(blue.len(), 80);
        assert!(blue.iter().all(|c| c.x >= 26));
    }
}
