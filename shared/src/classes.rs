//! Teams and character classes

use crate::{ActionError, HOME_COLUMNS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::Red, Team::Blue];

    pub fn opponent(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }

    /// Columns of the team's spawn band on a grid of the given width.
    /// Red spawns on the left edge, blue on the right.
    pub fn home_columns(self, grid_width: i32) -> Range<i32> {
        match self {
            Team::Red => 0..HOME_COLUMNS,
            Team::Blue => grid_width - HOME_COLUMNS..grid_width,
        }
    }
}

impl FromStr for Team {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "red" => Ok(Team::Red),
            "blue" => Ok(Team::Blue),
            _ => Err(ActionError::TeamInvalid),
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::Red => write!(f, "red"),
            Team::Blue => write!(f, "blue"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassKind {
    Fighter,
    Archer,
    Magician,
    Healer,
}

/// What a successful action does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Damage(u32),
    Heal(u32),
}

/// Static per-class balance values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassDef {
    pub max_health: u32,
    pub effect: Effect,
    pub range: f64,
    pub move_range: f64,
    pub cooldown_ms: u64,
}

const FIGHTER: ClassDef = ClassDef {
    max_health: 100,
    effect: Effect::Damage(20),
    range: 1.0,
    move_range: 3.0,
    cooldown_ms: 2000,
};

const ARCHER: ClassDef = ClassDef {
    max_health: 70,
    effect: Effect::Damage(10),
    range: 6.0,
    move_range: 4.0,
    cooldown_ms: 3000,
};

const MAGICIAN: ClassDef = ClassDef {
    max_health: 60,
    effect: Effect::Damage(20),
    range: 3.0,
    move_range: 2.0,
    cooldown_ms: 5000,
};

const HEALER: ClassDef = ClassDef {
    max_health: 80,
    effect: Effect::Heal(15),
    range: 1.0,
    move_range: 3.0,
    cooldown_ms: 4000,
};

impl ClassKind {
    pub const ALL: [ClassKind; 4] = [
        ClassKind::Fighter,
        ClassKind::Archer,
        ClassKind::Magician,
        ClassKind::Healer,
    ];

    pub fn def(self) -> &'static ClassDef {
        match self {
            ClassKind::Fighter => &FIGHTER,
            ClassKind::Archer => &ARCHER,
            ClassKind::Magician => &MAGICIAN,
            ClassKind::Healer => &HEALER,
        }
    }

    pub fn is_healer(self) -> bool {
        matches!(self.def().effect, Effect::Heal(_))
    }
}

impl FromStr for ClassKind {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fighter" => Ok(ClassKind::Fighter),
            "archer" => Ok(ClassKind::Archer),
            "magician" => Ok(ClassKind::Magician),
            "healer" => Ok(ClassKind::Healer),
            _ => Err(ActionError::ClassInvalid),
        }
    }
}

impl fmt::Display for ClassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassKind::Fighter => "fighter",
            ClassKind::Archer => "archer",
            ClassKind::Magician => "magician",
            ClassKind::Healer => "healer",
        };
        write!(f, "{}", name)
    }
}
