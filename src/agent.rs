//! Agent records, species and positions.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Unique agent identifier
pub type AgentId = u64;

/// The two populations of the ecosystem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Prey,
    Predator,
}

impl Species {
    /// The species this one perceives as prey or threat
    pub fn opponent(self) -> Self {
        match self {
            Species::Prey => Species::Predator,
            Species::Predator => Species::Prey,
        }
    }

    /// Display name used in logs
    pub fn name(self) -> &'static str {
        match self {
            Species::Prey => "prey",
            Species::Predator => "predator",
        }
    }
}

/// Biological sex for mating
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Draw a sex with equal probability
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.gen::<bool>() {
            Sex::Male
        } else {
            Sex::Female
        }
    }
}

/// A cell coordinate on the grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chebyshev (king-move) distance
    #[inline]
    pub fn chebyshev(&self, other: &Position) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    /// Squared Euclidean distance, used for tie-breaking
    #[inline]
    pub fn distance_sq(&self, other: &Position) -> i32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// The eight surrounding cells in a fixed order (may be out of bounds)
    pub fn neighbors(&self) -> [Position; 8] {
        [
            Position::new(self.x - 1, self.y - 1),
            Position::new(self.x, self.y - 1),
            Position::new(self.x + 1, self.y - 1),
            Position::new(self.x - 1, self.y),
            Position::new(self.x + 1, self.y),
            Position::new(self.x - 1, self.y + 1),
            Position::new(self.x, self.y + 1),
            Position::new(self.x + 1, self.y + 1),
        ]
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Canonical agent record, owned by the registry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub species: Species,
    pub sex: Sex,
    pub position: Position,
    /// Energy in `[0, energy_max]`
    pub energy: i32,
    pub energy_max: i32,
    pub reproduction_cooldown: u32,
    /// Ticks before a predator may capture again
    pub eating_cooldown: u32,
    pub ticks_without_food: u32,
    pub alive: bool,
    /// Tick at which the agent was created
    pub born_at: u64,
}

impl Agent {
    /// Create a new living agent
    pub fn new(
        id: AgentId,
        species: Species,
        sex: Sex,
        position: Position,
        energy: i32,
        energy_max: i32,
        born_at: u64,
    ) -> Self {
        Self {
            id,
            species,
            sex,
            position,
            energy: energy.clamp(0, energy_max),
            energy_max,
            reproduction_cooldown: 0,
            eating_cooldown: 0,
            ticks_without_food: 0,
            alive: true,
            born_at,
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Add energy, saturating at the species maximum
    pub fn gain_energy(&mut self, amount: i32) {
        self.energy = (self.energy + amount.max(0)).min(self.energy_max);
    }

    /// Remove energy, saturating at zero
    pub fn spend_energy(&mut self, amount: i32) {
        self.energy = (self.energy - amount.max(0)).max(0);
    }

    /// Reproduction precondition: alive, enough energy, cooldown elapsed
    pub fn can_reproduce(&self, threshold: i32) -> bool {
        self.alive && self.energy >= threshold && self.reproduction_cooldown == 0
    }

    /// Immutable perception view of this record
    pub fn view(&self) -> AgentView {
        AgentView {
            id: self.id,
            species: self.species,
            sex: self.sex,
            position: self.position,
            energy: self.energy,
            reproduction_cooldown: self.reproduction_cooldown,
            alive: self.alive,
        }
    }
}

/// Read-only view of an agent as of tick start
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    pub id: AgentId,
    pub species: Species,
    pub sex: Sex,
    pub position: Position,
    pub energy: i32,
    pub reproduction_cooldown: u32,
    pub alive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distances() {
        let a = Position::new(0, 0);
        let b = Position::new(3, -7);
        assert_eq!(a.chebyshev(&b), 7);
        assert_eq!(a.distance_sq(&b), 58);
        assert_eq!(a.chebyshev(&a), 0);
    }

    #[test]
    fn test_neighbors_exclude_center() {
        let p = Position::new(5, 5);
        let n = p.neighbors();
        assert!(!n.contains(&p));
        assert!(n.iter().all(|q| p.chebyshev(q) == 1));
    }

    #[test]
    fn test_energy_saturates() {
        let mut agent = Agent::new(1, Species::Prey, Sex::Male, Position::new(0, 0), 90, 100, 0);
        agent.gain_energy(50);
        assert_eq!(agent.energy, 100);
        agent.spend_energy(250);
        assert_eq!(agent.energy, 0);
    }

    #[test]
    fn test_new_clamps_energy() {
        let agent = Agent::new(1, Species::Predator, Sex::Female, Position::new(0, 0), 500, 140, 0);
        assert_eq!(agent.energy, 140);
    }

    #[test]
    fn test_can_reproduce() {
        let mut agent = Agent::new(1, Species::Prey, Sex::Male, Position::new(0, 0), 60, 100, 0);
        assert!(agent.can_reproduce(50));
        agent.reproduction_cooldown = 3;
        assert!(!agent.can_reproduce(50));
        agent.reproduction_cooldown = 0;
        agent.alive = false;
        assert!(!agent.can_reproduce(50));
    }

    #[test]
    fn test_opponent() {
        assert_eq!(Species::Prey.opponent(), Species::Predator);
        assert_eq!(Species::Predator.opponent(), Species::Prey);
    }
}
