//! Configuration system for the simulation.
//!
//! Supports YAML configuration files with defaults tuned for sustained
//! predator/prey oscillation.

use crate::controller::{Tunables, TunableBounds};
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub world: WorldConfig,
    #[serde(default = "SpeciesConfig::prey_defaults")]
    pub prey: SpeciesConfig,
    #[serde(default = "SpeciesConfig::predator_defaults")]
    pub predator: SpeciesConfig,
    #[serde(default)]
    pub bounds: TunableBounds,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub tick: TickConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the initial population is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementMode {
    /// Random free walkable cells
    Random,
    /// Row-major lattice, identical on every run
    FixedPattern,
}

/// Grid and initial population
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    pub width: usize,
    pub height: usize,
    /// Fraction of cells turned into obstacles (0.0 - 1.0)
    pub obstacle_coverage: f64,
    /// Fraction of cells carrying a resource at start (0.0 - 1.0)
    pub initial_resource_coverage: f64,
    /// Bare walkable cells start with a staggered regrowth timer
    pub regrow_bare_cells: bool,
    /// Baseline ticks for a consumed resource to reappear
    pub resource_regrowth_time: u32,
    pub placement: PlacementMode,
    pub initial_prey: usize,
    pub initial_predators: usize,
}

/// Per-species behavior constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub energy_start: i32,
    pub energy_max: i32,
    /// Chebyshev radius for perception
    pub vision_range: i32,
    /// Prey only: threats closer than this trigger fleeing
    pub flee_radius: i32,
    /// Predator only: prey this close can be captured
    pub capture_range: i32,
    /// Predator only: baseline capture success probability
    pub capture_probability: f64,
    /// Energy spent per tick (predator value is the tunable baseline)
    pub move_cost: f64,
    /// Energy per meal (prey value is the tunable baseline)
    pub food_gain: i32,
    /// Predator only: ticks between captures
    pub eating_cooldown: u32,
    pub reproduction_threshold: i32,
    /// Parent energy is divided by this factor after mating (> 1.0)
    pub reproduction_cost: f64,
    /// Baseline cooldown after mating (tunable)
    pub reproduction_cooldown: u32,
    pub mating_range: i32,
    /// Death after this many ticks without eating
    pub starvation_limit: u32,
    /// Death when energy falls to or below this value
    pub starvation_floor: i32,
}

impl SpeciesConfig {
    pub fn prey_defaults() -> Self {
        Self {
            energy_start: 50,
            energy_max: 100,
            vision_range: 6,
            flee_radius: 4,
            capture_range: 0,
            capture_probability: 0.0,
            move_cost: 1.0,
            food_gain: 12,
            eating_cooldown: 0,
            reproduction_threshold: 50,
            reproduction_cost: 1.3,
            reproduction_cooldown: 35,
            mating_range: 2,
            starvation_limit: 40,
            starvation_floor: 0,
        }
    }

    pub fn predator_defaults() -> Self {
        Self {
            energy_start: 95,
            energy_max: 140,
            vision_range: 7,
            flee_radius: 0,
            capture_range: 1,
            capture_probability: 0.5,
            move_cost: 5.2,
            food_gain: 25,
            eating_cooldown: 2,
            reproduction_threshold: 58,
            reproduction_cost: 1.4,
            reproduction_cooldown: 50,
            mating_range: 2,
            starvation_limit: 20,
            starvation_floor: 0,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.energy_max <= 0 {
            return Err(invalid(format!("{name}.energy_max must be > 0")));
        }
        if self.energy_start <= 0 || self.energy_start > self.energy_max {
            return Err(invalid(format!("{name}.energy_start must be in 1..=energy_max")));
        }
        if self.vision_range < 0 || self.flee_radius < 0 || self.capture_range < 0 {
            return Err(invalid(format!("{name} ranges must be non-negative")));
        }
        if self.reproduction_threshold < 1 {
            return Err(invalid(format!("{name}.reproduction_threshold must be >= 1")));
        }
        if self.mating_range < 1 {
            return Err(invalid(format!("{name}.mating_range must be >= 1")));
        }
        if self.reproduction_cost <= 1.0 {
            return Err(invalid(format!("{name}.reproduction_cost must be > 1.0")));
        }
        if self.move_cost < 0.0 || self.food_gain < 0 {
            return Err(invalid(format!("{name} energy constants must be non-negative")));
        }
        if !(0.0..=1.0).contains(&self.capture_probability) {
            return Err(invalid(format!("{name}.capture_probability must be in [0, 1]")));
        }
        Ok(())
    }
}

/// Adaptive controller thresholds and smoothing rates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Prey minimum-viability floor
    pub min_prey: usize,
    /// Predator minimum-viability floor
    pub min_predators: usize,
    pub fast_rate: f64,
    pub medium_rate: f64,
    pub slow_rate: f64,
    /// Resource coverage below this is an emergency
    pub critical_coverage: f64,
    pub high_coverage: f64,
    /// Ticks between evolutionary drift steps (0 disables drift)
    pub drift_interval: u64,
    /// Relative capture probability increase per drift step
    pub capture_drift: f64,
    /// Prey resource gain increase per drift step
    pub gain_drift: f64,
    /// Ticks between controller state logs (0 disables)
    pub log_interval: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_prey: 10,
            min_predators: 5,
            fast_rate: 0.35,
            medium_rate: 0.12,
            slow_rate: 0.05,
            critical_coverage: 0.25,
            high_coverage: 0.75,
            drift_interval: 1000,
            capture_drift: 0.01,
            gain_drift: 1.0,
            log_interval: 100,
        }
    }
}

/// Barrier and run-length settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    /// Bounded wait for agent completions per tick
    pub timeout_ms: u64,
    /// Run ends after this many ticks (0 = unlimited)
    pub max_ticks: u64,
    /// Agent worker threads (0 = one per core)
    pub worker_threads: usize,
    /// Consecutive timeouts before an operator-level error is logged
    pub max_consecutive_timeouts: u32,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            max_ticks: 8000,
            worker_threads: 0,
            max_consecutive_timeouts: 5,
        }
    }
}

/// Lotka-Volterra overlay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Ticks between refits (0 = never)
    pub refit_interval: u64,
    /// Most recent history entries used for a fit
    pub window: usize,
    /// RK4 steps per tick
    pub substeps: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            refit_interval: 100,
            window: 500,
            substeps: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Ticks between summary log lines
    pub stats_interval: u64,
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stats_interval: 20,
            log_level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            prey: SpeciesConfig::prey_defaults(),
            predator: SpeciesConfig::predator_defaults(),
            bounds: TunableBounds::default(),
            controller: ControllerConfig::default(),
            tick: TickConfig::default(),
            estimator: EstimatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 40,
            height: 40,
            obstacle_coverage: 0.02,
            initial_resource_coverage: 0.4,
            regrow_bare_cells: true,
            resource_regrowth_time: 18,
            placement: PlacementMode::Random,
            initial_prey: 100,
            initial_predators: 25,
        }
    }
}

fn invalid(msg: impl Into<String>) -> SimError {
    SimError::InvalidConfiguration(msg.into())
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Baseline tunables implied by this configuration
    pub fn baseline_tunables(&self) -> Tunables {
        Tunables {
            capture_probability: self.predator.capture_probability,
            prey_reproduction_cooldown: self.prey.reproduction_cooldown as f64,
            predator_reproduction_cooldown: self.predator.reproduction_cooldown as f64,
            resource_regrowth_time: self.world.resource_regrowth_time as f64,
            prey_resource_gain: self.prey.food_gain as f64,
            predator_move_cost: self.predator.move_cost,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let w = &self.world;
        if w.width == 0 || w.height == 0 || w.width > 1024 || w.height > 1024 {
            return Err(invalid("grid width and height must be between 1 and 1024"));
        }
        for (name, value) in [
            ("obstacle_coverage", w.obstacle_coverage),
            ("initial_resource_coverage", w.initial_resource_coverage),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{name} must be in [0, 1]")));
            }
        }
        if w.obstacle_coverage >= 1.0 {
            return Err(invalid("obstacle_coverage leaves no walkable cells"));
        }
        let population = w.initial_prey + w.initial_predators;
        if population == 0 {
            return Err(invalid("initial population must be > 0"));
        }
        let walkable_estimate =
            ((w.width * w.height) as f64 * (1.0 - w.obstacle_coverage)).floor() as usize;
        if population > walkable_estimate {
            return Err(invalid(format!(
                "initial population {population} cannot fit in ~{walkable_estimate} walkable cells"
            )));
        }

        self.prey.validate("prey")?;
        self.predator.validate("predator")?;

        let c = &self.controller;
        for (name, rate) in [
            ("fast_rate", c.fast_rate),
            ("medium_rate", c.medium_rate),
            ("slow_rate", c.slow_rate),
        ] {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(invalid(format!("controller.{name} must be in (0, 1]")));
            }
        }
        if c.critical_coverage > c.high_coverage {
            return Err(invalid("controller.critical_coverage exceeds high_coverage"));
        }

        if self.tick.timeout_ms == 0 {
            return Err(invalid("tick.timeout_ms must be > 0"));
        }
        if self.estimator.substeps == 0 {
            return Err(invalid("estimator.substeps must be > 0"));
        }

        self.bounds.validate()?;
        if !self.bounds.contains(&self.baseline_tunables()) {
            return Err(invalid("baseline tunables fall outside the configured bounds"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let loaded: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.world.width, loaded.world.width);
        assert_eq!(config.predator.energy_max, loaded.predator.energy_max);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let yaml = r#"
world:
  width: 12
  height: 10
  obstacle_coverage: 0.0
  initial_resource_coverage: 0.5
  regrow_bare_cells: true
  resource_regrowth_time: 10
  placement: FixedPattern
  initial_prey: 5
  initial_predators: 2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.world.width, 12);
        assert_eq!(config.prey.energy_max, 100);
        assert_eq!(config.predator.capture_range, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_size_grid_rejected() {
        let mut config = Config::default();
        config.world.width = 0;
        assert!(matches!(config.validate(), Err(SimError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_overcrowded_population_rejected() {
        let mut config = Config::default();
        config.world.width = 5;
        config.world.height = 5;
        config.world.initial_prey = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_contradictory_bounds_rejected() {
        let mut config = Config::default();
        config.bounds.capture_probability.min = 0.9;
        config.bounds.capture_probability.max = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reproduction_cost_must_reduce_energy() {
        let mut config = Config::default();
        config.prey.reproduction_cost = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.world.initial_prey = 42;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.world.initial_prey, 42);
    }
}
