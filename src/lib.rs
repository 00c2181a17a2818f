//! # LOTKA
//!
//! Tick-synchronized concurrent predator/prey simulation.
//!
//! ## Features
//!
//! - **Concurrent**: one unit per live agent per tick on a Rayon pool,
//!   joined by a barrier with a bounded wait
//! - **Adaptive**: a controller retunes capture, breeding and regrowth to keep
//!   both populations oscillating instead of collapsing
//! - **Analytic**: Lotka-Volterra parameters fitted to the observed series and
//!   integrated with RK4
//! - **Configurable**: YAML configuration files
//! - **Reproducible**: seeded per-agent random streams
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lotka::{Config, Simulation};
//!
//! let mut sim = Simulation::new_with_seed(Config::default(), 42).unwrap();
//! let summary = sim.run(Some(1000)).unwrap();
//!
//! println!("Ended: {}", summary.end);
//! if let Some(fit) = summary.fit {
//!     println!("Fitted: {}", fit);
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use lotka::Config;
//!
//! let mut config = Config::default();
//! config.world.initial_prey = 200;
//! config.predator.vision_range = 9;
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Model fitting
//!
//! ```rust
//! use lotka::estimator::{estimate_parameters, LotkaVolterraModel, LotkaVolterraParams};
//!
//! let truth = LotkaVolterraParams::new(0.1, 0.002, 0.08, 0.001);
//! let series = LotkaVolterraModel::new(truth).simulate(60.0, 20.0, 200);
//! let fit = estimate_parameters(&series);
//! assert!((fit.alpha - truth.alpha).abs() < 0.01);
//! ```

pub mod agent;
pub mod behavior;
pub mod config;
pub mod controller;
pub mod error;
pub mod estimator;
pub mod grid;
pub mod registry;
pub mod stats;
pub mod tick;
pub mod world;

// Re-export main types
pub use agent::{AgentId, Position, Species};
pub use config::Config;
pub use controller::{Regime, TunableBounds, Tunables};
pub use error::{Result, SimError};
pub use estimator::{LotkaVolterraModel, LotkaVolterraParams};
pub use stats::{CsvStatsSink, Statistics, StatsHistory, StatsSink};
pub use world::{EndCondition, RunSummary, Simulation};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run a quick benchmark on the default world
pub fn benchmark(ticks: u64, prey: usize, predators: usize) -> Result<BenchmarkResult> {
    use std::time::Instant;

    let mut config = Config::default();
    config.world.initial_prey = prey;
    config.world.initial_predators = predators;
    config.logging.stats_interval = 0;
    config.estimator.refit_interval = 0;

    let mut sim = Simulation::new_with_seed(config, 0xBE7C)?;

    let start = Instant::now();
    let summary = sim.run(Some(ticks))?;
    let elapsed = start.elapsed();

    Ok(BenchmarkResult {
        ticks: summary.ticks,
        initial_population: prey + predators,
        final_population: sim.count(Species::Prey) + sim.count(Species::Predator),
        elapsed_secs: elapsed.as_secs_f64(),
        ticks_per_second: summary.ticks as f64 / elapsed.as_secs_f64().max(1e-9),
        end: summary.end,
    })
}

/// Benchmark result
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub ticks: u64,
    pub initial_population: usize,
    pub final_population: usize,
    pub elapsed_secs: f64,
    pub ticks_per_second: f64,
    pub end: EndCondition,
}

impl std::fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Benchmark Results ===")?;
        writeln!(f, "Ticks: {}", self.ticks)?;
        writeln!(f, "Population: {} -> {}", self.initial_population, self.final_population)?;
        writeln!(f, "Time: {:.3}s", self.elapsed_secs)?;
        writeln!(f, "Speed: {:.1} ticks/s", self.ticks_per_second)?;
        writeln!(f, "End: {}", self.end)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_benchmark() {
        let result = benchmark(20, 40, 10).unwrap();
        assert!(result.ticks <= 20);
        assert!(result.ticks_per_second >= 0.0);
    }
}
