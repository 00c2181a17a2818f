//! Simulation orchestrator - main tick loop.
//!
//! The orchestrator is single-threaded. It opens each tick, dispatches one
//! unit per live agent onto the worker pool, waits on the barrier, and then
//! runs the commit phase alone: births, regrowth, reaping, invariant check,
//! statistics, controller update and the periodic model refit.

use crate::agent::{AgentId, AgentView, Position, Sex, Species};
use crate::behavior::{AgentContext, BehaviorEngine, TickView};
use crate::config::{Config, PlacementMode};
use crate::controller::{AdaptiveController, Regime, TunableBounds, Tunables};
use crate::error::{Result, SimError};
use crate::estimator::{estimate_parameters, LotkaVolterraModel, LotkaVolterraParams};
use crate::grid::{CellSnapshot, SpatialGrid};
use crate::registry::AgentRegistry;
use crate::stats::{Statistics, StatsHistory, StatsSink};
use crate::tick::{TickCoordinator, TickReport};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// State shared with agent units
struct Shared {
    grid: SpatialGrid,
    registry: AgentRegistry,
    coordinator: TickCoordinator,
    engine: BehaviorEngine,
}

/// Why a run stopped; none of these is an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndCondition {
    Extinction(Species),
    /// Both species gone
    Collapse,
    MaxTicks(u64),
}

impl std::fmt::Display for EndCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndCondition::Extinction(species) => write!(f, "{} extinct", species.name()),
            EndCondition::Collapse => write!(f, "both species extinct"),
            EndCondition::MaxTicks(n) => write!(f, "reached {n} ticks"),
        }
    }
}

/// Result of one `step`
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub barrier: TickReport,
    pub stats: Statistics,
    pub regime: Regime,
}

/// Result of `run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub end: EndCondition,
    pub final_stats: Option<Statistics>,
    pub timeouts: u64,
    pub peak_prey: usize,
    pub peak_predators: usize,
    pub fit: Option<LotkaVolterraParams>,
}

/// Owned copy of the world for renderers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub width: usize,
    pub height: usize,
    /// Row-major
    pub cells: Vec<CellSnapshot>,
    pub agents: Vec<AgentView>,
    pub latest: Option<Statistics>,
    pub tunables: Tunables,
    pub regime: Regime,
    pub fit: Option<LotkaVolterraParams>,
}

/// The simulation
pub struct Simulation {
    config: Config,
    shared: Arc<Shared>,
    pool: rayon::ThreadPool,
    controller: AdaptiveController,
    history: StatsHistory,
    sinks: Vec<Box<dyn StatsSink>>,
    fit: Option<LotkaVolterraParams>,
    rng: ChaCha8Rng,
    seed: u64,
    timeout: Duration,
    consecutive_timeouts: u32,
    total_timeouts: u64,
}

impl Simulation {
    /// Create a simulation with a random seed
    pub fn new(config: Config) -> Result<Self> {
        let seed = rand::thread_rng().gen();
        Self::new_with_seed(config, seed)
    }

    /// Create a simulation with a specific seed; agents are placed per
    /// `world.placement`
    pub fn new_with_seed(config: Config, seed: u64) -> Result<Self> {
        let mut sim = Self::build(config, seed)?;
        sim.populate()?;
        Ok(sim)
    }

    /// Create a simulation with an explicit initial population, ignoring
    /// the configured counts and placement
    pub fn with_agents(config: Config, seed: u64, agents: &[(Species, Position)]) -> Result<Self> {
        let sim = Self::build(config, seed)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x5EED);
        for &(species, pos) in agents {
            sim.place(species, pos, &mut rng)?;
        }
        sim.shared.registry.commit_births();
        Ok(sim)
    }

    fn build(config: Config, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let grid = SpatialGrid::generate(&config.world, &mut rng);
        let shared = Arc::new(Shared {
            grid,
            registry: AgentRegistry::new(),
            coordinator: TickCoordinator::new(),
            engine: BehaviorEngine::new(config.prey.clone(), config.predator.clone()),
        });

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.tick.worker_threads)
            .thread_name(|i| format!("agent-worker-{i}"))
            .build()
            .map_err(|e| SimError::InvalidConfiguration(format!("worker pool: {e}")))?;

        Ok(Self {
            controller: AdaptiveController::from_config(&config),
            timeout: Duration::from_millis(config.tick.timeout_ms),
            config,
            shared,
            pool,
            history: StatsHistory::new(),
            sinks: Vec::new(),
            fit: None,
            rng,
            seed,
            consecutive_timeouts: 0,
            total_timeouts: 0,
        })
    }

    fn populate(&mut self) -> Result<()> {
        let prey = self.config.world.initial_prey;
        let predators = self.config.world.initial_predators;
        let total = prey + predators;

        let mut free = self.shared.grid.free_cells();
        if free.len() < total {
            return Err(SimError::InvalidConfiguration(format!(
                "{total} agents do not fit in {} free cells",
                free.len()
            )));
        }
        let cells: Vec<Position> = match self.config.world.placement {
            PlacementMode::Random => {
                free.shuffle(&mut self.rng);
                free.truncate(total);
                free
            }
            PlacementMode::FixedPattern => {
                let stride = free.len() / total;
                (0..total).map(|i| free[i * stride]).collect()
            }
        };

        // Spread predators evenly through the placement order
        let mut rng = self.rng.clone();
        for (i, pos) in cells.into_iter().enumerate() {
            let is_predator = ((i + 1) * predators) / total > (i * predators) / total;
            let species = if is_predator {
                Species::Predator
            } else {
                Species::Prey
            };
            self.place(species, pos, &mut rng)?;
        }
        self.rng = rng;
        self.shared.registry.commit_births();

        log::info!(
            "Initialized {}x{} world: {} prey, {} predators, coverage {:.3} (seed {})",
            self.shared.grid.width(),
            self.shared.grid.height(),
            prey,
            predators,
            self.shared.grid.resource_coverage(),
            self.seed
        );
        Ok(())
    }

    fn place(&self, species: Species, pos: Position, rng: &mut ChaCha8Rng) -> Result<AgentId> {
        let cfg = self.shared.engine.species_config(species);
        let id = self.shared.registry.spawn(
            species,
            Sex::random(rng),
            pos,
            cfg.energy_start,
            cfg.energy_max,
            self.tick(),
        );
        self.shared.grid.set_occupant(id, pos).map_err(|e| {
            SimError::InvalidConfiguration(format!("cannot place {} at {pos}: {e}", species.name()))
        })?;
        Ok(id)
    }

    /// Attach a statistics collaborator
    pub fn add_sink(&mut self, sink: Box<dyn StatsSink>) {
        self.sinks.push(sink);
    }

    /// Advance one tick
    pub fn step(&mut self) -> Result<StepReport> {
        let shared = Arc::clone(&self.shared);

        // Phase 1: freeze tunables and open the tick
        let tunables = Arc::new(*self.controller.tunables());
        let actors = shared.registry.live_ids();
        let tick = shared.coordinator.open_tick(actors.iter().copied())?;
        let view = Arc::new(TickView::capture(tick, &shared.registry, &shared.grid));

        // Phase 2: one unit per live agent
        for id in actors {
            let shared = Arc::clone(&shared);
            let view = Arc::clone(&view);
            let tunables = Arc::clone(&tunables);
            let seed = self.seed;
            self.pool.spawn(move || {
                let ctx = AgentContext {
                    view: &view,
                    grid: &shared.grid,
                    registry: &shared.registry,
                    coordinator: &shared.coordinator,
                    tunables: &tunables,
                    seed,
                };
                shared.engine.run_agent(&ctx, id);
            });
        }

        // Phase 3: barrier
        let barrier = shared.coordinator.wait_for_completion(self.timeout);
        self.track_timeouts(&barrier);

        // Phases 4-7 run alone; the coordinator returns to idle either way
        let result = self.commit(&shared, barrier);
        shared.coordinator.finish_tick();
        result
    }

    fn commit(&mut self, shared: &Shared, barrier: TickReport) -> Result<StepReport> {
        let tick = barrier.tick;

        // Phase 4: structural changes
        let births = shared.registry.commit_births().len();
        shared.grid.advance_regrowth();
        let reaped = shared.registry.reap_dead();
        for &id in &reaped {
            shared.grid.clear_occupant(id);
        }
        shared
            .grid
            .verify_occupancy(&shared.registry.live_positions())?;

        // Phase 5: statistics
        let mut stats = Statistics::collect(tick, &shared.registry, &shared.grid);
        stats.births = births;
        stats.deaths = reaped.len();
        self.history.record(stats.clone());
        for sink in &mut self.sinks {
            sink.record(&stats)?;
        }
        let interval = self.config.logging.stats_interval;
        if interval > 0 && tick % interval == 0 {
            log::info!("{}", stats.summary());
        }

        // Phase 6: controller
        let regime = self.controller.update(
            tick,
            stats.prey_count,
            stats.predator_count,
            stats.resource_coverage,
        );

        // Phase 7: model overlay
        let refit = self.config.estimator.refit_interval;
        if refit > 0 && tick % refit == 0 {
            self.refit();
        }

        Ok(StepReport {
            barrier,
            stats,
            regime,
        })
    }

    fn track_timeouts(&mut self, barrier: &TickReport) {
        if !barrier.outcome.is_timeout() {
            self.consecutive_timeouts = 0;
            return;
        }
        self.consecutive_timeouts += 1;
        self.total_timeouts += 1;
        log::warn!(
            "Tick {} timed out after {}ms: {} of {} agents did not respond",
            barrier.tick,
            barrier.elapsed_ms,
            barrier.expected - barrier.completed,
            barrier.expected
        );
        let limit = self.config.tick.max_consecutive_timeouts;
        if limit > 0 && self.consecutive_timeouts % limit == 0 {
            log::error!(
                "{} consecutive tick timeouts; agent units may be stalled",
                self.consecutive_timeouts
            );
        }
    }

    /// Refit the model over the configured window
    pub fn refit(&mut self) -> LotkaVolterraParams {
        let series = self.history.recent_series(self.config.estimator.window);
        let params = estimate_parameters(&series);
        log::debug!("Refit over {} ticks: {}", series.len(), params);
        self.fit = Some(params);
        params
    }

    /// End condition reached by the current population, if any
    pub fn end_condition(&self) -> Option<EndCondition> {
        let prey = self.shared.registry.count(Species::Prey);
        let predators = self.shared.registry.count(Species::Predator);
        match (prey, predators) {
            (0, 0) => Some(EndCondition::Collapse),
            (0, _) => Some(EndCondition::Extinction(Species::Prey)),
            (_, 0) => Some(EndCondition::Extinction(Species::Predator)),
            _ => None,
        }
    }

    pub fn is_extinct(&self) -> bool {
        self.end_condition().is_some()
    }

    /// Run until extinction or `max_ticks` more ticks (`None` uses
    /// `tick.max_ticks`; 0 there means unlimited)
    pub fn run(&mut self, max_ticks: Option<u64>) -> Result<RunSummary> {
        self.run_with_callback(max_ticks, |_| {})
    }

    /// Run with a callback after every tick
    pub fn run_with_callback<F>(&mut self, max_ticks: Option<u64>, mut callback: F) -> Result<RunSummary>
    where
        F: FnMut(&StepReport),
    {
        let limit = max_ticks.or(Some(self.config.tick.max_ticks).filter(|&n| n > 0));
        let mut ticks = 0u64;

        let end = loop {
            if let Some(end) = self.end_condition() {
                break end;
            }
            if let Some(limit) = limit {
                if ticks >= limit {
                    break EndCondition::MaxTicks(self.tick());
                }
            }
            let report = self.step()?;
            ticks += 1;
            callback(&report);
        };

        for sink in &mut self.sinks {
            sink.flush()?;
        }
        let fit = (self.history.len() > 1).then(|| self.refit());
        let (peak_prey, peak_predators) = self.history.peaks();

        log::info!("Run ended at tick {}: {}", self.tick(), end);
        if let Some(stats) = self.history.latest() {
            log::info!("{}", stats.summary());
        }

        Ok(RunSummary {
            ticks,
            end,
            final_stats: self.history.latest().cloned(),
            timeouts: self.total_timeouts,
            peak_prey,
            peak_predators,
            fit,
        })
    }

    /// Restore every tunable to its baseline; only between ticks
    pub fn reset_to_defaults(&mut self) -> Result<()> {
        self.shared.coordinator.ensure_idle()?;
        self.controller.reset_to_defaults();
        log::info!("Tunables reset to baseline");
        Ok(())
    }

    /// Install new safety bounds; only between ticks
    pub fn apply_bounds(&mut self, bounds: TunableBounds) -> Result<()> {
        self.shared.coordinator.ensure_idle()?;
        self.controller.apply_bounds(bounds)?;
        log::info!("Applied new tunable bounds");
        Ok(())
    }

    /// Owned copy of the current state
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick(),
            width: self.shared.grid.width(),
            height: self.shared.grid.height(),
            cells: self.shared.grid.snapshot(),
            agents: self.shared.registry.live_views(),
            latest: self.history.latest().cloned(),
            tunables: *self.controller.tunables(),
            regime: self.controller.regime(),
            fit: self.fit,
        }
    }

    /// Last completed tick
    pub fn tick(&self) -> u64 {
        self.shared.coordinator.current_tick()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.shared.grid
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.shared.registry
    }

    pub fn coordinator(&self) -> &TickCoordinator {
        &self.shared.coordinator
    }

    pub fn controller(&self) -> &AdaptiveController {
        &self.controller
    }

    pub fn history(&self) -> &StatsHistory {
        &self.history
    }

    pub fn latest_fit(&self) -> Option<LotkaVolterraParams> {
        self.fit
    }

    /// Model built from the latest fit
    pub fn model(&self) -> Option<LotkaVolterraModel> {
        self.fit
            .map(|p| LotkaVolterraModel::new(p).with_substeps(self.config.estimator.substeps))
    }

    pub fn count(&self, species: Species) -> usize {
        self.shared.registry.count(species)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Bound;
    use crate::tick::{TickOutcome, TickPhase};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.world.width = 20;
        config.world.height = 20;
        config.world.initial_prey = 30;
        config.world.initial_predators = 8;
        config.tick.worker_threads = 2;
        config.logging.stats_interval = 0;
        config
    }

    #[test]
    fn test_world_creation() {
        let sim = Simulation::new_with_seed(test_config(), 42).unwrap();
        assert_eq!(sim.count(Species::Prey), 30);
        assert_eq!(sim.count(Species::Predator), 8);
        assert_eq!(sim.tick(), 0);
        assert_eq!(sim.grid().occupied_count(), 38);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.world.height = 0;
        assert!(matches!(
            Simulation::new_with_seed(config, 1),
            Err(SimError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_world_step() {
        let mut sim = Simulation::new_with_seed(test_config(), 42).unwrap();
        let report = sim.step().unwrap();
        assert_eq!(report.barrier.tick, 1);
        assert_eq!(report.barrier.outcome, TickOutcome::Complete);
        assert_eq!(report.barrier.completed, 38);
        assert_eq!(sim.tick(), 1);
        assert_eq!(sim.coordinator().phase(), TickPhase::Idle);
        assert_eq!(sim.history().len(), 1);
    }

    #[test]
    fn test_world_run_max_ticks() {
        let mut sim = Simulation::new_with_seed(test_config(), 7).unwrap();
        let summary = sim.run(Some(15)).unwrap();
        if summary.end == EndCondition::MaxTicks(15) {
            assert_eq!(summary.ticks, 15);
        } else {
            assert!(summary.ticks <= 15);
        }
        assert_eq!(sim.history().len() as u64, summary.ticks);
    }

    #[test]
    fn test_extinction_ends_run() {
        let mut config = test_config();
        config.world.initial_predators = 0;
        let mut sim = Simulation::new_with_seed(config, 3).unwrap();
        let summary = sim.run(Some(100)).unwrap();
        assert_eq!(summary.end, EndCondition::Extinction(Species::Predator));
        assert_eq!(summary.ticks, 0);
    }

    #[test]
    fn test_fixed_pattern_is_reproducible() {
        let mut config = test_config();
        config.world.obstacle_coverage = 0.0;
        config.world.placement = PlacementMode::FixedPattern;
        let a = Simulation::new_with_seed(config.clone(), 1).unwrap();
        let b = Simulation::new_with_seed(config, 2).unwrap();

        let positions = |s: &Simulation| {
            s.registry()
                .live_views()
                .iter()
                .map(|v| (v.species, v.position))
                .collect::<Vec<_>>()
        };
        assert_eq!(positions(&a), positions(&b));
    }

    #[test]
    fn test_with_agents_rejects_overlap() {
        let mut config = test_config();
        config.world.obstacle_coverage = 0.0;
        let p = Position::new(1, 1);
        let result = Simulation::with_agents(config, 5, &[(Species::Prey, p), (Species::Predator, p)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_reset_and_bounds_when_idle() {
        let mut sim = Simulation::new_with_seed(test_config(), 11).unwrap();
        sim.step().unwrap();
        sim.reset_to_defaults().unwrap();
        assert_eq!(sim.controller().tunables(), sim.controller().baseline());

        let mut bounds = TunableBounds::default();
        bounds.prey_resource_gain = Bound::new(40.0, 10.0);
        assert!(sim.apply_bounds(bounds).is_err());

        bounds.prey_resource_gain = Bound::new(20.0, 25.0);
        sim.apply_bounds(bounds).unwrap();
        assert!(sim.controller().tunables().prey_resource_gain >= 20.0);
    }

    #[test]
    fn test_snapshot_matches_state() {
        let mut sim = Simulation::new_with_seed(test_config(), 13).unwrap();
        sim.step().unwrap();
        let snap = sim.snapshot();
        assert_eq!(snap.tick, 1);
        assert_eq!(snap.cells.len(), 400);
        assert_eq!(snap.agents.len(), sim.registry().live_ids().len());
        let occupied = snap.cells.iter().filter(|c| c.occupant.is_some()).count();
        assert_eq!(occupied, snap.agents.len());
        assert!(snap.latest.is_some());
    }

    #[test]
    fn test_refit_interval() {
        let mut config = test_config();
        config.estimator.refit_interval = 5;
        let mut sim = Simulation::new_with_seed(config, 17).unwrap();
        for _ in 0..4 {
            sim.step().unwrap();
        }
        assert!(sim.latest_fit().is_none());
        sim.step().unwrap();
        assert!(sim.latest_fit().is_some());
        assert!(sim.model().is_some());
    }
}
