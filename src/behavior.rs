//! Per-agent perceive, decide and act cycle.
//!
//! Perception reads only the [`TickView`] frozen when the tick opened.
//! Actions go through the grid's check-and-set primitives and the
//! registry's per-record locks, so concurrent units never corrupt each
//! other. A failed claim falls back to another free cell or staying put.

use crate::agent::{Agent, AgentId, AgentView, Position, Sex, Species};
use crate::config::SpeciesConfig;
use crate::controller::Tunables;
use crate::grid::SpatialGrid;
use crate::registry::AgentRegistry;
use crate::tick::TickCoordinator;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

/// Environment as of tick start
#[derive(Debug, Clone)]
pub struct TickView {
    tick: u64,
    width: usize,
    height: usize,
    /// Live agents ordered by id
    agents: Vec<AgentView>,
    by_id: HashMap<AgentId, usize>,
    /// Row-major cell to index into `agents`
    occupants: Vec<Option<usize>>,
    resources: Vec<bool>,
    walkable: Vec<bool>,
}

impl TickView {
    /// Freeze registry and grid state for one tick
    pub fn capture(tick: u64, registry: &AgentRegistry, grid: &SpatialGrid) -> Self {
        let width = grid.width();
        let height = grid.height();
        let agents = registry.live_views();
        let mut occupants = vec![None; width * height];
        let mut by_id = HashMap::with_capacity(agents.len());
        for (i, agent) in agents.iter().enumerate() {
            by_id.insert(agent.id, i);
            if grid.in_bounds(agent.position) {
                let offset = agent.position.y as usize * width + agent.position.x as usize;
                occupants[offset] = Some(i);
            }
        }
        let resources = grid.cells().iter().map(|c| c.has_resource()).collect();
        let walkable = grid.cells().iter().map(|c| c.is_walkable()).collect();

        Self {
            tick,
            width,
            height,
            agents,
            by_id,
            occupants,
            resources,
            walkable,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn agents(&self) -> &[AgentView] {
        &self.agents
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentView> {
        self.by_id.get(&id).map(|&i| &self.agents[i])
    }

    #[inline]
    fn offset(&self, pos: Position) -> Option<usize> {
        (pos.x >= 0 && pos.y >= 0 && (pos.x as usize) < self.width && (pos.y as usize) < self.height)
            .then(|| pos.y as usize * self.width + pos.x as usize)
    }

    pub fn is_walkable(&self, pos: Position) -> bool {
        self.offset(pos).is_some_and(|i| self.walkable[i])
    }

    pub fn has_resource(&self, pos: Position) -> bool {
        self.offset(pos).is_some_and(|i| self.resources[i])
    }

    pub fn occupant(&self, pos: Position) -> Option<&AgentView> {
        self.offset(pos)
            .and_then(|i| self.occupants[i])
            .map(|i| &self.agents[i])
    }

    /// Walkable and vacant at tick start
    pub fn is_free(&self, pos: Position) -> bool {
        self.offset(pos)
            .is_some_and(|i| self.walkable[i] && self.occupants[i].is_none())
    }

    pub fn free_neighbors(&self, pos: Position) -> Vec<Position> {
        pos.neighbors()
            .into_iter()
            .filter(|&n| self.is_free(n))
            .collect()
    }

    /// Cells within a Chebyshev radius, row-major, clipped to the grid
    fn scan(&self, center: Position, radius: i32) -> impl Iterator<Item = Position> + '_ {
        let x0 = (center.x - radius).max(0);
        let y0 = (center.y - radius).max(0);
        let x1 = (center.x + radius).min(self.width as i32 - 1);
        let y1 = (center.y + radius).min(self.height as i32 - 1);
        (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| Position::new(x, y)))
    }

    /// Nearest live agent matching `filter` within `radius`.
    ///
    /// Ties: Chebyshev distance, then Euclidean, then id.
    pub fn nearest_agent<F>(&self, from: Position, radius: i32, filter: F) -> Option<&AgentView>
    where
        F: Fn(&AgentView) -> bool,
    {
        self.scan(from, radius)
            .filter_map(|p| self.occupant(p))
            .filter(|a| a.alive && filter(a))
            .min_by_key(|a| (from.chebyshev(&a.position), from.distance_sq(&a.position), a.id))
    }

    /// Nearest resource cell within `radius`, the agent's own cell included
    pub fn nearest_resource(&self, from: Position, radius: i32) -> Option<Position> {
        self.scan(from, radius)
            .filter(|&p| self.has_resource(p))
            .min_by_key(|p| (from.chebyshev(p), from.distance_sq(p), p.y, p.x))
    }
}

/// Decision made from the tick-start view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Predator attacks prey in capture range
    Capture { target: AgentId },
    Hunt { step: Position, target: AgentId },
    Flee { step: Position, threat: AgentId },
    /// Step toward (or stay on) the nearest resource
    Forage { step: Position },
    Wander { step: Position },
    /// Stay in place
    Hold,
}

impl Intent {
    pub fn step(&self) -> Option<Position> {
        match *self {
            Intent::Hunt { step, .. }
            | Intent::Flee { step, .. }
            | Intent::Forage { step }
            | Intent::Wander { step } => Some(step),
            Intent::Capture { .. } | Intent::Hold => None,
        }
    }
}

/// What one agent did during its unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionReport {
    pub intent: Intent,
    pub position: Position,
    pub ate: bool,
    pub captured: Option<AgentId>,
    pub offspring: Option<AgentId>,
    pub died: bool,
}

/// Shared state handed to every agent unit
#[derive(Clone, Copy)]
pub struct AgentContext<'a> {
    pub view: &'a TickView,
    pub grid: &'a SpatialGrid,
    pub registry: &'a AgentRegistry,
    pub coordinator: &'a TickCoordinator,
    pub tunables: &'a Tunables,
    pub seed: u64,
}

/// Random stream for one agent in one tick, independent of scheduling
pub fn agent_rng(seed: u64, tick: u64, agent: AgentId) -> ChaCha8Rng {
    let mut z = seed ^ tick.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    let mut rng = ChaCha8Rng::seed_from_u64(z ^ (z >> 31));
    rng.set_stream(agent);
    rng
}

/// Reactive behavior for both species
#[derive(Debug, Clone)]
pub struct BehaviorEngine {
    prey: SpeciesConfig,
    predator: SpeciesConfig,
}

impl BehaviorEngine {
    pub fn new(prey: SpeciesConfig, predator: SpeciesConfig) -> Self {
        Self { prey, predator }
    }

    pub fn species_config(&self, species: Species) -> &SpeciesConfig {
        match species {
            Species::Prey => &self.prey,
            Species::Predator => &self.predator,
        }
    }

    /// Full cycle for one agent; always signals completion
    pub fn run_agent(&self, ctx: &AgentContext<'_>, id: AgentId) -> Option<ActionReport> {
        let tick = ctx.view.tick();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.act(ctx, id)));
        let report = match result {
            Ok(report) => report,
            Err(_) => {
                log::error!("agent {} panicked during tick {}", id, tick);
                None
            }
        };
        ctx.coordinator.signal_done(tick, id);
        report
    }

    /// Choose an action from the tick-start view only.
    ///
    /// A predator with prey in capture range holds position while its
    /// eating cooldown is running.
    pub fn decide<R: Rng + ?Sized>(
        &self,
        view: &TickView,
        me: &AgentView,
        eating_cooldown: u32,
        rng: &mut R,
    ) -> Intent {
        let cfg = self.species_config(me.species);
        let here = me.position;

        match me.species {
            Species::Predator => {
                let target = view.nearest_agent(here, cfg.vision_range, |a| {
                    a.species == me.species.opponent()
                });
                match target {
                    Some(prey) if here.chebyshev(&prey.position) <= cfg.capture_range => {
                        if eating_cooldown == 0 {
                            Intent::Capture { target: prey.id }
                        } else {
                            Intent::Hold
                        }
                    }
                    Some(prey) => match best_step(view, here, prey.position) {
                        Some(step) => Intent::Hunt {
                            step,
                            target: prey.id,
                        },
                        None => Intent::Hold,
                    },
                    None => wander(view, here, rng),
                }
            }
            Species::Prey => {
                let threat = view.nearest_agent(here, cfg.flee_radius, |a| {
                    a.species == me.species.opponent()
                });
                if let Some(threat) = threat {
                    return match flee_step(view, here, threat.position) {
                        Some(step) => Intent::Flee {
                            step,
                            threat: threat.id,
                        },
                        None => Intent::Hold,
                    };
                }
                match view.nearest_resource(here, cfg.vision_range) {
                    Some(food) if food == here => Intent::Forage { step: here },
                    Some(food) => match best_step(view, here, food) {
                        Some(step) => Intent::Forage { step },
                        None => Intent::Hold,
                    },
                    None => wander(view, here, rng),
                }
            }
        }
    }

    /// Decide outside the commit gate, then apply the action under one guard
    fn act(&self, ctx: &AgentContext<'_>, id: AgentId) -> Option<ActionReport> {
        let tick = ctx.view.tick();
        if !ctx.coordinator.accepts(tick) {
            return None;
        }
        let me = *ctx.view.agent(id)?;
        let cfg = self.species_config(me.species);
        let tunables = ctx.tunables;
        let mut rng = agent_rng(ctx.seed, tick, id);

        let eating_cooldown = ctx
            .registry
            .with_agent(id, |a| a.alive.then(|| a.eating_cooldown.saturating_sub(1)))
            .flatten()?;
        let intent = self.decide(ctx.view, &me, eating_cooldown, &mut rng);

        let _guard = ctx.coordinator.begin_commit(tick)?;
        ctx.registry
            .with_agent(id, |a| {
                a.alive.then(|| {
                    a.reproduction_cooldown = a.reproduction_cooldown.saturating_sub(1);
                    a.eating_cooldown = a.eating_cooldown.saturating_sub(1);
                })
            })
            .flatten()?;

        let mut position = me.position;
        let mut captured = None;
        match intent {
            Intent::Capture { target } => {
                // First committed kill wins; a stale target is a no-op
                if rng.gen_bool(tunables.capture_chance()) && ctx.registry.kill(target) {
                    captured = Some(target);
                }
            }
            _ => {
                if let Some(step) = intent.step().filter(|&s| s != position) {
                    position = self.move_to(ctx, id, position, step, &mut rng);
                }
            }
        }

        let ate = match me.species {
            Species::Prey => ctx.grid.consume_resource(position, tunables.regrowth_ticks()),
            Species::Predator => captured.is_some(),
        };
        let (gain, move_cost) = match me.species {
            Species::Prey => (tunables.prey_gain(), cfg.move_cost as i32),
            Species::Predator => (cfg.food_gain, tunables.predator_move_cost as i32),
        };

        let alive = ctx
            .registry
            .with_agent(id, |a| {
                a.position = position;
                if ate {
                    a.gain_energy(gain);
                    a.ticks_without_food = 0;
                    if me.species == Species::Predator {
                        a.eating_cooldown = cfg.eating_cooldown;
                    }
                } else {
                    a.ticks_without_food = a.ticks_without_food.saturating_add(1);
                }
                a.spend_energy(move_cost);
                a.alive
            })
            .unwrap_or(false);

        let offspring = if alive {
            self.try_reproduce(ctx, &me, position, &mut rng)
        } else {
            None
        };

        let died = ctx
            .registry
            .with_agent(id, |a| {
                if a.alive
                    && (a.energy <= cfg.starvation_floor
                        || a.ticks_without_food >= cfg.starvation_limit)
                {
                    a.alive = false;
                }
                !a.alive
            })
            .unwrap_or(true);

        Some(ActionReport {
            intent,
            position,
            ate,
            captured,
            offspring,
            died,
        })
    }

    /// Claim `step`, else a random free neighbor, else stay
    fn move_to<R: Rng + ?Sized>(
        &self,
        ctx: &AgentContext<'_>,
        id: AgentId,
        from: Position,
        step: Position,
        rng: &mut R,
    ) -> Position {
        if ctx.grid.set_occupant(id, step).is_ok() {
            return step;
        }
        let mut fallback = ctx.grid.free_neighbors(from);
        fallback.shuffle(rng);
        fallback
            .into_iter()
            .find(|&cell| ctx.grid.set_occupant(id, cell).is_ok())
            .unwrap_or(from)
    }

    /// Mate with the nearest eligible partner and queue one offspring.
    ///
    /// Locks one record at a time: self is debited first and refunded if
    /// the partner turns out to be no longer eligible.
    fn try_reproduce<R: Rng + ?Sized>(
        &self,
        ctx: &AgentContext<'_>,
        me: &AgentView,
        position: Position,
        rng: &mut R,
    ) -> Option<AgentId> {
        let cfg = self.species_config(me.species);
        let eligible = ctx
            .registry
            .with_agent(me.id, |a| a.can_reproduce(cfg.reproduction_threshold))
            .unwrap_or(false);
        if !eligible {
            return None;
        }

        let mate = ctx.view.nearest_agent(position, cfg.mating_range, |a| {
            a.id != me.id
                && a.species == me.species
                && a.sex != me.sex
                && a.energy >= cfg.reproduction_threshold
                && a.reproduction_cooldown == 0
        })?;
        let mate_id = mate.id;

        let child = ctx.registry.reserve_id();
        let mut cells = ctx.grid.free_neighbors(position);
        cells.shuffle(rng);
        let cell = cells
            .into_iter()
            .find(|&c| ctx.grid.set_occupant(child, c).is_ok())?;

        let cooldown = ctx.tunables.reproduction_cooldown(me.species);
        let debit = |a: &mut Agent| -> Option<(i32, u32)> {
            if !a.can_reproduce(cfg.reproduction_threshold) {
                return None;
            }
            let before = (a.energy, a.reproduction_cooldown);
            a.energy = (a.energy as f64 / cfg.reproduction_cost) as i32;
            a.reproduction_cooldown = cooldown;
            Some(before)
        };

        let Some(before) = ctx.registry.with_agent(me.id, debit).flatten() else {
            ctx.grid.clear_occupant(child);
            return None;
        };
        let mate_paid = ctx
            .registry
            .with_agent(mate_id, debit)
            .flatten()
            .is_some();
        if !mate_paid {
            ctx.registry.with_agent(me.id, |a| {
                a.energy = before.0;
                a.reproduction_cooldown = before.1;
            });
            ctx.grid.clear_occupant(child);
            return None;
        }

        ctx.registry.spawn_reserved(Agent::new(
            child,
            me.species,
            Sex::random(rng),
            cell,
            cfg.energy_start,
            cfg.energy_max,
            ctx.view.tick(),
        ));
        Some(child)
    }
}

/// Free neighbor closest to `target` (Chebyshev, then Euclidean)
fn best_step(view: &TickView, from: Position, target: Position) -> Option<Position> {
    view.free_neighbors(from)
        .into_iter()
        .min_by_key(|n| (n.chebyshev(&target), n.distance_sq(&target)))
}

/// Free neighbor that strictly increases distance from `threat`
fn flee_step(view: &TickView, from: Position, threat: Position) -> Option<Position> {
    let mut best = None;
    let mut best_distance = from.distance_sq(&threat);
    for n in view.free_neighbors(from) {
        let d = n.distance_sq(&threat);
        if d > best_distance {
            best = Some(n);
            best_distance = d;
        }
    }
    best
}

fn wander<R: Rng + ?Sized>(view: &TickView, from: Position, rng: &mut R) -> Intent {
    match view.free_neighbors(from).choose(rng) {
        Some(&step) => Intent::Wander { step },
        None => Intent::Hold,
    }
}
