//! Adaptive parameter controller.
//!
//! Once per tick, after dead agents are reaped and statistics collected, the
//! controller pulls every tunable toward a regime-dependent target with
//! exponential smoothing (`current += (target - current) * rate`) and then
//! clamps it into its safety bounds. Agents only ever read a snapshot.

use crate::agent::Species;
use crate::config::{Config, ControllerConfig};
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};

// Fast-relax targets used when a population falls below its floor
const PREY_RESCUE_COOLDOWN: f64 = 15.0;
const PREY_RESCUE_GAIN: f64 = 35.0;
const PREDATOR_RESCUE_COOLDOWN: f64 = 35.0;
const PREDATOR_RESCUE_MOVE_COST: f64 = 2.0;
const MERCY_FACTOR: f64 = 0.95;
const RESCUE_CAPTURE_FACTOR: f64 = 1.05;

// Predator pressure on prey reproduction
const HIGH_PRESSURE_RATIO: f64 = 0.5;
const LOW_PRESSURE_RATIO: f64 = 0.15;
const PRESSURED_PREY_COOLDOWN: f64 = 18.0;
const SAFE_PREY_COOLDOWN: f64 = 30.0;

// Prey abundance on predator reproduction and hunting
const SCARCE_PREY_RATIO: f64 = 3.0;
const ABUNDANT_PREY_RATIO: f64 = 8.0;
const STARVED_PREDATOR_COOLDOWN: f64 = 85.0;
const FED_PREDATOR_COOLDOWN: f64 = 45.0;
const HARD_HUNTING_PREY_PER_PREDATOR: f64 = 2.0;
const EASY_HUNTING_PREY_PER_PREDATOR: f64 = 6.0;
const HARD_HUNTING_FACTOR: f64 = 0.6;
const EASY_HUNTING_FACTOR: f64 = 1.15;
const EASY_HUNTING_CAP: f64 = 0.80;

// Resource regrowth targets
const COLLAPSE_REGROWTH: f64 = 8.0;
const CROWDED_GRAZING_COVERAGE: f64 = 0.30;
const CROWDED_GRAZING_PREY: usize = 40;
const CROWDED_REGROWTH: f64 = 12.0;
const SPARSE_PREY: usize = 30;
const SPARSE_REGROWTH: f64 = 10.0;
const LOW_COVERAGE_REGROWTH: f64 = 15.0;
const LUSH_REGROWTH: f64 = 35.0;

/// Behavior parameters retuned every tick.
///
/// Values are kept as `f64` so slow smoothing accumulates instead of being
/// truncated away; integer views round on read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tunables {
    pub capture_probability: f64,
    pub prey_reproduction_cooldown: f64,
    pub predator_reproduction_cooldown: f64,
    pub resource_regrowth_time: f64,
    pub prey_resource_gain: f64,
    pub predator_move_cost: f64,
}

impl Tunables {
    /// Cooldown in whole ticks for a species
    pub fn reproduction_cooldown(&self, species: Species) -> u32 {
        let value = match species {
            Species::Prey => self.prey_reproduction_cooldown,
            Species::Predator => self.predator_reproduction_cooldown,
        };
        value.round().max(0.0) as u32
    }

    /// Regrowth time in whole ticks, never zero
    pub fn regrowth_ticks(&self) -> u32 {
        self.resource_regrowth_time.round().max(1.0) as u32
    }

    /// Energy a prey gains from one resource
    pub fn prey_gain(&self) -> i32 {
        self.prey_resource_gain.round().max(0.0) as i32
    }

    /// Capture probability as a valid Bernoulli parameter
    pub fn capture_chance(&self) -> f64 {
        self.capture_probability.clamp(0.0, 1.0)
    }
}

/// Closed interval for one tunable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
}

impl Bound {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Safety bounds applied after every controller update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TunableBounds {
    pub capture_probability: Bound,
    pub prey_reproduction_cooldown: Bound,
    pub predator_reproduction_cooldown: Bound,
    pub resource_regrowth_time: Bound,
    pub prey_resource_gain: Bound,
    pub predator_move_cost: Bound,
}

impl Default for TunableBounds {
    fn default() -> Self {
        Self {
            capture_probability: Bound::new(0.25, 0.85),
            prey_reproduction_cooldown: Bound::new(15.0, 40.0),
            predator_reproduction_cooldown: Bound::new(40.0, 100.0),
            resource_regrowth_time: Bound::new(8.0, 40.0),
            prey_resource_gain: Bound::new(5.0, 35.0),
            predator_move_cost: Bound::new(1.0, 8.0),
        }
    }
}

impl TunableBounds {
    fn entries(&self) -> [(&'static str, Bound); 6] {
        [
            ("capture_probability", self.capture_probability),
            ("prey_reproduction_cooldown", self.prey_reproduction_cooldown),
            ("predator_reproduction_cooldown", self.predator_reproduction_cooldown),
            ("resource_regrowth_time", self.resource_regrowth_time),
            ("prey_resource_gain", self.prey_resource_gain),
            ("predator_move_cost", self.predator_move_cost),
        ]
    }

    /// Reject empty or non-finite intervals
    pub fn validate(&self) -> Result<()> {
        for (name, bound) in self.entries() {
            if !bound.min.is_finite() || !bound.max.is_finite() || bound.min > bound.max {
                return Err(SimError::InvalidConfiguration(format!(
                    "bounds.{name}: min {} exceeds max {}",
                    bound.min, bound.max
                )));
            }
            if bound.min < 0.0 {
                return Err(SimError::InvalidConfiguration(format!(
                    "bounds.{name} must be non-negative"
                )));
            }
        }
        if self.capture_probability.max > 1.0 {
            return Err(SimError::InvalidConfiguration(
                "bounds.capture_probability must stay within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamp every tunable into its interval
    pub fn clamp(&self, t: &mut Tunables) {
        t.capture_probability = self.capture_probability.clamp(t.capture_probability);
        t.prey_reproduction_cooldown = self
            .prey_reproduction_cooldown
            .clamp(t.prey_reproduction_cooldown);
        t.predator_reproduction_cooldown = self
            .predator_reproduction_cooldown
            .clamp(t.predator_reproduction_cooldown);
        t.resource_regrowth_time = self.resource_regrowth_time.clamp(t.resource_regrowth_time);
        t.prey_resource_gain = self.prey_resource_gain.clamp(t.prey_resource_gain);
        t.predator_move_cost = self.predator_move_cost.clamp(t.predator_move_cost);
    }

    /// Check that every tunable lies inside its interval
    pub fn contains(&self, t: &Tunables) -> bool {
        self.capture_probability.contains(t.capture_probability)
            && self.prey_reproduction_cooldown.contains(t.prey_reproduction_cooldown)
            && self
                .predator_reproduction_cooldown
                .contains(t.predator_reproduction_cooldown)
            && self.resource_regrowth_time.contains(t.resource_regrowth_time)
            && self.prey_resource_gain.contains(t.prey_resource_gain)
            && self.predator_move_cost.contains(t.predator_move_cost)
    }
}

/// Population situation observed by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Balanced,
    PreyCritical,
    PredatorCritical,
    BothCritical,
}

impl Regime {
    fn classify(prey: usize, predators: usize, config: &ControllerConfig) -> Self {
        match (prey < config.min_prey, predators < config.min_predators) {
            (true, true) => Regime::BothCritical,
            (true, false) => Regime::PreyCritical,
            (false, true) => Regime::PredatorCritical,
            (false, false) => Regime::Balanced,
        }
    }

    pub fn prey_critical(self) -> bool {
        matches!(self, Regime::PreyCritical | Regime::BothCritical)
    }

    pub fn predator_critical(self) -> bool {
        matches!(self, Regime::PredatorCritical | Regime::BothCritical)
    }
}

#[inline]
fn relax(current: f64, target: f64, rate: f64) -> f64 {
    current + (target - current) * rate
}

/// Single writer of the tunables
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    current: Tunables,
    baseline: Tunables,
    bounds: TunableBounds,
    config: ControllerConfig,
    regime: Regime,
}

impl AdaptiveController {
    pub fn new(baseline: Tunables, bounds: TunableBounds, config: ControllerConfig) -> Self {
        let mut current = baseline;
        bounds.clamp(&mut current);
        Self {
            current,
            baseline,
            bounds,
            config,
            regime: Regime::Balanced,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.baseline_tunables(),
            config.bounds,
            config.controller.clone(),
        )
    }

    /// Current values
    pub fn tunables(&self) -> &Tunables {
        &self.current
    }

    pub fn baseline(&self) -> &Tunables {
        &self.baseline
    }

    pub fn bounds(&self) -> &TunableBounds {
        &self.bounds
    }

    /// Regime seen by the last update
    pub fn regime(&self) -> Regime {
        self.regime
    }

    /// Return every tunable to its configured baseline
    pub fn reset_to_defaults(&mut self) {
        self.current = self.baseline;
        self.bounds.clamp(&mut self.current);
        self.regime = Regime::Balanced;
    }

    /// Replace the safety bounds and re-clamp the current values
    pub fn apply_bounds(&mut self, bounds: TunableBounds) -> Result<()> {
        bounds.validate()?;
        self.bounds = bounds;
        self.bounds.clamp(&mut self.current);
        Ok(())
    }

    /// Retune from this tick's aggregate statistics
    pub fn update(
        &mut self,
        tick: u64,
        prey: usize,
        predators: usize,
        resource_coverage: f64,
    ) -> Regime {
        if prey == 0 && predators == 0 {
            return self.regime;
        }

        let regime = Regime::classify(prey, predators, &self.config);
        let predator_to_prey = (predators as f64 + 1.0) / (prey as f64 + 1.0);
        let prey_to_predator = (prey as f64 + 1.0) / (predators as f64 + 1.0);

        self.adapt_prey(regime, predator_to_prey);
        self.adapt_predators(regime, prey_to_predator);
        self.adapt_capture(regime, prey, predators);
        self.adapt_regrowth(regime, prey, resource_coverage);

        let drift = self.config.drift_interval;
        if drift > 0 && tick > 0 && tick % drift == 0 {
            self.current.capture_probability *= 1.0 + self.config.capture_drift;
            self.current.prey_resource_gain += self.config.gain_drift;
        }

        self.bounds.clamp(&mut self.current);
        self.regime = regime;

        let log_every = self.config.log_interval;
        if log_every > 0 && tick % log_every == 0 {
            log::debug!(
                "controller tick={} regime={:?} ratio={:.2} capture={:.3} prey_cd={:.1} pred_cd={:.1} regrowth={:.1} gain={:.1} move={:.2}",
                tick,
                regime,
                predators as f64 / prey.max(1) as f64,
                self.current.capture_probability,
                self.current.prey_reproduction_cooldown,
                self.current.predator_reproduction_cooldown,
                self.current.resource_regrowth_time,
                self.current.prey_resource_gain,
                self.current.predator_move_cost,
            );
        }

        regime
    }

    fn adapt_prey(&mut self, regime: Regime, predator_to_prey: f64) {
        let c = &self.config;
        let t = &mut self.current;
        if regime.prey_critical() {
            t.prey_reproduction_cooldown =
                relax(t.prey_reproduction_cooldown, PREY_RESCUE_COOLDOWN, c.fast_rate);
            t.prey_resource_gain = relax(t.prey_resource_gain, PREY_RESCUE_GAIN, c.fast_rate);
            return;
        }

        // Predator pressure speeds up prey breeding
        t.prey_reproduction_cooldown = if predator_to_prey > HIGH_PRESSURE_RATIO {
            relax(t.prey_reproduction_cooldown, PRESSURED_PREY_COOLDOWN, c.medium_rate)
        } else if predator_to_prey < LOW_PRESSURE_RATIO {
            relax(t.prey_reproduction_cooldown, SAFE_PREY_COOLDOWN, c.slow_rate)
        } else {
            relax(
                t.prey_reproduction_cooldown,
                self.baseline.prey_reproduction_cooldown,
                c.slow_rate,
            )
        };
        t.prey_resource_gain = relax(
            t.prey_resource_gain,
            self.baseline.prey_resource_gain,
            c.slow_rate,
        );
    }

    fn adapt_predators(&mut self, regime: Regime, prey_to_predator: f64) {
        let c = &self.config;
        let t = &mut self.current;
        if regime.predator_critical() {
            t.predator_reproduction_cooldown = relax(
                t.predator_reproduction_cooldown,
                PREDATOR_RESCUE_COOLDOWN,
                c.fast_rate,
            );
            t.predator_move_cost =
                relax(t.predator_move_cost, PREDATOR_RESCUE_MOVE_COST, c.fast_rate);
            return;
        }

        // Prey scarcity slows predator breeding; this lag drives the oscillation
        t.predator_reproduction_cooldown = if prey_to_predator < SCARCE_PREY_RATIO {
            relax(
                t.predator_reproduction_cooldown,
                STARVED_PREDATOR_COOLDOWN,
                c.medium_rate,
            )
        } else if prey_to_predator > ABUNDANT_PREY_RATIO {
            relax(
                t.predator_reproduction_cooldown,
                FED_PREDATOR_COOLDOWN,
                c.medium_rate,
            )
        } else {
            relax(
                t.predator_reproduction_cooldown,
                self.baseline.predator_reproduction_cooldown,
                c.slow_rate,
            )
        };
        t.predator_move_cost = relax(
            t.predator_move_cost,
            self.baseline.predator_move_cost,
            c.slow_rate,
        );
    }

    fn adapt_capture(&mut self, regime: Regime, prey: usize, predators: usize) {
        let c = &self.config;
        let base = self.baseline.capture_probability;
        let t = &mut self.current;

        if regime.prey_critical() {
            // Mercy rule
            t.capture_probability *= MERCY_FACTOR;
            return;
        }
        if regime.predator_critical() {
            t.capture_probability *= RESCUE_CAPTURE_FACTOR;
            return;
        }

        let prey_per_predator = prey as f64 / predators.max(1) as f64;
        t.capture_probability = if prey_per_predator < HARD_HUNTING_PREY_PER_PREDATOR {
            relax(t.capture_probability, base * HARD_HUNTING_FACTOR, c.medium_rate)
        } else if prey_per_predator > EASY_HUNTING_PREY_PER_PREDATOR {
            let target = (base * EASY_HUNTING_FACTOR).min(EASY_HUNTING_CAP);
            relax(t.capture_probability, target, c.medium_rate)
        } else {
            relax(t.capture_probability, base, c.slow_rate)
        };
    }

    fn adapt_regrowth(&mut self, regime: Regime, prey: usize, coverage: f64) {
        let c = &self.config;
        let baseline = self.baseline.resource_regrowth_time;
        let t = &mut self.current;
        let critical = coverage < c.critical_coverage;

        t.resource_regrowth_time = if regime.prey_critical() && critical {
            relax(t.resource_regrowth_time, COLLAPSE_REGROWTH, c.fast_rate)
        } else if coverage < CROWDED_GRAZING_COVERAGE && prey > CROWDED_GRAZING_PREY {
            relax(t.resource_regrowth_time, CROWDED_REGROWTH, c.fast_rate)
        } else if critical && prey < SPARSE_PREY {
            relax(t.resource_regrowth_time, SPARSE_REGROWTH, c.fast_rate)
        } else if critical {
            relax(t.resource_regrowth_time, LOW_COVERAGE_REGROWTH, c.medium_rate)
        } else if coverage > c.high_coverage {
            relax(t.resource_regrowth_time, LUSH_REGROWTH, c.slow_rate)
        } else {
            relax(t.resource_regrowth_time, baseline, c.slow_rate)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AdaptiveController {
        AdaptiveController::from_config(&Config::default())
    }

    #[test]
    fn test_prey_rescue_moves_cooldown_within_one_step() {
        let mut ctl = controller();
        let before = ctl.tunables().prey_reproduction_cooldown;
        let rate = ctl.config.fast_rate;

        let regime = ctl.update(1, 3, 20, 0.5);
        assert_eq!(regime, Regime::PreyCritical);

        let after = ctl.tunables().prey_reproduction_cooldown;
        let expected = before + (PREY_RESCUE_COOLDOWN - before) * rate;
        assert!(after < before);
        assert!((after - expected).abs() < 1e-9);
        assert!(after >= ctl.bounds().prey_reproduction_cooldown.min);
    }

    #[test]
    fn test_mercy_rule_lowers_capture() {
        let mut ctl = controller();
        let before = ctl.tunables().capture_probability;
        ctl.update(1, 3, 20, 0.5);
        assert!(ctl.tunables().capture_probability < before);
        assert!(ctl.tunables().prey_resource_gain > ctl.baseline().prey_resource_gain);
    }

    #[test]
    fn test_predator_rescue() {
        let mut ctl = controller();
        let capture = ctl.tunables().capture_probability;
        let cooldown = ctl.tunables().predator_reproduction_cooldown;

        assert_eq!(ctl.update(1, 80, 2, 0.5), Regime::PredatorCritical);
        assert!(ctl.tunables().capture_probability > capture);
        assert!(ctl.tunables().predator_reproduction_cooldown < cooldown);
        assert!(ctl.tunables().predator_move_cost < ctl.baseline().predator_move_cost);
    }

    #[test]
    fn test_rescue_never_leaves_bounds() {
        let mut ctl = controller();
        for tick in 1..2000 {
            ctl.update(tick, 2, 1, 0.05);
            assert!(ctl.bounds().contains(ctl.tunables()));
        }
        let t = ctl.tunables();
        assert!((t.prey_reproduction_cooldown - ctl.bounds().prey_reproduction_cooldown.min).abs() < 1.0);
        assert!((t.capture_probability - ctl.bounds().capture_probability.min).abs() < 1e-9);
    }

    #[test]
    fn test_balanced_drifts_to_baseline() {
        let mut ctl = controller();
        ctl.current.predator_move_cost = 7.5;
        // prey/predator ratio 4 keeps every rule near the baseline branch
        for tick in 1..400 {
            ctl.update(tick, 100, 25, 0.5);
        }
        let t = ctl.tunables();
        let b = ctl.baseline();
        assert!((t.predator_move_cost - b.predator_move_cost).abs() < 0.01);
        assert!((t.resource_regrowth_time - b.resource_regrowth_time).abs() < 0.01);
        assert!((t.capture_probability - b.capture_probability).abs() < 0.01);
    }

    #[test]
    fn test_predator_pressure_speeds_prey() {
        let mut ctl = controller();
        let before = ctl.tunables().prey_reproduction_cooldown;
        ctl.update(1, 30, 20, 0.5);
        assert!(ctl.tunables().prey_reproduction_cooldown < before);
    }

    #[test]
    fn test_scarce_prey_slows_predators() {
        let mut ctl = controller();
        let before = ctl.tunables().predator_reproduction_cooldown;
        ctl.update(1, 20, 10, 0.5);
        assert!(ctl.tunables().predator_reproduction_cooldown > before);
    }

    #[test]
    fn test_evolutionary_drift() {
        let mut config = Config::default();
        config.controller.drift_interval = 10;
        let mut ctl = AdaptiveController::from_config(&config);

        ctl.update(9, 100, 25, 0.5);
        let before = ctl.tunables().capture_probability;
        ctl.update(10, 100, 25, 0.5);
        let slow = config.controller.slow_rate;
        let relaxed = before + (config.predator.capture_probability - before) * slow;
        assert!(ctl.tunables().capture_probability > relaxed);
    }

    #[test]
    fn test_extinct_world_leaves_tunables() {
        let mut ctl = controller();
        let before = *ctl.tunables();
        ctl.update(1, 0, 0, 0.0);
        assert_eq!(*ctl.tunables(), before);
    }

    #[test]
    fn test_apply_bounds_reclamps() {
        let mut ctl = controller();
        let mut bounds = TunableBounds::default();
        bounds.capture_probability = Bound::new(0.6, 0.7);
        ctl.apply_bounds(bounds).unwrap();
        assert!((ctl.tunables().capture_probability - 0.6).abs() < 1e-9);

        bounds.capture_probability = Bound::new(0.8, 0.2);
        assert!(ctl.apply_bounds(bounds).is_err());
    }

    #[test]
    fn test_reset_to_defaults() {
        let mut ctl = controller();
        for tick in 1..50 {
            ctl.update(tick, 3, 3, 0.1);
        }
        ctl.reset_to_defaults();
        assert_eq!(*ctl.tunables(), *ctl.baseline());
        assert_eq!(ctl.regime(), Regime::Balanced);
    }

    #[test]
    fn test_integer_views() {
        let t = Config::default().baseline_tunables();
        assert_eq!(t.reproduction_cooldown(Species::Prey), 35);
        assert_eq!(t.reproduction_cooldown(Species::Predator), 50);
        assert_eq!(t.regrowth_ticks(), 18);
        assert_eq!(t.prey_gain(), 12);
    }
}
