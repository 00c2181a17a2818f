//! Lotka-Volterra fitting and integration.
//!
//! `dx/dt = αx − βxy` (prey), `dy/dt = δxy − γy` (predators).
//!
//! Parameters are estimated by ordinary least squares over consecutive
//! tick pairs, using the trapezoidal form of the difference equations:
//! `Δx = α·x̄ − β·(xy)̄` and `Δy = δ·(xy)̄ − γ·ȳ`. Each species is one
//! independent 2×2 normal-equation solve.

use serde::{Deserialize, Serialize};

/// Fewer usable tick pairs than this yields the conservative fit
pub const MIN_PAIRS: usize = 4;
/// Normal-equation determinants below this are treated as singular
pub const SINGULAR_EPSILON: f64 = 1e-10;

const MIN_RATE: f64 = 0.001;
const MIN_INTERACTION: f64 = 0.00001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotkaVolterraParams {
    /// Prey birth rate
    pub alpha: f64,
    /// Predation rate
    pub beta: f64,
    /// Predator death rate
    pub gamma: f64,
    /// Predator conversion efficiency
    pub delta: f64,
}

impl LotkaVolterraParams {
    pub const fn new(alpha: f64, beta: f64, gamma: f64, delta: f64) -> Self {
        Self {
            alpha,
            beta,
            gamma,
            delta,
        }
    }

    /// Returned when the data cannot support a fit
    pub const fn conservative() -> Self {
        Self::new(0.1, 0.001, 0.1, 0.0001)
    }

    /// Non-trivial fixed point `(γ/δ, α/β)`
    pub fn equilibrium(&self) -> (f64, f64) {
        (self.gamma / self.delta, self.alpha / self.beta)
    }

    /// Period of small oscillations around the equilibrium, in ticks
    pub fn period(&self) -> f64 {
        2.0 * std::f64::consts::PI / (self.alpha * self.gamma).sqrt()
    }
}

impl Default for LotkaVolterraParams {
    fn default() -> Self {
        Self::conservative()
    }
}

impl std::fmt::Display for LotkaVolterraParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "α={:.4} β={:.6} γ={:.4} δ={:.6}",
            self.alpha, self.beta, self.gamma, self.delta
        )
    }
}

/// Solve `[[a, b], [b, c]] · s = r`; `None` if near-singular
fn solve_symmetric(a: f64, b: f64, c: f64, r0: f64, r1: f64) -> Option<(f64, f64)> {
    let det = a * c - b * b;
    if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
        return None;
    }
    Some(((r0 * c - r1 * b) / det, (a * r1 - b * r0) / det))
}

/// Accumulates `Σ u², Σ uv, Σ v², Σ u·t, Σ v·t` for `t ≈ s0·u + s1·v`
#[derive(Default)]
struct Normal2 {
    uu: f64,
    uv: f64,
    vv: f64,
    ut: f64,
    vt: f64,
}

impl Normal2 {
    fn add(&mut self, u: f64, v: f64, t: f64) {
        self.uu += u * u;
        self.uv += u * v;
        self.vv += v * v;
        self.ut += u * t;
        self.vt += v * t;
    }

    fn solve(&self) -> Option<(f64, f64)> {
        solve_symmetric(self.uu, self.uv, self.vv, self.ut, self.vt)
    }
}

/// Fit `(α, β, γ, δ)` to a `(prey, predators)` series, one entry per tick.
///
/// Only pairs where both populations are positive at both ends are used.
/// Never fails: unsupported or singular data returns the conservative
/// parameter set for the affected species.
pub fn estimate_parameters(series: &[(f64, f64)]) -> LotkaVolterraParams {
    let fallback = LotkaVolterraParams::conservative();
    let mut prey = Normal2::default();
    let mut predators = Normal2::default();
    let mut pairs = 0usize;

    for w in series.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        if !(x0 > 0.0 && y0 > 0.0 && x1 > 0.0 && y1 > 0.0) {
            continue;
        }
        let x_mean = 0.5 * (x0 + x1);
        let y_mean = 0.5 * (y0 + y1);
        let xy_mean = 0.5 * (x0 * y0 + x1 * y1);

        prey.add(x_mean, -xy_mean, x1 - x0);
        predators.add(xy_mean, -y_mean, y1 - y0);
        pairs += 1;
    }

    if pairs < MIN_PAIRS {
        return fallback;
    }

    let (alpha, beta) = prey.solve().unwrap_or((fallback.alpha, fallback.beta));
    let (delta, gamma) = predators
        .solve()
        .unwrap_or((fallback.delta, fallback.gamma));

    LotkaVolterraParams {
        alpha: alpha.max(MIN_RATE),
        beta: beta.max(MIN_INTERACTION),
        gamma: gamma.max(MIN_RATE),
        delta: delta.max(MIN_INTERACTION),
    }
}

/// Root-mean-square distance between two series over their common length
pub fn fit_error(observed: &[(f64, f64)], predicted: &[(f64, f64)]) -> f64 {
    let n = observed.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = observed
        .iter()
        .zip(predicted)
        .map(|((ox, oy), (px, py))| (ox - px).powi(2) + (oy - py).powi(2))
        .sum();
    (sum / n as f64).sqrt()
}

/// Continuous model integrated with fixed-step RK4
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotkaVolterraModel {
    pub params: LotkaVolterraParams,
    /// RK4 steps per tick
    pub substeps: u32,
}

impl LotkaVolterraModel {
    pub fn new(params: LotkaVolterraParams) -> Self {
        Self {
            params,
            substeps: 10,
        }
    }

    pub fn with_substeps(mut self, substeps: u32) -> Self {
        self.substeps = substeps.max(1);
        self
    }

    /// Fit a model to a series
    pub fn fit(series: &[(f64, f64)]) -> Self {
        Self::new(estimate_parameters(series))
    }

    #[inline]
    pub fn derivatives(&self, x: f64, y: f64) -> (f64, f64) {
        let p = &self.params;
        (p.alpha * x - p.beta * x * y, p.delta * x * y - p.gamma * y)
    }

    fn rk4_step(&self, x: f64, y: f64, h: f64) -> (f64, f64) {
        let (k1x, k1y) = self.derivatives(x, y);
        let (k2x, k2y) = self.derivatives(x + 0.5 * h * k1x, y + 0.5 * h * k1y);
        let (k3x, k3y) = self.derivatives(x + 0.5 * h * k2x, y + 0.5 * h * k2y);
        let (k4x, k4y) = self.derivatives(x + h * k3x, y + h * k3y);
        let nx = x + h / 6.0 * (k1x + 2.0 * k2x + 2.0 * k3x + k4x);
        let ny = y + h / 6.0 * (k1y + 2.0 * k2y + 2.0 * k3y + k4y);
        (nx.max(0.0), ny.max(0.0))
    }

    /// Integrate from `(x0, y0)`; entry `t` is the state after `t` ticks,
    /// so the result has `ticks + 1` entries. Populations never go negative.
    pub fn simulate(&self, x0: f64, y0: f64, ticks: usize) -> Vec<(f64, f64)> {
        let substeps = self.substeps.max(1);
        let h = 1.0 / substeps as f64;
        let mut x = x0.max(0.0);
        let mut y = y0.max(0.0);
        let mut out = Vec::with_capacity(ticks + 1);
        out.push((x, y));
        for _ in 0..ticks {
            for _ in 0..substeps {
                (x, y) = self.rk4_step(x, y, h);
            }
            out.push((x, y));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(a: f64, b: f64) -> f64 {
        ((a - b) / b).abs()
    }

    #[test]
    fn test_round_trip_recovers_parameters() {
        let truth = LotkaVolterraParams::new(0.1, 0.002, 0.08, 0.001);
        let series = LotkaVolterraModel::new(truth).simulate(60.0, 20.0, 200);
        let fit = estimate_parameters(&series);

        assert!(rel(fit.alpha, truth.alpha) < 0.02, "{fit}");
        assert!(rel(fit.beta, truth.beta) < 0.02, "{fit}");
        assert!(rel(fit.gamma, truth.gamma) < 0.02, "{fit}");
        assert!(rel(fit.delta, truth.delta) < 0.02, "{fit}");
    }

    #[test]
    fn test_model_fit_matches_estimate() {
        let truth = LotkaVolterraParams::new(0.1, 0.002, 0.08, 0.001);
        let series = LotkaVolterraModel::new(truth).simulate(60.0, 20.0, 100);
        let model = LotkaVolterraModel::fit(&series);
        assert_eq!(model.params, estimate_parameters(&series));
        assert_eq!(model.substeps, 10);
    }

    #[test]
    fn test_too_few_pairs_is_conservative() {
        let series = vec![(10.0, 5.0), (11.0, 5.0), (12.0, 6.0)];
        assert_eq!(estimate_parameters(&series), LotkaVolterraParams::conservative());
    }

    #[test]
    fn test_pairs_with_zero_are_skipped() {
        let series = vec![
            (10.0, 0.0),
            (12.0, 0.0),
            (14.0, 0.0),
            (16.0, 0.0),
            (18.0, 0.0),
            (20.0, 0.0),
        ];
        assert_eq!(estimate_parameters(&series), LotkaVolterraParams::conservative());
    }

    #[test]
    fn test_singular_system_falls_back() {
        // Constant populations: both regressors are collinear
        let series = vec![(50.0, 10.0); 20];
        let fit = estimate_parameters(&series);
        assert_eq!(fit, LotkaVolterraParams::conservative());
    }

    #[test]
    fn test_minima_are_enforced() {
        // Prey decline and predators grow: raw estimates go negative
        let series: Vec<(f64, f64)> = (0..30)
            .map(|t| (100.0 - t as f64 * 2.0, 10.0 + t as f64 * 0.5 + (t % 3) as f64))
            .collect();
        let fit = estimate_parameters(&series);
        assert!(fit.alpha >= MIN_RATE);
        assert!(fit.beta >= MIN_INTERACTION);
        assert!(fit.gamma >= MIN_RATE);
        assert!(fit.delta >= MIN_INTERACTION);
    }

    #[test]
    fn test_simulate_length_and_start() {
        let model = LotkaVolterraModel::new(LotkaVolterraParams::conservative());
        let out = model.simulate(40.0, 9.0, 25);
        assert_eq!(out.len(), 26);
        assert_eq!(out[0], (40.0, 9.0));
        assert_eq!(model.simulate(1.0, 1.0, 0).len(), 1);
    }

    #[test]
    fn test_rk4_non_negative() {
        // Violent interaction terms push naive integration below zero
        let model = LotkaVolterraModel::new(LotkaVolterraParams::new(0.5, 0.9, 2.0, 0.8))
            .with_substeps(1);
        for &(x0, y0) in &[(0.0, 0.0), (0.0, 50.0), (80.0, 0.0), (500.0, 300.0), (1.0, 900.0)] {
            for (x, y) in model.simulate(x0, y0, 300) {
                assert!(x >= 0.0 && y >= 0.0);
            }
        }
    }

    #[test]
    fn test_equilibrium_is_fixed_point() {
        let p = LotkaVolterraParams::new(0.1, 0.002, 0.08, 0.001);
        let (x, y) = p.equilibrium();
        let model = LotkaVolterraModel::new(p);
        let (dx, dy) = model.derivatives(x, y);
        assert!(dx.abs() < 1e-9 && dy.abs() < 1e-9);
        let out = model.simulate(x, y, 50);
        let (xe, ye) = out[50];
        assert!((xe - x).abs() < 1e-6 && (ye - y).abs() < 1e-6);
    }

    #[test]
    fn test_fit_error() {
        let a = vec![(1.0, 1.0), (2.0, 2.0)];
        let b = vec![(1.0, 1.0), (2.0, 4.0)];
        assert!((fit_error(&a, &b) - 2.0f64.sqrt()).abs() < 1e-12);
        assert_eq!(fit_error(&a, &a), 0.0);
    }
}
