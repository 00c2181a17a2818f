//! Statistics tracking for the simulation.

use crate::agent::Species;
use crate::error::Result;
use crate::grid::SpatialGrid;
use crate::registry::AgentRegistry;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Aggregate state at the close of one tick
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub tick: u64,
    pub prey_count: usize,
    pub predator_count: usize,
    pub avg_prey_energy: f64,
    pub avg_predator_energy: f64,
    /// Resource cells over walkable cells (0.0 - 1.0)
    pub resource_coverage: f64,
    /// Births committed this tick
    pub births: usize,
    /// Agents reaped this tick
    pub deaths: usize,
}

impl Statistics {
    /// Collect from the registry and grid after reaping
    pub fn collect(tick: u64, registry: &AgentRegistry, grid: &SpatialGrid) -> Self {
        let mut counts = [0usize; 2];
        let mut energy = [0i64; 2];
        for view in registry.live_views() {
            let slot = match view.species {
                Species::Prey => 0,
                Species::Predator => 1,
            };
            counts[slot] += 1;
            energy[slot] += view.energy as i64;
        }
        let mean = |slot: usize| {
            if counts[slot] == 0 {
                0.0
            } else {
                energy[slot] as f64 / counts[slot] as f64
            }
        };

        Self {
            tick,
            prey_count: counts[0],
            predator_count: counts[1],
            avg_prey_energy: mean(0),
            avg_predator_energy: mean(1),
            resource_coverage: grid.resource_coverage(),
            births: 0,
            deaths: 0,
        }
    }

    pub fn count(&self, species: Species) -> usize {
        match species {
            Species::Prey => self.prey_count,
            Species::Predator => self.predator_count,
        }
    }

    /// Format stats as a one-line summary
    pub fn summary(&self) -> String {
        format!(
            "T:{:6} | Prey:{:5} ({:5.1}) | Pred:{:5} ({:5.1}) | Cover:{:.3} | +{} -{}",
            self.tick,
            self.prey_count,
            self.avg_prey_energy,
            self.predator_count,
            self.avg_predator_energy,
            self.resource_coverage,
            self.births,
            self.deaths,
        )
    }

    pub const CSV_HEADER: &'static str =
        "Tick,PreyCount,PredatorCount,AvgPreyEnergy,AvgPredatorEnergy,ResourceCoverage";

    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{:.2},{:.2},{:.4}",
            self.tick,
            self.prey_count,
            self.predator_count,
            self.avg_prey_energy,
            self.avg_predator_energy,
            self.resource_coverage,
        )
    }
}

/// Historical statistics tracker
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsHistory {
    /// Recorded snapshots, in tick order
    pub snapshots: Vec<Statistics>,
}

impl StatsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stats: Statistics) {
        self.snapshots.push(stats);
    }

    pub fn latest(&self) -> Option<&Statistics> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Stats at a specific tick
    pub fn get_at(&self, tick: u64) -> Option<&Statistics> {
        self.snapshots
            .binary_search_by_key(&tick, |s| s.tick)
            .ok()
            .map(|i| &self.snapshots[i])
    }

    /// `(prey, predators)` per tick, as estimator input
    pub fn population_series(&self) -> Vec<(f64, f64)> {
        self.snapshots
            .iter()
            .map(|s| (s.prey_count as f64, s.predator_count as f64))
            .collect()
    }

    /// Population series of the most recent `window` ticks (0 = all)
    pub fn recent_series(&self, window: usize) -> Vec<(f64, f64)> {
        let start = if window == 0 {
            0
        } else {
            self.snapshots.len().saturating_sub(window)
        };
        self.snapshots[start..]
            .iter()
            .map(|s| (s.prey_count as f64, s.predator_count as f64))
            .collect()
    }

    /// Largest populations seen
    pub fn peaks(&self) -> (usize, usize) {
        self.snapshots.iter().fold((0, 0), |(p, q), s| {
            (p.max(s.prey_count), q.max(s.predator_count))
        })
    }

    /// Save history to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load history from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Receives every tick's statistics in append order
pub trait StatsSink: Send {
    fn record(&mut self, stats: &Statistics) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes statistics as CSV rows
pub struct CsvStatsSink<W: Write + Send> {
    writer: W,
    header_written: bool,
}

impl<W: Write + Send> CsvStatsSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl CsvStatsSink<std::io::BufWriter<std::fs::File>> {
    /// Create (or truncate) a CSV file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(std::io::BufWriter::new(file)))
    }
}

impl<W: Write + Send> StatsSink for CsvStatsSink<W> {
    fn record(&mut self, stats: &Statistics) -> Result<()> {
        if !self.header_written {
            writeln!(self.writer, "{}", Statistics::CSV_HEADER)?;
            self.header_written = true;
        }
        writeln!(self.writer, "{}", stats.to_csv())?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Position, Sex};

    fn stats(tick: u64, prey: usize, predators: usize) -> Statistics {
        Statistics {
            tick,
            prey_count: prey,
            predator_count: predators,
            ..Statistics::default()
        }
    }

    #[test]
    fn test_collect() {
        let registry = AgentRegistry::new();
        let grid = SpatialGrid::new(4, 4);
        grid.place_resource(Position::new(0, 0));
        grid.place_resource(Position::new(1, 0));
        registry.spawn(Species::Prey, Sex::Male, Position::new(0, 0), 40, 100, 0);
        registry.spawn(Species::Prey, Sex::Female, Position::new(1, 0), 60, 100, 0);
        let dead = registry.spawn(Species::Predator, Sex::Male, Position::new(2, 0), 90, 140, 0);
        registry.spawn(Species::Predator, Sex::Male, Position::new(3, 0), 70, 140, 0);
        registry.commit_births();
        registry.kill(dead);

        let s = Statistics::collect(5, &registry, &grid);
        assert_eq!(s.tick, 5);
        assert_eq!(s.prey_count, 2);
        assert_eq!(s.predator_count, 1);
        assert!((s.avg_prey_energy - 50.0).abs() < 1e-12);
        assert!((s.avg_predator_energy - 70.0).abs() < 1e-12);
        assert!((s.resource_coverage - 0.125).abs() < 1e-12);
    }

    #[test]
    fn test_empty_population_energy_is_zero() {
        let s = Statistics::collect(1, &AgentRegistry::new(), &SpatialGrid::new(2, 2));
        assert_eq!(s.avg_prey_energy, 0.0);
        assert_eq!(s.avg_predator_energy, 0.0);
    }

    #[test]
    fn test_csv_format() {
        let s = Statistics {
            tick: 12,
            prey_count: 80,
            predator_count: 20,
            avg_prey_energy: 51.256,
            avg_predator_energy: 99.0,
            resource_coverage: 0.43219,
            births: 3,
            deaths: 1,
        };
        assert_eq!(s.to_csv(), "12,80,20,51.26,99.00,0.4322");
    }

    #[test]
    fn test_csv_sink_writes_header_once() {
        let mut sink = CsvStatsSink::new(Vec::new());
        sink.record(&stats(1, 10, 2)).unwrap();
        sink.record(&stats(2, 11, 2)).unwrap();
        sink.flush().unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], Statistics::CSV_HEADER);
        assert!(lines[2].starts_with("2,11,2,"));
    }

    #[test]
    fn test_stats_history() {
        let mut history = StatsHistory::new();
        for i in 1..=5 {
            history.record(stats(i, (i * 100) as usize, i as usize));
        }

        let series = history.population_series();
        assert_eq!(series.len(), 5);
        assert_eq!(series[0], (100.0, 1.0));
        assert_eq!(history.recent_series(2), vec![(400.0, 4.0), (500.0, 5.0)]);
        assert_eq!(history.recent_series(0).len(), 5);
        assert_eq!(history.get_at(3).map(|s| s.prey_count), Some(300));
        assert_eq!(history.peaks(), (500, 5));
    }

    #[test]
    fn test_history_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut history = StatsHistory::new();
        history.record(stats(1, 30, 7));
        history.save(&path).unwrap();

        let loaded = StatsHistory::load(&path).unwrap();
        assert_eq!(loaded.snapshots, history.snapshots);
    }
}
