//! Spatial grid with atomic per-cell state.
//!
//! Agents running concurrently inside one tick only ever touch single cells
//! through check-and-set operations: claiming a cell for occupancy and
//! consuming a resource. Regrowth runs in the single-threaded commit phase.

use crate::agent::{AgentId, Position};
use crate::config::WorldConfig;
use crate::error::{Result, SimError};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Empty-cell marker stored in the occupant slot
const VACANT: u64 = 0;

#[inline]
fn encode(id: AgentId) -> u64 {
    id.wrapping_add(1)
}

#[inline]
fn decode(raw: u64) -> Option<AgentId> {
    (raw != VACANT).then(|| raw - 1)
}

/// Reasons a cell claim is refused; recovered locally by the claimant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoveError {
    /// Another agent holds the cell
    #[error("position occupied")]
    PositionOccupied,
    /// Out of bounds or an obstacle
    #[error("position blocked")]
    PositionBlocked,
}

/// One grid cell
#[derive(Debug)]
pub struct Cell {
    walkable: bool,
    resource: AtomicBool,
    /// Ticks until the resource reappears (0 = not regrowing)
    regrowth_timer: AtomicU32,
    occupant: AtomicU64,
}

impl Cell {
    fn new(walkable: bool) -> Self {
        Self {
            walkable,
            resource: AtomicBool::new(false),
            regrowth_timer: AtomicU32::new(0),
            occupant: AtomicU64::new(VACANT),
        }
    }

    pub fn is_walkable(&self) -> bool {
        self.walkable
    }

    pub fn has_resource(&self) -> bool {
        self.resource.load(Ordering::Acquire)
    }

    pub fn regrowth_timer(&self) -> u32 {
        self.regrowth_timer.load(Ordering::Acquire)
    }

    pub fn occupant(&self) -> Option<AgentId> {
        decode(self.occupant.load(Ordering::Acquire))
    }
}

/// Owned copy of a cell for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub walkable: bool,
    pub resource: bool,
    pub regrowth_timer: u32,
    pub occupant: Option<AgentId>,
}

/// The shared environment
#[derive(Debug)]
pub struct SpatialGrid {
    width: usize,
    height: usize,
    /// Row-major cells
    cells: Vec<Cell>,
    walkable_count: usize,
    /// Agent id to the cell it holds
    index: RwLock<HashMap<AgentId, Position>>,
}

impl SpatialGrid {
    /// Create an open grid with every cell walkable and bare
    pub fn new(width: usize, height: usize) -> Self {
        let cells = (0..width * height).map(|_| Cell::new(true)).collect();
        Self {
            width,
            height,
            cells,
            walkable_count: width * height,
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Build a grid with obstacles and initial resources laid out from config
    pub fn generate<R: Rng + ?Sized>(config: &WorldConfig, rng: &mut R) -> Self {
        let width = config.width;
        let height = config.height;
        let total = width * height;

        let mut order: Vec<usize> = (0..total).collect();
        order.shuffle(rng);
        let obstacles = ((total as f64) * config.obstacle_coverage).round() as usize;
        let obstacles = obstacles.min(total.saturating_sub(1));

        let mut walkable = vec![true; total];
        for &idx in order.iter().take(obstacles) {
            walkable[idx] = false;
        }

        let cells: Vec<Cell> = walkable.iter().map(|&w| Cell::new(w)).collect();
        let walkable_count = walkable.iter().filter(|&&w| w).count();

        let regrowth = config.resource_regrowth_time.max(1);
        for cell in cells.iter().filter(|c| c.walkable) {
            if rng.gen::<f64>() < config.initial_resource_coverage {
                cell.resource.store(true, Ordering::Release);
            } else if config.regrow_bare_cells {
                // Staggered so bare cells do not all regrow on the same tick
                let timer = rng.gen_range(1..=regrowth);
                cell.regrowth_timer.store(timer, Ordering::Release);
            }
        }

        Self {
            width,
            height,
            cells,
            walkable_count,
            index: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn in_bounds(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as usize) < self.width && (pos.y as usize) < self.height
    }

    #[inline]
    fn offset(&self, pos: Position) -> Option<usize> {
        self.in_bounds(pos)
            .then(|| pos.y as usize * self.width + pos.x as usize)
    }

    /// Row-major offset to position
    #[inline]
    pub fn position_of(&self, offset: usize) -> Position {
        Position::new((offset % self.width) as i32, (offset / self.width) as i32)
    }

    pub fn cell(&self, pos: Position) -> Option<&Cell> {
        self.offset(pos).map(|i| &self.cells[i])
    }

    /// Cells in row-major order
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn is_walkable(&self, pos: Position) -> bool {
        self.cell(pos).is_some_and(|c| c.walkable)
    }

    pub fn has_resource(&self, pos: Position) -> bool {
        self.cell(pos).is_some_and(|c| c.has_resource())
    }

    /// Make an obstacle, used when building fixed layouts
    pub fn set_obstacle(&mut self, pos: Position) {
        if let Some(i) = self.offset(pos) {
            if self.cells[i].walkable {
                self.cells[i] = Cell::new(false);
                self.walkable_count -= 1;
            }
        }
    }

    /// Place a resource on a walkable cell and cancel its regrowth
    pub fn place_resource(&self, pos: Position) -> bool {
        match self.cell(pos) {
            Some(cell) if cell.walkable => {
                cell.regrowth_timer.store(0, Ordering::Release);
                cell.resource.store(true, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// Clear the resource if present and start its regrowth timer.
    ///
    /// Exactly one of several concurrent callers on the same cell wins.
    pub fn consume_resource(&self, pos: Position, regrowth_ticks: u32) -> bool {
        let Some(cell) = self.cell(pos) else {
            return false;
        };
        if cell
            .resource
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        cell.regrowth_timer
            .store(regrowth_ticks.max(1), Ordering::Release);
        true
    }

    /// Decrement every regrowth timer and restore resources that reach zero.
    ///
    /// Called once per tick after the agent phase has closed.
    pub fn advance_regrowth(&self) -> usize {
        let mut restored = 0;
        for cell in &self.cells {
            let timer = cell.regrowth_timer.load(Ordering::Acquire);
            if timer == 0 {
                continue;
            }
            let next = timer - 1;
            if next == 0 {
                cell.resource.store(true, Ordering::Release);
                restored += 1;
            }
            cell.regrowth_timer.store(next, Ordering::Release);
        }
        restored
    }

    pub fn occupant_at(&self, pos: Position) -> Option<AgentId> {
        self.cell(pos).and_then(|c| c.occupant())
    }

    /// Position held by an agent according to the index
    pub fn position_of_agent(&self, agent: AgentId) -> Option<Position> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&agent)
            .copied()
    }

    /// Claim `pos` for `agent`, releasing the cell it held before.
    ///
    /// Claiming a cell the agent already holds is a no-op.
    pub fn set_occupant(&self, agent: AgentId, pos: Position) -> std::result::Result<(), MoveError> {
        let cell = match self.cell(pos) {
            Some(cell) if cell.walkable => cell,
            _ => return Err(MoveError::PositionBlocked),
        };
        let me = encode(agent);
        match cell
            .occupant
            .compare_exchange(VACANT, me, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(current) if current == me => return Ok(()),
            Err(_) => return Err(MoveError::PositionOccupied),
        }

        let previous = self
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent, pos);
        if let Some(old) = previous.filter(|old| *old != pos) {
            self.release(agent, old);
        }
        Ok(())
    }

    /// Release whatever cell the agent holds
    pub fn clear_occupant(&self, agent: AgentId) -> Option<Position> {
        let old = self
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&agent)?;
        self.release(agent, old);
        Some(old)
    }

    fn release(&self, agent: AgentId, pos: Position) {
        if let Some(cell) = self.cell(pos) {
            let _ = cell.occupant.compare_exchange(
                encode(agent),
                VACANT,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// In-bounds walkable neighbors that are currently vacant
    pub fn free_neighbors(&self, pos: Position) -> Vec<Position> {
        pos.neighbors()
            .into_iter()
            .filter(|&n| {
                self.cell(n)
                    .is_some_and(|c| c.walkable && c.occupant().is_none())
            })
            .collect()
    }

    /// Walkable cells with no occupant, row-major
    pub fn free_cells(&self) -> Vec<Position> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.walkable && c.occupant().is_none())
            .map(|(i, _)| self.position_of(i))
            .collect()
    }

    pub fn walkable_count(&self) -> usize {
        self.walkable_count
    }

    pub fn resource_count(&self) -> usize {
        self.cells.iter().filter(|c| c.has_resource()).count()
    }

    /// Resource cells over walkable cells
    pub fn resource_coverage(&self) -> f64 {
        if self.walkable_count == 0 {
            return 0.0;
        }
        self.resource_count() as f64 / self.walkable_count as f64
    }

    /// Number of cells holding an occupant
    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|c| c.occupant().is_some()).count()
    }

    /// Check that cell occupancy, the index and the live agents agree
    pub fn verify_occupancy(&self, live: &[(AgentId, Position)]) -> Result<()> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);

        for &(agent, pos) in live {
            match index.get(&agent) {
                Some(indexed) if *indexed == pos => {}
                Some(indexed) => {
                    return Err(SimError::OccupancyMismatch {
                        agent,
                        detail: format!("record at {pos}, index at {indexed}"),
                    })
                }
                None => {
                    return Err(SimError::OccupancyMismatch {
                        agent,
                        detail: format!("record at {pos} missing from index"),
                    })
                }
            }
            if self.occupant_at(pos) != Some(agent) {
                return Err(SimError::OccupancyMismatch {
                    agent,
                    detail: format!("cell {pos} held by {:?}", self.occupant_at(pos)),
                });
            }
        }

        if index.len() != live.len() || self.occupied_count() != live.len() {
            let live_ids: std::collections::HashSet<AgentId> =
                live.iter().map(|(id, _)| *id).collect();
            let stray = index
                .keys()
                .copied()
                .find(|id| !live_ids.contains(id))
                .unwrap_or_default();
            return Err(SimError::OccupancyMismatch {
                agent: stray,
                detail: format!(
                    "{} live agents, {} indexed, {} occupied cells",
                    live.len(),
                    index.len(),
                    self.occupied_count()
                ),
            });
        }
        Ok(())
    }

    /// Owned copy of every cell, row-major
    pub fn snapshot(&self) -> Vec<CellSnapshot> {
        self.cells
            .iter()
            .map(|c| CellSnapshot {
                walkable: c.walkable,
                resource: c.has_resource(),
                regrowth_timer: c.regrowth_timer(),
                occupant: c.occupant(),
            })
            .collect()
    }
}
