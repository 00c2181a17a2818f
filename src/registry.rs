//! Agent registry: arena of per-agent records plus an id index.
//!
//! During an open tick the arena's shape is frozen. Agent units lock one
//! record at a time to mutate it; births are queued and deaths are only
//! marked. `commit_births` and `reap_dead` change the arena in the
//! single-threaded phase after the tick closes.

use crate::agent::{Agent, AgentId, AgentView, Position, Sex, Species};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

#[derive(Debug, Default)]
struct Arena {
    records: Vec<Mutex<Agent>>,
    index: HashMap<AgentId, usize>,
}

impl Arena {
    fn rebuild_index(&mut self) {
        self.index.clear();
        for (slot, record) in self.records.iter_mut().enumerate() {
            let id = record.get_mut().unwrap_or_else(PoisonError::into_inner).id;
            self.index.insert(id, slot);
        }
    }
}

fn lock(record: &Mutex<Agent>) -> MutexGuard<'_, Agent> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of every agent record
#[derive(Debug)]
pub struct AgentRegistry {
    arena: RwLock<Arena>,
    pending: Mutex<Vec<Agent>>,
    next_id: AtomicU64,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
            pending: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id without creating a record
    pub fn reserve_id(&self) -> AgentId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a new agent; it becomes visible after `commit_births`
    pub fn spawn(
        &self,
        species: Species,
        sex: Sex,
        position: Position,
        energy: i32,
        energy_max: i32,
        born_at: u64,
    ) -> AgentId {
        let id = self.reserve_id();
        self.spawn_reserved(Agent::new(id, species, sex, position, energy, energy_max, born_at));
        id
    }

    /// Queue an agent whose id came from `reserve_id`
    pub fn spawn_reserved(&self, agent: Agent) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(agent);
    }

    /// Move queued births into the arena, returning their ids
    pub fn commit_births(&self) -> Vec<AgentId> {
        let born: Vec<Agent> =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        if born.is_empty() {
            return Vec::new();
        }
        let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
        let mut ids = Vec::with_capacity(born.len());
        for agent in born {
            let slot = arena.records.len();
            arena.index.insert(agent.id, slot);
            ids.push(agent.id);
            arena.records.push(Mutex::new(agent));
        }
        ids
    }

    /// Number of queued births
    pub fn pending_births(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run `f` with exclusive access to one record.
    ///
    /// `f` must not call back into the registry for another agent.
    pub fn with_agent<R>(&self, id: AgentId, f: impl FnOnce(&mut Agent) -> R) -> Option<R> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        let slot = *arena.index.get(&id)?;
        let mut agent = lock(&arena.records[slot]);
        Some(f(&mut agent))
    }

    /// Copy of one record
    pub fn get(&self, id: AgentId) -> Option<Agent> {
        self.with_agent(id, |a| a.clone())
    }

    pub fn is_alive(&self, id: AgentId) -> bool {
        self.with_agent(id, |a| a.alive).unwrap_or(false)
    }

    /// Mark an agent dead. Returns `true` only for the caller that made
    /// the alive to dead transition.
    pub fn kill(&self, id: AgentId) -> bool {
        self.with_agent(id, |a| {
            let was_alive = a.alive;
            a.alive = false;
            was_alive
        })
        .unwrap_or(false)
    }

    /// Purge dead records, returning their ids. A second call with no
    /// intervening kills returns nothing.
    pub fn reap_dead(&self) -> Vec<AgentId> {
        let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
        let mut reaped = Vec::new();
        arena.records.retain_mut(|record| {
            let agent = record.get_mut().unwrap_or_else(PoisonError::into_inner);
            if agent.alive {
                true
            } else {
                reaped.push(agent.id);
                false
            }
        });
        if !reaped.is_empty() {
            arena.rebuild_index();
        }
        reaped
    }

    /// Live views of one species, ordered by id
    pub fn snapshot(&self, species: Species) -> Vec<AgentView> {
        let mut views: Vec<AgentView> = self
            .live_views()
            .into_iter()
            .filter(|v| v.species == species)
            .collect();
        views.sort_by_key(|v| v.id);
        views
    }

    /// Live views of every agent, ordered by id
    pub fn live_views(&self) -> Vec<AgentView> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        let mut views: Vec<AgentView> = arena
            .records
            .iter()
            .map(|r| lock(r).view())
            .filter(|v| v.alive)
            .collect();
        views.sort_by_key(|v| v.id);
        views
    }

    /// Ids of live agents, ordered
    pub fn live_ids(&self) -> Vec<AgentId> {
        self.live_views().into_iter().map(|v| v.id).collect()
    }

    /// `(id, position)` of every live agent
    pub fn live_positions(&self) -> Vec<(AgentId, Position)> {
        self.live_views()
            .into_iter()
            .map(|v| (v.id, v.position))
            .collect()
    }

    /// Copies of every record, dead ones included until reaped
    pub fn agents(&self) -> Vec<Agent> {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        let mut agents: Vec<Agent> = arena.records.iter().map(|r| lock(r).clone()).collect();
        agents.sort_by_key(|a| a.id);
        agents
    }

    pub fn count(&self, species: Species) -> usize {
        let arena = self.arena.read().unwrap_or_else(PoisonError::into_inner);
        arena
            .records
            .iter()
            .filter(|r| {
                let a = lock(r);
                a.alive && a.species == species
            })
            .count()
    }

    /// Records in the arena, dead ones included
    pub fn len(&self) -> usize {
        self.arena
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry_with(n: usize) -> (AgentRegistry, Vec<AgentId>) {
        let registry = AgentRegistry::new();
        let ids = (0..n)
            .map(|i| {
                registry.spawn(
                    Species::Prey,
                    Sex::Female,
                    Position::new(i as i32, 0),
                    50,
                    100,
                    0,
                )
            })
            .collect();
        registry.commit_births();
        (registry, ids)
    }

    #[test]
    fn test_spawn_is_deferred() {
        let registry = AgentRegistry::new();
        let id = registry.spawn(Species::Predator, Sex::Male, Position::new(1, 1), 90, 140, 0);
        assert!(registry.get(id).is_none());
        assert_eq!(registry.pending_births(), 1);
        assert!(registry.snapshot(Species::Predator).is_empty());

        assert_eq!(registry.commit_births(), vec![id]);
        assert_eq!(registry.snapshot(Species::Predator).len(), 1);
        assert_eq!(registry.pending_births(), 0);
    }

    #[test]
    fn test_kill_first_commit_wins() {
        let (registry, ids) = registry_with(1);
        assert!(registry.kill(ids[0]));
        assert!(!registry.kill(ids[0]));
        assert!(!registry.kill(9999));
    }

    #[test]
    fn test_dead_hidden_from_snapshot() {
        let (registry, ids) = registry_with(3);
        registry.kill(ids[1]);
        let live: Vec<AgentId> = registry.snapshot(Species::Prey).iter().map(|v| v.id).collect();
        assert_eq!(live, vec![ids[0], ids[2]]);
        // Record stays until reaped
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_reap_is_idempotent() {
        let (registry, ids) = registry_with(4);
        registry.kill(ids[0]);
        registry.kill(ids[3]);

        let mut reaped = registry.reap_dead();
        reaped.sort();
        assert_eq!(reaped, vec![ids[0], ids[3]]);
        assert!(registry.reap_dead().is_empty());
        assert_eq!(registry.len(), 2);

        // Index is rebuilt after compaction
        assert!(registry.get(ids[2]).is_some());
        assert!(registry.get(ids[0]).is_none());
    }

    #[test]
    fn test_concurrent_kills() {
        let (registry, ids) = registry_with(1);
        let registry = Arc::new(registry);
        let target = ids[0];
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.kill(target))
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&w| w)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(registry.reap_dead(), vec![target]);
    }

    #[test]
    fn test_with_agent_mutates() {
        let (registry, ids) = registry_with(1);
        registry.with_agent(ids[0], |a| a.spend_energy(20));
        assert_eq!(registry.get(ids[0]).unwrap().energy, 30);
    }

    #[test]
    fn test_counts() {
        let (registry, _) = registry_with(3);
        registry.spawn(Species::Predator, Sex::Male, Position::new(5, 5), 90, 140, 0);
        registry.commit_births();
        assert_eq!(registry.count(Species::Prey), 3);
        assert_eq!(registry.count(Species::Predator), 1);
        assert_eq!(registry.live_ids().len(), 4);
    }
}
