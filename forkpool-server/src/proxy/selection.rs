use forkpool_config::SelectionPolicy;
use rand::Rng;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::pool::PortTable;

/// Picks the worker slot that receives the next request.
pub trait SelectionStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Index of the chosen slot, or `None` when no slot is eligible.
    fn select(&self, table: &PortTable) -> Option<usize>;
}

/// Uniform choice over every slot, alive or not.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelection;

impl SelectionStrategy for RandomSelection {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, table: &PortTable) -> Option<usize> {
        if table.is_empty() {
            return None;
        }
        Some(rand::rng().random_range(0..table.len()))
    }
}

/// Cycles through every slot in index order.
#[derive(Debug, Default)]
pub struct RoundRobinSelection {
    next: AtomicUsize,
}

impl SelectionStrategy for RoundRobinSelection {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, table: &PortTable) -> Option<usize> {
        if table.is_empty() {
            return None;
        }
        Some(self.next.fetch_add(1, Ordering::Relaxed) % table.len())
    }
}

/// Uniform choice over the slots currently marked alive.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthAwareSelection;

impl SelectionStrategy for HealthAwareSelection {
    fn name(&self) -> &'static str {
        "health_aware"
    }

    fn select(&self, table: &PortTable) -> Option<usize> {
        let alive = table.alive_indices();
        if alive.is_empty() {
            return None;
        }
        Some(alive[rand::rng().random_range(0..alive.len())])
    }
}

pub fn strategy_for(policy: SelectionPolicy) -> Arc<dyn SelectionStrategy> {
    match policy {
        SelectionPolicy::Random => Arc::new(RandomSelection),
        SelectionPolicy::RoundRobin => Arc::new(RoundRobinSelection::default()),
        SelectionPolicy::HealthAware => Arc::new(HealthAwareSelection),
    }
}
