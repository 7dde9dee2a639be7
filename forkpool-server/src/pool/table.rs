use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

use super::restart::CircuitState;

/// Bookkeeping for one pool index. The port never changes; the rest is
/// written by the supervisor task that owns the slot.
#[derive(Debug)]
pub struct WorkerSlot {
    index: usize,
    port: u16,
    alive: AtomicBool,
    status: Mutex<SlotStatus>,
}

#[derive(Debug, Clone, Default)]
struct SlotStatus {
    pid: Option<u32>,
    spawns: u64,
    consecutive_failures: u32,
    circuit: CircuitState,
}

impl WorkerSlot {
    fn new(index: usize, port: u16) -> Self {
        Self {
            index,
            port,
            alive: AtomicBool::new(false),
            status: Mutex::new(SlotStatus::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn pid(&self) -> Option<u32> {
        self.status.lock().pid
    }

    pub fn spawns(&self) -> u64 {
        self.status.lock().spawns
    }

    fn snapshot(&self) -> SlotSnapshot {
        let status = self.status.lock().clone();
        SlotSnapshot {
            index: self.index,
            port: self.port,
            alive: self.is_alive(),
            pid: status.pid,
            spawns: status.spawns,
            consecutive_failures: status.consecutive_failures,
            circuit: status.circuit,
        }
    }
}

/// Port assignment table shared between the supervisor and the router.
#[derive(Debug)]
pub struct PortTable {
    slots: Box<[WorkerSlot]>,
}

impl PortTable {
    /// Slot `i` gets `base_port + 1 + i`. `None` if a port would overflow.
    pub fn new(base_port: u16, workers: usize) -> Option<Self> {
        let ports = (0..workers)
            .map(|index| u16::try_from(base_port as usize + 1 + index).ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self::from_ports(ports))
    }

    /// Table over arbitrary ports; slot indexes follow iteration order.
    pub fn from_ports(ports: impl IntoIterator<Item = u16>) -> Self {
        let slots = ports
            .into_iter()
            .enumerate()
            .map(|(index, port)| WorkerSlot::new(index, port))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&WorkerSlot> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    pub fn port(&self, index: usize) -> Option<u16> {
        self.slot(index).map(WorkerSlot::port)
    }

    pub fn ports(&self) -> Vec<u16> {
        self.slots.iter().map(WorkerSlot::port).collect()
    }

    pub fn is_alive(&self, index: usize) -> bool {
        self.slot(index).is_some_and(WorkerSlot::is_alive)
    }

    pub fn alive_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|slot| slot.is_alive())
            .map(WorkerSlot::index)
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_alive()).count()
    }

    /// Flips the alive flag directly. The supervisor is the only writer in
    /// production.
    pub fn set_alive(&self, index: usize, alive: bool) {
        if let Some(slot) = self.slot(index) {
            slot.alive.store(alive, Ordering::Release);
        }
    }

    pub(crate) fn mark_spawned(&self, index: usize, pid: Option<u32>) {
        if let Some(slot) = self.slot(index) {
            {
                let mut status = slot.status.lock();
                status.pid = pid;
                status.spawns += 1;
            }
            slot.alive.store(true, Ordering::Release);
        }
    }

    pub(crate) fn mark_exited(&self, index: usize) {
        if let Some(slot) = self.slot(index) {
            slot.alive.store(false, Ordering::Release);
            slot.status.lock().pid = None;
        }
    }

    pub(crate) fn record_restart_state(
        &self,
        index: usize,
        consecutive_failures: u32,
        circuit: CircuitState,
    ) {
        if let Some(slot) = self.slot(index) {
            let mut status = slot.status.lock();
            status.consecutive_failures = consecutive_failures;
            status.circuit = circuit;
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let workers: Vec<SlotSnapshot> =
            self.slots.iter().map(WorkerSlot::snapshot).collect();
        PoolSnapshot {
            size: workers.len(),
            alive: workers.iter().filter(|w| w.alive).count(),
            workers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub index: usize,
    pub port: u16,
    pub alive: bool,
    pub pid: Option<u32>,
    pub spawns: u64,
    pub consecutive_failures: u32,
    pub circuit: CircuitState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub size: usize,
    pub alive: usize,
    pub workers: Vec<SlotSnapshot>,
}
