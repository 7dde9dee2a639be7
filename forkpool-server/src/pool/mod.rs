//! Worker pool supervision: port assignment, process launching and the
//! restart loop.

pub mod launcher;
pub mod restart;
pub mod supervisor;
pub mod table;

pub use launcher::{
    ProcessLauncher, WorkerExit, WorkerHandle, WorkerLauncher, WorkerSpec,
};
pub use restart::{CircuitState, RestartDecision, RestartPolicy, RestartTracker};
pub use supervisor::{Supervisor, SupervisorError, SupervisorHandle};
pub use table::{PoolSnapshot, PortTable, SlotSnapshot, WorkerSlot};
