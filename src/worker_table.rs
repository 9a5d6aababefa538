//! The worker process table: the master's sole authority on which pids are its children.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Hard ceiling on configured worker processes, matching the config layer's validation.
pub const MAX_WORKERS: usize = 32;

/// Identity of one managed child slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSlot {
    pid: Option<Pid>,
    /// CPU index assigned at init: `slot_index mod cpu_count`. Immutable for the slot's lifetime
    /// — a respawned worker inherits the slot's affinity rather than having it re-derived from
    /// the new pid.
    cpu_affinity: usize,
}

impl WorkerSlot {
    fn vacant(cpu_affinity: usize) -> Self {
        WorkerSlot {
            pid: None,
            cpu_affinity,
        }
    }

    /// The pid currently occupying this slot, if any.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// The CPU this slot's occupant (current or future) is pinned to.
    pub fn cpu_affinity(&self) -> usize {
        self.cpu_affinity
    }
}

/// Fixed-capacity ordered sequence of [`WorkerSlot`], sized to the configured worker count.
/// Created once at master init and never resized.
#[derive(Debug, Clone)]
pub struct WorkerTable {
    slots: Vec<WorkerSlot>,
}

impl WorkerTable {
    /// Build a table with one vacant slot per worker, CPU-pinned round-robin over `cpu_count`
    /// cores (minimum of 1, so a single-core host still yields a valid assignment).
    pub fn new(worker_count: usize, cpu_count: usize) -> Self {
        let cpu_count = cpu_count.max(1);
        let slots = (0..worker_count)
            .map(|i| WorkerSlot::vacant(i % cpu_count))
            .collect();
        WorkerTable { slots }
    }

    /// Number of configured slots (not necessarily occupied).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Read-only view of a slot.
    pub fn slot(&self, index: usize) -> &WorkerSlot {
        &self.slots[index]
    }

    /// First slot with no occupant, if any.
    pub fn find_vacant(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.pid.is_none())
    }

    /// Record that `pid` now occupies `slot`. Overwrites whatever was there (the caller is
    /// expected to have gone through [`Self::find_vacant`] first).
    pub fn record_child(&mut self, slot: usize, pid: Pid) {
        self.slots[slot].pid = Some(pid);
    }

    /// Null out every slot occupied by `pid`. Idempotent: calling it again for a pid no longer
    /// present is a no-op, not an error.
    pub fn clear_by_pid(&mut self, pid: Pid) {
        for slot in &mut self.slots {
            if slot.pid == Some(pid) {
                slot.pid = None;
            }
        }
    }

    /// True iff every slot's pid is absent.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.pid.is_none())
    }

    /// Number of slots with a present pid.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.pid.is_some()).count()
    }

    /// Send `signal` to every present pid. A failure to signal one child is logged and does not
    /// stop the broadcast from reaching the rest. Broadcasting to an empty table is a no-op.
    pub fn broadcast(&self, sig: Signal) {
        for slot in &self.slots {
            if let Some(pid) = slot.pid {
                if let Err(e) = signal::kill(pid, sig) {
                    log::warn!("failed to send {sig:?} to worker pid {pid}: {e}");
                }
            }
        }
    }
}
