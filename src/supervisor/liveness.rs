//! OS-level liveness probing
//!
//! The supervisor decides "dead" from process existence and "stuck" from
//! CPU utilization, both of which come from the OS process table, not from
//! an application heartbeat protocol. The probe sits behind a trait so the
//! liveness loop is testable with scripted responses.

use dashmap::DashMap;
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of process existence and CPU utilization signals
pub trait LivenessProbe: Send + Sync {
    /// Whether a process with this pid exists
    fn exists(&self, pid: u32) -> bool;

    /// Recent CPU utilization of the process, in percent.
    ///
    /// Returns 0.0 for a process that cannot be sampled; combined with the
    /// idle-time gate this errs toward declaring a hang, which recovery can
    /// fix, rather than missing one, which nothing fixes.
    fn cpu_percent(&self, pid: u32) -> f32;
}

/// Production probe backed by the `sysinfo` process table
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessProbe for SysinfoProbe {
    fn exists(&self, pid: u32) -> bool {
        let mut system = self.system.lock();
        let target = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system.process(target).is_some()
    }

    fn cpu_percent(&self, pid: u32) -> f32 {
        let mut system = self.system.lock();
        let target = Pid::from_u32(pid);
        // CPU utilization is a delta between two samples; a single refresh
        // reads 0.0 and would falsely confirm a hang.
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::nothing().with_cpu(),
        );
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::nothing().with_cpu(),
        );
        system.process(target).map_or(0.0, |p| p.cpu_usage())
    }
}

/// Scripted probe for tests
#[derive(Default)]
pub struct ScriptedProbe {
    exists: DashMap<u32, bool>,
    cpu: DashMap<u32, f32>,
}

impl ScriptedProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_exists(&self, pid: u32, exists: bool) {
        self.exists.insert(pid, exists);
    }

    pub fn set_cpu(&self, pid: u32, percent: f32) {
        self.cpu.insert(pid, percent);
    }
}

impl LivenessProbe for ScriptedProbe {
    fn exists(&self, pid: u32) -> bool {
        self.exists.get(&pid).map(|v| *v).unwrap_or(false)
    }

    fn cpu_percent(&self, pid: u32) -> f32 {
        self.cpu.get(&pid).map(|v| *v).unwrap_or(0.0)
    }
}
