//! System load sampling behind a pluggable provider.
//!
//! The selector only needs a coarse at-call-time snapshot. Production uses
//! sysinfo; tests and the simulator pin a fixed snapshot so scoring stays
//! deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use sysinfo::System;

/// Load threshold above which the selector favors low-resource backends.
pub const HIGH_LOAD_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystemLoadSnapshot {
    /// CPU utilization percent [0,100]
    pub cpu_pct: f64,
    /// Memory utilization percent [0,100]
    pub mem_pct: f64,
    /// Network utilization percent [0,100]; 0 when the provider cannot tell
    pub network_pct: f64,
    pub sampled_at: DateTime<Utc>,
}

impl SystemLoadSnapshot {
    pub fn new(cpu_pct: f64, mem_pct: f64, network_pct: f64) -> Self {
        Self {
            cpu_pct,
            mem_pct,
            network_pct,
            sampled_at: Utc::now(),
        }
    }

    pub fn is_high_load(&self) -> bool {
        self.cpu_pct > HIGH_LOAD_THRESHOLD || self.mem_pct > HIGH_LOAD_THRESHOLD
    }
}

pub trait SystemLoadProvider: Send + Sync {
    fn snapshot(&self) -> SystemLoadSnapshot;
}

/// Production provider backed by sysinfo.
pub struct SysinfoLoadProvider {
    system: Mutex<System>,
    cpu_cores: usize,
}

impl SysinfoLoadProvider {
    pub fn new() -> Self {
        let mut system = System::new();
        // First refresh primes the CPU counters; the first snapshot after
        // construction already has a delta to measure against.
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            cpu_cores: num_cpus::get(),
        }
    }

    pub fn cpu_cores(&self) -> usize {
        self.cpu_cores
    }
}

impl Default for SysinfoLoadProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemLoadProvider for SysinfoLoadProvider {
    fn snapshot(&self) -> SystemLoadSnapshot {
        let mut system = self.system.lock().unwrap();
        system.refresh_cpu();
        system.refresh_memory();

        let cpu_pct = system.global_cpu_info().cpu_usage() as f64;
        let total = system.total_memory();
        let mem_pct = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64 * 100.0
        };

        SystemLoadSnapshot::new(cpu_pct.clamp(0.0, 100.0), mem_pct.clamp(0.0, 100.0), 0.0)
    }
}

/// Fixed provider for tests and simulation scenarios.
pub struct FixedLoadProvider {
    snapshot: SystemLoadSnapshot,
}

impl FixedLoadProvider {
    pub fn new(cpu_pct: f64, mem_pct: f64) -> Self {
        Self {
            snapshot: SystemLoadSnapshot::new(cpu_pct, mem_pct, 0.0),
        }
    }

    pub fn idle() -> Self {
        Self::new(10.0, 20.0)
    }

    pub fn saturated() -> Self {
        Self::new(95.0, 90.0)
    }
}

impl SystemLoadProvider for FixedLoadProvider {
    fn snapshot(&self) -> SystemLoadSnapshot {
        SystemLoadSnapshot {
            sampled_at: Utc::now(),
            ..self.snapshot
        }
    }
}
