use crate::error::{Result, WardenError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of a process's current memory footprint, in bytes
pub trait MemorySampler: Send + Sync + 'static {
    /// Sample the memory usage of `pid`
    fn sample(&self, pid: u32) -> Result<u64>;
}

/// Proportional set size read from `/proc/<pid>/smaps`
///
/// Shared pages are counted as a fractional share against every process that
/// maps them. Only Linux exposes this file; elsewhere every sample fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmapsSampler;

impl MemorySampler for SmapsSampler {
    fn sample(&self, pid: u32) -> Result<u64> {
        let path = format!("/proc/{}/smaps", pid);
        let file = File::open(&path).map_err(|e| WardenError::Sampling(pid, e.to_string()))?;
        parse_pss(BufReader::new(file)).map_err(|e| match e {
            WardenError::Io(io) => WardenError::Sampling(pid, io.to_string()),
            other => other,
        })
    }
}

/// Sum every `Pss:` line of an smaps listing and convert kilobytes to bytes
pub fn parse_pss<R: BufRead>(reader: R) -> Result<u64> {
    const PREFIX: &str = "Pss:";

    let mut total_kb: u64 = 0;
    for line in reader.lines() {
        let line = line?;
        if let Some(rest) = line.strip_prefix(PREFIX) {
            let value = rest.split_whitespace().next().unwrap_or("");
            let kb: u64 = value.parse().map_err(|_| {
                WardenError::Sampling(0, format!("malformed Pss line: {:?}", line))
            })?;
            total_kb = total_kb.saturating_add(kb);
        }
    }

    Ok(total_kb.saturating_mul(1024))
}

/// Resident set size from `sysinfo`, for platforms without PSS accounting
pub struct ResidentSampler {
    system: Mutex<System>,
}

impl ResidentSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ResidentSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ResidentSampler {
    fn sample(&self, pid: u32) -> Result<u64> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = self
            .system
            .lock()
            .map_err(|_| WardenError::Sampling(pid, "sampler lock poisoned".to_string()))?;

        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        system
            .process(sys_pid)
            .map(|process| process.memory())
            .ok_or_else(|| WardenError::Sampling(pid, "no such process".to_string()))
    }
}

/// The best sampler available on this platform
pub fn default_sampler() -> Arc<dyn MemorySampler> {
    if cfg!(target_os = "linux") {
        Arc::new(SmapsSampler)
    } else {
        Arc::new(ResidentSampler::new())
    }
}
