use crate::error::{Result, WardenError};
use crate::memory::format_bytes;
use crate::memory::sampler::{default_sampler, MemorySampler};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Default time between samples
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default time between usage lines in the debug log
pub const DEFAULT_STATS_FREQUENCY: Duration = Duration::from_secs(60);

/// Watches the memory footprint of one live process and kills it when a
/// ceiling is exceeded
///
/// A guard is single-use: once it has breached or been cancelled, its sampling
/// loop is gone for good and a new guard must be attached.
pub struct MemoryGuard {
    pid: u32,
    name: String,
    interval: Duration,
    stats_frequency: Duration,
    no_kill: bool,
    sampler: Arc<dyn MemorySampler>,
    last_pss: Arc<AtomicU64>,
    started: AtomicBool,
    breach: CancellationToken,
    cancelled: CancellationToken,
}

impl MemoryGuard {
    /// Attach a guard to `pid` using the platform's default sampler
    pub fn attach(pid: u32) -> Self {
        Self::with_sampler(pid, default_sampler())
    }

    /// Attach a guard to `pid` using a specific sampler
    pub fn with_sampler(pid: u32, sampler: Arc<dyn MemorySampler>) -> Self {
        Self {
            pid,
            name: pid.to_string(),
            interval: DEFAULT_INTERVAL,
            stats_frequency: DEFAULT_STATS_FREQUENCY,
            no_kill: false,
            sampler,
            last_pss: Arc::new(AtomicU64::new(0)),
            started: AtomicBool::new(false),
            breach: CancellationToken::new(),
            cancelled: CancellationToken::new(),
        }
    }

    /// Observe only: report a breach but leave the process alive
    pub fn set_no_kill(&mut self) {
        self.no_kill = true;
    }

    /// How often usage is written to the debug log
    pub fn stats_frequency(&mut self, frequency: Duration) {
        self.stats_frequency = frequency;
    }

    /// Time between samples
    pub fn interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Label used in log lines instead of the pid
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Last sampled usage in bytes, or a fresh sample if none has been taken.
    /// Returns 0 if the process cannot be sampled.
    pub fn pss(&self) -> u64 {
        let last = self.last_pss.load(Ordering::Acquire);
        if last > 0 {
            return last;
        }
        self.sampler.sample(self.pid).unwrap_or(0)
    }

    /// Resolves once the ceiling has been exceeded
    pub async fn breached(&self) {
        self.breach.cancelled().await
    }

    pub fn is_breached(&self) -> bool {
        self.breach.is_cancelled()
    }

    /// Stop the sampling loop. Never blocks; safe to call any number of times.
    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// Start enforcing `max` bytes. Must be called from within a tokio runtime.
    /// Only the first call starts a loop.
    pub fn limit(&self, max: u64) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!(guard = %self.name, "memory guard already limiting, ignoring new limit");
            return;
        }

        let pid = self.pid;
        let name = self.name.clone();
        let interval = self.interval;
        let stats_frequency = self.stats_frequency;
        let no_kill = self.no_kill;
        let sampler = Arc::clone(&self.sampler);
        let last_pss = Arc::clone(&self.last_pss);
        let breach = self.breach.clone();
        let cancelled = self.cancelled.clone();

        tokio::spawn(async move {
            let mut since = Instant::now();

            loop {
                if cancelled.is_cancelled() {
                    debug!(guard = %name, "memory guard cancelled");
                    return;
                }

                // smaps reads and sysinfo refreshes block
                let sample = {
                    let sampler = Arc::clone(&sampler);
                    tokio::task::spawn_blocking(move || sampler.sample(pid))
                        .await
                        .map_err(|e| WardenError::Sampling(pid, e.to_string()))
                        .and_then(|sample| sample)
                };

                match sample {
                    Err(e) => {
                        // Transient: the next tick samples again
                        warn!(guard = %name, "memory guard sampling error: {}", e);
                    }
                    Ok(pss) => {
                        last_pss.store(pss, Ordering::Release);

                        if pss > max {
                            error!(
                                guard = %name,
                                "memory guard ALERT! {} limit {}",
                                format_bytes(pss),
                                format_bytes(max)
                            );
                            breach.cancel();
                            if !no_kill {
                                if let Err(e) = kill_process(pid) {
                                    warn!(guard = %name, "memory guard failed to kill {}: {}", pid, e);
                                }
                            }
                            return;
                        }

                        if since.elapsed() >= stats_frequency {
                            since = Instant::now();
                            debug!(
                                guard = %name,
                                "memory guard: {} limit {}",
                                format_bytes(pss),
                                format_bytes(max)
                            );
                        }
                    }
                }

                tokio::select! {
                    _ = cancelled.cancelled() => {
                        debug!(guard = %name, "memory guard cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    }
}

impl Drop for MemoryGuard {
    fn drop(&mut self) {
        self.cancelled.cancel();
    }
}

#[cfg(unix)]
fn kill_process(pid: u32) -> Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| WardenError::Signal(format!("invalid pid {}", pid)))?;
    signal::kill(Pid::from_raw(raw), Signal::SIGKILL)
        .map_err(|e| WardenError::Signal(format!("SIGKILL to {}: {}", pid, e)))
}

#[cfg(not(unix))]
fn kill_process(pid: u32) -> Result<()> {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::everything(),
    );
    match system.process(sys_pid) {
        Some(process) if process.kill() => Ok(()),
        _ => Err(WardenError::Signal(format!("failed to kill {}", pid))),
    }
}
