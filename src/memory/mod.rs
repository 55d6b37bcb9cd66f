// Memory module - PSS sampling and ceiling enforcement for a single process

mod guard;
pub mod sampler;

pub use guard::{MemoryGuard, DEFAULT_INTERVAL, DEFAULT_STATS_FREQUENCY};
pub use sampler::{default_sampler, MemorySampler, ResidentSampler, SmapsSampler};

/// Format a byte count in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}
