// CLI module - Command-line entry point and supervision runner

use crate::config::{ProcessConfig, WardenConfig};
use crate::error::WardenError;
use crate::health::HealthStatus;
use crate::registry::Registry;
use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Capacity of the shared error channel
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// How often supervisor health is checked
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Warden - keeps commands running, restarting them and capping their memory
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json); a comma-separated list is
    /// merged in order
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Restart commands when they exit
    #[arg(short, long)]
    pub autorestart: bool,

    /// Delay before a restart, in milliseconds
    #[arg(long)]
    pub restart_delay_ms: Option<u64>,

    /// Kill a child whose memory exceeds this many MB
    #[arg(long)]
    pub max_pss_mb: Option<u64>,

    /// Memory sampling interval, in milliseconds
    #[arg(long)]
    pub guard_interval_ms: Option<u64>,

    /// Integer the {seq} sequence starts after
    #[arg(long)]
    pub seq: Option<u64>,

    /// Run children as this user ID
    #[arg(long)]
    pub uid: Option<u32>,

    /// Run children as this group ID (requires --uid)
    #[arg(long)]
    pub gid: Option<u32>,

    /// Wrap commands in 'bash -c' instead of running them directly
    #[arg(long)]
    pub shell: bool,

    /// File for warden's own log, else stderr
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// File for child stdout, else stdout
    #[arg(long)]
    pub stdout_log: Option<PathBuf>,

    /// File for child stderr, else stderr
    #[arg(long)]
    pub stderr_log: Option<PathBuf>,

    /// Size in MB at which log files are rotated
    #[arg(long)]
    pub log_max_size_mb: Option<u64>,

    /// Number of rotated log files to keep
    #[arg(long)]
    pub log_backups: Option<usize>,

    /// Days to keep rotated log files (0 for no limit)
    #[arg(long)]
    pub log_max_age_days: Option<u64>,

    /// Prefix lines in child log files with a timestamp
    #[arg(long)]
    pub log_timestamps: bool,

    /// Per-attempt timeout for the command given on the command line
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Environment file for the command given on the command line
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Command to supervise, with its arguments
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// Parse arguments and supervise until every command has finished
    pub async fn run() -> anyhow::Result<()> {
        let cli = Cli::parse();
        let config = cli.config()?;
        init_logging(&config)?;
        supervise(config).await
    }

    /// Load the configuration file, if any, and apply command-line overrides
    pub fn config(&self) -> anyhow::Result<WardenConfig> {
        let mut config = match &self.config {
            Some(list) => {
                let paths: Vec<PathBuf> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect();
                WardenConfig::from_files(&paths).with_context(|| format!("loading {}", list))?
            }
            None => WardenConfig::default(),
        };

        config.debug |= self.debug;
        config.autorestart |= self.autorestart;
        config.shell |= self.shell;
        config.log_timestamps |= self.log_timestamps;
        if let Some(delay) = self.restart_delay_ms {
            config.restart_delay_ms = delay;
        }
        if let Some(max) = self.max_pss_mb {
            config.max_pss_mb = max;
        }
        if let Some(interval) = self.guard_interval_ms {
            config.guard_interval_ms = interval;
        }
        if let Some(seq) = self.seq {
            config.seq = seq;
        }
        if let Some(uid) = self.uid {
            config.uid = uid;
        }
        if let Some(gid) = self.gid {
            config.gid = gid;
        }
        if let Some(log) = &self.log {
            config.log = Some(log.clone());
        }
        if let Some(path) = &self.stdout_log {
            config.stdout_log = Some(path.clone());
        }
        if let Some(path) = &self.stderr_log {
            config.stderr_log = Some(path.clone());
        }
        if let Some(size) = self.log_max_size_mb {
            config.log_max_size_mb = size;
        }
        if let Some(backups) = self.log_backups {
            config.log_backups = backups;
        }
        if let Some(days) = self.log_max_age_days {
            config.log_max_age_days = days;
        }

        if let Some((command, args)) = self.command.split_first() {
            let mut process = ProcessConfig::command(command.clone());
            process.args = args.to_vec();
            process.timeout_ms = self.timeout_ms;
            process.env_file = self.env_file.clone();
            config.processes.push(process);
        }

        if config.processes.is_empty() {
            bail!("nothing to supervise: give a command after -- or a --config file");
        }

        config.validate()?;
        Ok(config)
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &WardenConfig) -> anyhow::Result<()> {
    let level = if config.debug { "warden=debug,info" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(ref log_file) = config.log_path() {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("opening log file {}", log_file.display()))?;
        let file_layer = fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false);
        subscriber.with(file_layer).try_init()?;
    } else {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(config.debug);
        subscriber.with(stderr_layer).try_init()?;
    }

    Ok(())
}

/// Start every configured supervisor, stop them all on SIGINT or SIGTERM, and
/// return once all have finished
pub async fn supervise(config: WardenConfig) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
    let errors = tokio::spawn(drain_errors(rx));

    let registry = Arc::new(Registry::new());
    for (supervisor, thresholds) in config.supervisors(&tx)? {
        let supervisor = match registry.insert(supervisor, thresholds) {
            Ok(supervisor) => supervisor,
            Err(e) => {
                registry.stop_all();
                registry.wait_all().await;
                return Err(e.into());
            }
        };
        let live = supervisor.run();
        debug!(supervisor = %supervisor.id(), "Conf: {}", supervisor);
        info!(supervisor = %supervisor.id(), "started: {}", live);
    }
    drop(tx);

    let signals = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            match shutdown_signal().await {
                Ok(()) => info!("Received shutdown signal, stopping supervisors..."),
                Err(e) => error!("Failed to listen for shutdown signals: {}", e),
            }
            registry.stop_all();
        })
    };

    let health = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log_health(&registry);
            }
        })
    };

    registry.wait_all().await;
    signals.abort();
    health.abort();
    let _ = signals.await;
    let _ = health.await;

    for report in registry.health_all() {
        info!(
            supervisor = %report.id,
            "finished: restarts={} errors={} health={}",
            report.restarts, report.errors, report.health
        );
    }

    // Supervisors hold the remaining senders
    drop(registry);
    if tokio::time::timeout(Duration::from_secs(2), errors).await.is_err() {
        debug!("error channel still busy at exit");
    }

    Ok(())
}

async fn drain_errors(mut rx: mpsc::Receiver<WardenError>) {
    while let Some(err) = rx.recv().await {
        error!("{}", err);
    }
}

fn log_health(registry: &Registry) {
    for report in registry.health_all() {
        match report.health {
            HealthStatus::Ok => debug!(
                supervisor = %report.id,
                "healthy: restarts={} rpm={}",
                report.restarts, report.restarts_per_minute
            ),
            HealthStatus::Warning => warn!(
                supervisor = %report.id,
                "restarting often: restarts={} rpm={}",
                report.restarts, report.restarts_per_minute
            ),
            HealthStatus::Critical => error!(
                supervisor = %report.id,
                "restart storm: restarts={} rpm={}",
                report.restarts, report.restarts_per_minute
            ),
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => debug!("Received SIGTERM"),
        _ = sigint.recv() => debug!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_trailing_command() {
        let cli = Cli::try_parse_from(["warden", "-a", "--timeout-ms", "500", "--", "sleep", "30"]).unwrap();
        let config = cli.config().unwrap();

        assert!(config.autorestart);
        assert_eq!(config.processes.len(), 1);
        assert_eq!(config.processes[0].command, "sleep");
        assert_eq!(config.processes[0].args, vec!["30".to_string()]);
        assert_eq!(config.processes[0].timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_nothing_to_supervise() {
        let cli = Cli::try_parse_from(["warden", "--debug"]).unwrap();
        assert!(cli.config().is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("warden.toml");
        fs::write(
            &path,
            "restart_delay_ms = 100\nmax_pss_mb = 10\n\n[[processes]]\ncommand = \"true\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "warden",
            "--config",
            path.to_str().unwrap(),
            "--max-pss-mb",
            "20",
            "--seq",
            "5",
            "--",
            "echo",
            "{seq}",
        ])
        .unwrap();
        let config = cli.config().unwrap();

        assert_eq!(config.restart_delay_ms, 100);
        assert_eq!(config.max_pss_mb, 20);
        assert_eq!(config.seq, 5);
        assert_eq!(config.processes.len(), 2);
    }

    #[test]
    fn test_gid_without_uid_rejected() {
        let cli = Cli::try_parse_from(["warden", "--gid", "10", "--", "true"]).unwrap();
        assert!(cli.config().is_err());
    }

    #[tokio::test]
    async fn test_supervise_runs_to_completion() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out.log");

        let mut process = ProcessConfig::command("echo hello {seq}");
        process.instances = 2;
        let config = WardenConfig {
            stdout_log: Some(out.clone()),
            processes: vec![process],
            ..Default::default()
        };

        tokio::time::timeout(Duration::from_secs(5), supervise(config))
            .await
            .expect("supervise should return once children exit")
            .unwrap();

        let mut lines: Vec<String> = fs::read_to_string(&out)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        lines.sort();
        assert_eq!(lines, vec!["hello 1".to_string(), "hello 2".to_string()]);
    }

    #[test]
    fn test_comma_separated_configs_merge() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("first.toml");
        let second = temp_dir.path().join("second.json");
        fs::write(&first, "log_backups = 7\n\n[[processes]]\ncommand = \"true\"\n").unwrap();
        fs::write(&second, r#"{"processes": [{"command": "false"}]}"#).unwrap();

        let list = format!("{},{}", first.display(), second.display());
        let cli = Cli::try_parse_from([
            "warden",
            "--config",
            list.as_str(),
            "--log-max-age-days",
            "3",
            "--log-timestamps",
        ])
        .unwrap();
        let config = cli.config().unwrap();

        assert_eq!(config.log_backups, 7);
        assert_eq!(config.log_max_age_days, 3);
        assert!(config.log_timestamps);
        let commands: Vec<&str> = config.processes.iter().map(|p| p.command.as_str()).collect();
        assert_eq!(commands, vec!["true", "false"]);
    }
}
