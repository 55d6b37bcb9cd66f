use crate::error::{Result, WardenError};
use crate::health::HealthThresholds;
use crate::logs::{FileSink, SharedSink, StderrSink, StdoutSink};
use crate::names::{Sequence, SequenceGenerator};
use crate::process::{ErrorSender, Supervisor, NAME_MACRO, SEQ_MACRO};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

mod env;
mod load;

pub use env::{parse_env, parse_env_file, split_command};
pub use load::{apply_env, merge, read_value, ENV_PREFIX};

/// Upper bound on `instances` for one process entry
pub const MAX_INSTANCES: usize = 100;

/// Top-level configuration: global defaults plus the processes to supervise
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Emit debug-level diagnostics
    #[serde(default)]
    pub debug: bool,

    /// File for warden's own diagnostics, else stderr
    #[serde(default)]
    pub log: Option<PathBuf>,

    /// File receiving child stdout, else our stdout
    #[serde(default)]
    pub stdout_log: Option<PathBuf>,

    /// File receiving child stderr, else our stderr
    #[serde(default)]
    pub stderr_log: Option<PathBuf>,

    /// Size in MB at which a log file is rotated
    #[serde(default = "default_log_max_size_mb")]
    pub log_max_size_mb: u64,

    /// Rotated log files to keep
    #[serde(default = "default_log_backups")]
    pub log_backups: usize,

    /// Days a rotated log file is kept, 0 for no limit
    #[serde(default = "default_log_max_age_days")]
    pub log_max_age_days: u64,

    /// Prefix every line in child log files with a local timestamp
    #[serde(default)]
    pub log_timestamps: bool,

    /// `{key}` replacements applied to commands and log paths
    #[serde(default)]
    pub macros: BTreeMap<String, String>,

    /// Value the shared `{seq}` sequence starts after
    #[serde(default)]
    pub seq: u64,

    #[serde(default)]
    pub autorestart: bool,

    #[serde(default)]
    pub restart_delay_ms: u64,

    /// Memory ceiling per child in MB, 0 for none
    #[serde(default)]
    pub max_pss_mb: u64,

    /// Memory sampling interval when a ceiling is set
    #[serde(default = "default_guard_interval_ms")]
    pub guard_interval_ms: u64,

    #[serde(default)]
    pub uid: u32,

    #[serde(default)]
    pub gid: u32,

    /// Run commands through `bash -c` instead of splitting them
    #[serde(default)]
    pub shell: bool,

    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
}

/// One supervised command. Unset options fall back to the globals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Name used as the supervisor ID; generated if absent
    #[serde(default)]
    pub name: Option<String>,

    /// Command line. Split on whitespace (honoring quotes) when `args` is
    /// empty and `shell` is off.
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Number of identical supervisors to start
    #[serde(default = "default_instances")]
    pub instances: usize,

    #[serde(default)]
    pub autorestart: Option<bool>,

    #[serde(default)]
    pub stdout_log: Option<PathBuf>,

    #[serde(default)]
    pub stderr_log: Option<PathBuf>,

    #[serde(default)]
    pub restart_delay_ms: Option<u64>,

    #[serde(default)]
    pub max_pss_mb: Option<u64>,

    #[serde(default)]
    pub uid: Option<u32>,

    #[serde(default)]
    pub gid: Option<u32>,

    /// Per-attempt timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// `KEY=VALUE` file that replaces the child's environment
    #[serde(default)]
    pub env_file: Option<PathBuf>,

    #[serde(default)]
    pub health: HealthThresholds,
}

// Default value functions for serde
fn default_log_max_size_mb() -> u64 {
    100
}

fn default_log_backups() -> usize {
    3
}

fn default_log_max_age_days() -> u64 {
    28
}

fn default_guard_interval_ms() -> u64 {
    30_000
}

fn default_instances() -> usize {
    1
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log: None,
            stdout_log: None,
            stderr_log: None,
            log_max_size_mb: default_log_max_size_mb(),
            log_backups: default_log_backups(),
            log_max_age_days: default_log_max_age_days(),
            log_timestamps: false,
            macros: BTreeMap::new(),
            seq: 0,
            autorestart: false,
            restart_delay_ms: 0,
            max_pss_mb: 0,
            guard_interval_ms: default_guard_interval_ms(),
            uid: 0,
            gid: 0,
            shell: false,
            processes: Vec::new(),
        }
    }
}

impl WardenConfig {
    /// Load a configuration file (TOML or JSON, chosen by extension)
    pub fn from_file(path: &Path) -> Result<WardenConfig> {
        Self::from_files(&[path])
    }

    /// Load and merge configuration files in order, then apply `WARDEN_*`
    /// environment overrides
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<WardenConfig> {
        Self::load(paths, |var| std::env::var(var).ok())
    }

    /// `from_files` with environment variables read through `env`
    pub fn load<P, F>(paths: &[P], env: F) -> Result<WardenConfig>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = Value::Object(Map::new());
        for path in paths {
            let path = path.as_ref();
            debug!("loading config {}", path.display());
            merge(&mut merged, read_value(path)?);
        }
        apply_env(&mut merged, env);

        let config: WardenConfig = serde_json::from_value(merged)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to load config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML configuration text
    pub fn parse_toml(contents: &str) -> Result<WardenConfig> {
        toml::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    /// Parse JSON configuration text
    pub fn parse_json(contents: &str) -> Result<WardenConfig> {
        serde_json::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate globals and every process entry
    pub fn validate(&self) -> Result<()> {
        if self.gid > 0 && self.uid == 0 {
            return Err(WardenError::ConfigValidation(
                "gid requires uid to be set".to_string(),
            ));
        }

        if self.log_backups == 0 {
            return Err(WardenError::ConfigValidation(
                "log_backups must be at least 1".to_string(),
            ));
        }

        for key in self.macros.keys() {
            let token = format!("{{{}}}", key);
            if key.is_empty() || token == NAME_MACRO || token == SEQ_MACRO {
                return Err(WardenError::ConfigValidation(format!(
                    "macro name '{}' is empty or reserved",
                    key
                )));
            }
        }

        // Every supervisor ID, including generated instance suffixes
        let mut ids = HashMap::new();
        for (index, process) in self.processes.iter().enumerate() {
            self.resolve(process).validate(self.shell)?;
            for id in (0..process.instances).filter_map(|i| process.instance_id(i)) {
                if let Some(previous) = ids.insert(id.clone(), index) {
                    return Err(WardenError::ConfigValidation(format!(
                        "Duplicate supervisor ID '{}' (entries {} and {})",
                        id, previous, index
                    )));
                }
            }
        }

        Ok(())
    }

    /// Build one supervisor per configured instance, ready to register
    ///
    /// Every supervisor shares one `{seq}` sequence and one sink per log
    /// file path.
    pub fn supervisors(&self, errors: &ErrorSender) -> Result<Vec<(Supervisor, HealthThresholds)>> {
        self.validate()?;

        let sequence: Arc<dyn SequenceGenerator> = Arc::new(Sequence::new(self.seq));
        let mut sinks = SinkCache {
            max_size: megabytes(self.log_max_size_mb),
            max_backups: self.log_backups,
            max_age: Duration::from_secs(self.log_max_age_days.saturating_mul(24 * 60 * 60)),
            timestamps: self.log_timestamps,
            sinks: HashMap::new(),
        };
        let mut built = Vec::new();

        for process in &self.processes {
            let process = self.resolve(process);
            let env = match &process.env_file {
                Some(path) => Some(parse_env_file(path)?),
                None => None,
            };

            let stdout = match process.stdout_log.as_ref().or(self.stdout_log.as_ref()) {
                Some(path) => sinks.file(&self.expand_path(path))?,
                None => Arc::new(StdoutSink),
            };
            let stderr = match process.stderr_log.as_ref().or(self.stderr_log.as_ref()) {
                Some(path) => sinks.file(&self.expand_path(path))?,
                None => Arc::new(StderrSink),
            };

            for instance in 0..process.instances {
                let mut supervisor = process.launcher(self.shell, errors)?;
                if let Some(id) = process.instance_id(instance) {
                    supervisor.set_id(id);
                }

                supervisor.set_autorestart(process.autorestart.unwrap_or(self.autorestart));
                supervisor.set_restart_delay(
                    process
                        .restart_delay_ms
                        .map(Duration::from_millis)
                        .unwrap_or_else(|| self.restart_delay()),
                );
                supervisor.set_timeout(process.timeout());
                supervisor.set_max_pss(megabytes(process.max_pss_mb.unwrap_or(self.max_pss_mb)));
                supervisor.set_guard_interval(self.guard_interval());
                supervisor.set_credentials(
                    process.uid.unwrap_or(self.uid),
                    process.gid.unwrap_or(self.gid),
                );
                supervisor.set_child_env(env.clone());
                supervisor.set_sequence(Some(sequence.clone()));
                supervisor.set_stdout(Arc::clone(&stdout));
                supervisor.set_stderr(Arc::clone(&stderr));

                debug!("configured: {}", supervisor);
                built.push((supervisor, process.health));
            }
        }

        Ok(built)
    }

    /// Replace every `{key}` from `macros` in `text`
    pub fn expand_macros(&self, text: &str) -> String {
        self.macros
            .iter()
            .fold(text.to_string(), |text, (key, value)| {
                text.replace(&format!("{{{}}}", key), value)
            })
    }

    /// Path of warden's own log file, macros applied
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log.as_deref().map(|path| self.expand_path(path))
    }

    /// Default restart delay as Duration
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Get memory sampling interval as Duration
    pub fn guard_interval(&self) -> Duration {
        Duration::from_millis(self.guard_interval_ms)
    }

    fn expand_path(&self, path: &Path) -> PathBuf {
        if self.macros.is_empty() {
            return path.to_path_buf();
        }
        PathBuf::from(self.expand_macros(&path.to_string_lossy()))
    }

    // A copy of `process` with macros applied to its command line
    fn resolve(&self, process: &ProcessConfig) -> ProcessConfig {
        let mut resolved = process.clone();
        if self.macros.is_empty() {
            return resolved;
        }
        resolved.command = self.expand_macros(&process.command);
        resolved.args = process.args.iter().map(|a| self.expand_macros(a)).collect();
        resolved
    }
}

/// Megabytes to bytes, saturating instead of overflowing
fn megabytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

impl ProcessConfig {
    /// A bare entry running `command` with global defaults
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            instances: default_instances(),
            ..Default::default()
        }
    }

    /// Validate the entry; `shell` is the global `bash -c` switch
    pub fn validate(&self, shell: bool) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(WardenError::MissingConfigField("command".to_string()));
        }

        if !shell && self.args.is_empty() {
            split_command(&self.command)?;
        }

        if let Some(name) = &self.name {
            if name.is_empty() {
                return Err(WardenError::ConfigValidation(
                    "name must not be empty".to_string(),
                ));
            }
        }

        if self.instances == 0 {
            return Err(WardenError::ConfigValidation(
                "instances must be at least 1".to_string(),
            ));
        }

        if self.instances > MAX_INSTANCES {
            return Err(WardenError::ConfigValidation(format!(
                "instances cannot exceed {}",
                MAX_INSTANCES
            )));
        }

        if self.gid.unwrap_or(0) > 0 && self.uid.unwrap_or(0) == 0 {
            return Err(WardenError::ConfigValidation(format!(
                "gid requires uid for '{}'",
                self.command
            )));
        }

        Ok(())
    }

    /// Supervisor ID of the `instance`th copy: the name, suffixed `-<n>`
    /// when there are several. `None` when unnamed.
    pub fn instance_id(&self, instance: usize) -> Option<String> {
        let name = self.name.as_ref()?;
        if self.instances > 1 {
            Some(format!("{}-{}", name, instance + 1))
        } else {
            Some(name.clone())
        }
    }

    /// Get per-attempt timeout as Duration, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    fn launcher(&self, shell: bool, errors: &ErrorSender) -> Result<Supervisor> {
        if shell {
            let mut line = self.command.clone();
            for arg in &self.args {
                line.push(' ');
                line.push_str(arg);
            }
            return Ok(Supervisor::shell(line, errors.clone()));
        }

        if self.args.is_empty() {
            let mut words = split_command(&self.command)?;
            let command = words.remove(0);
            Ok(Supervisor::new(command, words, errors.clone()))
        } else {
            Ok(Supervisor::new(self.command.clone(), self.args.clone(), errors.clone()))
        }
    }
}

/// One rotating file sink per path
struct SinkCache {
    max_size: u64,
    max_backups: usize,
    max_age: Duration,
    timestamps: bool,
    sinks: HashMap<PathBuf, SharedSink>,
}

impl SinkCache {
    fn file(&mut self, path: &Path) -> Result<SharedSink> {
        if let Some(sink) = self.sinks.get(path) {
            return Ok(Arc::clone(sink));
        }
        let mut sink = FileSink::with_rotation(path, self.max_size, self.max_backups)?
            .with_max_age(self.max_age);
        if self.timestamps {
            sink = sink.with_timestamps();
        }
        let sink: SharedSink = Arc::new(sink);
        self.sinks.insert(path.to_path_buf(), Arc::clone(&sink));
        Ok(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[test]
    fn test_warden_config_defaults() {
        let config = WardenConfig::parse_toml("").unwrap();

        assert!(!config.debug);
        assert_eq!(config.log_max_size_mb, 100);
        assert_eq!(config.log_backups, 3);
        assert_eq!(config.seq, 0);
        assert!(!config.autorestart);
        assert_eq!(config.guard_interval(), Duration::from_secs(30));
        assert!(config.processes.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_toml_processes() {
        let toml = r#"
autorestart = true
restart_delay_ms = 250

[[processes]]
name = "web"
command = "python -m http.server '8000'"
instances = 2
timeout_ms = 5000

[processes.health]
restarts_crit_over = 10

[[processes]]
command = "sleep"
args = ["30"]
autorestart = false
"#;
        let config = WardenConfig::parse_toml(toml).unwrap();

        assert!(config.autorestart);
        assert_eq!(config.restart_delay(), Duration::from_millis(250));
        assert_eq!(config.processes.len(), 2);

        let web = &config.processes[0];
        assert_eq!(web.name.as_deref(), Some("web"));
        assert_eq!(web.instances, 2);
        assert_eq!(web.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(web.health.restarts_crit_over, Some(10));
        assert_eq!(web.health.rpm_crit_over, Some(2));

        let sleeper = &config.processes[1];
        assert_eq!(sleeper.instances, 1);
        assert_eq!(sleeper.autorestart, Some(false));
        assert_eq!(sleeper.timeout(), None);

        config.validate().unwrap();
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "max_pss_mb": 64,
            "processes": [{ "command": "echo hello" }]
        }"#;
        let config = WardenConfig::parse_json(json).unwrap();

        assert_eq!(config.max_pss_mb, 64);
        assert_eq!(config.processes[0].command, "echo hello");
    }

    #[test]
    fn test_from_file_formats() {
        let temp_dir = TempDir::new().unwrap();

        let toml_path = temp_dir.path().join("warden.toml");
        fs::write(&toml_path, "[[processes]]\ncommand = \"true\"\n").unwrap();
        assert_eq!(WardenConfig::from_file(&toml_path).unwrap().processes.len(), 1);

        let json_path = temp_dir.path().join("warden.json");
        fs::write(&json_path, r#"{"processes": [{"command": "true"}]}"#).unwrap();
        assert_eq!(WardenConfig::from_file(&json_path).unwrap().processes.len(), 1);

        let yaml_path = temp_dir.path().join("warden.yaml");
        fs::write(&yaml_path, "processes: []").unwrap();
        assert!(matches!(
            WardenConfig::from_file(&yaml_path),
            Err(WardenError::InvalidConfig(_))
        ));

        assert!(matches!(
            WardenConfig::from_file(&temp_dir.path().join("missing.toml")),
            Err(WardenError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_entries() {
        let mut config = WardenConfig::default();
        config.processes.push(ProcessConfig::command("  "));
        assert!(matches!(
            config.validate(),
            Err(WardenError::MissingConfigField(_))
        ));

        let mut process = ProcessConfig::command("true");
        process.instances = 0;
        assert!(process.validate(false).is_err());
        process.instances = MAX_INSTANCES + 1;
        assert!(process.validate(false).is_err());
        process.instances = MAX_INSTANCES;
        assert!(process.validate(false).is_ok());

        let mut process = ProcessConfig::command("true");
        process.gid = Some(100);
        assert!(process.validate(false).is_err());
        process.uid = Some(100);
        assert!(process.validate(false).is_ok());

        let process = ProcessConfig::command("echo 'unterminated");
        assert!(process.validate(false).is_err());
        // bash gets the line as-is
        assert!(process.validate(true).is_ok());
    }

    #[test]
    fn test_validate_rejects_global_gid_without_uid() {
        let config = WardenConfig {
            gid: 10,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(WardenError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut first = ProcessConfig::command("true");
        first.name = Some("twin".to_string());
        let second = first.clone();

        let config = WardenConfig {
            processes: vec![first, second],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_supervisors_apply_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let env_path = temp_dir.path().join("child.env");
        fs::write(&env_path, "# comment\nTHEVAR=WORLD\n").unwrap();

        let mut web = ProcessConfig::command("echo {seq}");
        web.name = Some("web".to_string());
        web.instances = 2;
        web.autorestart = Some(false);
        web.env_file = Some(env_path);
        web.stdout_log = Some(temp_dir.path().join("out.log"));

        let config = WardenConfig {
            autorestart: true,
            processes: vec![web, ProcessConfig::command("sleep 1")],
            ..Default::default()
        };

        let (tx, _rx) = mpsc::channel(8);
        let built = config.supervisors(&tx).unwrap();
        assert_eq!(built.len(), 3);

        let ids: Vec<&str> = built.iter().map(|(s, _)| s.id()).collect();
        assert_eq!(ids, vec!["web-1", "web-2", ""]);

        assert!(!built[0].0.autorestart());
        assert!(built[2].0.autorestart());
        assert_eq!(shell_words::split(&built[0].0.to_string()).unwrap(), vec!["echo", "{seq}"]);
        assert_eq!(built[2].0.to_string(), "sleep 1");
    }

    #[tokio::test]
    async fn test_supervisors_share_sequence() {
        let config = WardenConfig {
            seq: 10,
            processes: vec![ProcessConfig::command("echo {seq}"), ProcessConfig::command("echo {seq}")],
            ..Default::default()
        };

        let (tx, _rx) = mpsc::channel(8);
        let built = config.supervisors(&tx).unwrap();
        let lines: Vec<String> = built
            .into_iter()
            .map(|(s, _)| {
                let s = Arc::new(s);
                let line = s.run();
                s.stop();
                line
            })
            .collect();

        assert_eq!(lines, vec!["echo 11".to_string(), "echo 12".to_string()]);
    }

    #[tokio::test]
    async fn test_shell_mode_wraps_in_bash() {
        let mut process = ProcessConfig::command("echo");
        process.args = vec!["$HOME".to_string()];
        let config = WardenConfig {
            shell: true,
            processes: vec![process],
            ..Default::default()
        };

        let (tx, _rx) = mpsc::channel(8);
        let built = config.supervisors(&tx).unwrap();
        assert_eq!(
            shell_words::split(&built[0].0.to_string()).unwrap(),
            vec!["bash", "-c", "echo $HOME"]
        );
    }

    #[tokio::test]
    async fn test_missing_env_file_fails() {
        let mut process = ProcessConfig::command("true");
        process.env_file = Some(PathBuf::from("/nonexistent/child.env"));
        let config = WardenConfig {
            processes: vec![process],
            ..Default::default()
        };

        let (tx, _rx) = mpsc::channel(8);
        assert!(config.supervisors(&tx).is_err());
    }

    #[test]
    fn test_validate_rejects_colliding_instance_ids() {
        let mut web = ProcessConfig::command("true");
        web.name = Some("web".to_string());
        web.instances = 2;
        let mut web_one = ProcessConfig::command("true");
        web_one.name = Some("web-1".to_string());

        let config = WardenConfig {
            processes: vec![web.clone(), web_one],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(WardenError::ConfigValidation(msg)) if msg.contains("web-1")
        ));

        let mut web_three = ProcessConfig::command("true");
        web_three.name = Some("web-3".to_string());
        let config = WardenConfig {
            processes: vec![web, web_three],
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[tokio::test]
    async fn test_huge_megabyte_values_saturate() {
        let temp_dir = TempDir::new().unwrap();
        let config = WardenConfig {
            log_max_size_mb: u64::MAX,
            log_max_age_days: u64::MAX,
            max_pss_mb: u64::MAX,
            stdout_log: Some(temp_dir.path().join("out.log")),
            processes: vec![ProcessConfig::command("true")],
            ..Default::default()
        };

        let (tx, _rx) = mpsc::channel(8);
        assert_eq!(config.supervisors(&tx).unwrap().len(), 1);
        assert_eq!(megabytes(u64::MAX), u64::MAX);
        assert_eq!(megabytes(2), 2 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_macros_expand_commands_and_logs() {
        let temp_dir = TempDir::new().unwrap();
        let mut process = ProcessConfig::command("echo {greeting} {seq}");
        process.stderr_log = Some(PathBuf::from("{root}/err-{env}.log"));

        let mut macros = BTreeMap::new();
        macros.insert("greeting".to_string(), "howdy".to_string());
        macros.insert("root".to_string(), temp_dir.path().display().to_string());
        macros.insert("env".to_string(), "prod".to_string());

        let config = WardenConfig {
            macros,
            log: Some(PathBuf::from("{root}/warden.log")),
            processes: vec![process],
            ..Default::default()
        };

        assert_eq!(config.expand_macros("{env}-{env}-{seq}"), "prod-prod-{seq}");
        assert_eq!(config.log_path(), Some(temp_dir.path().join("warden.log")));

        let (tx, _rx) = mpsc::channel(8);
        let built = config.supervisors(&tx).unwrap();
        assert_eq!(
            shell_words::split(&built[0].0.to_string()).unwrap(),
            vec!["echo", "howdy", "{seq}"]
        );
        assert!(temp_dir.path().join("err-prod.log").exists());
    }

    #[test]
    fn test_reserved_macro_names_rejected() {
        for key in ["seq", "name", ""] {
            let mut config = WardenConfig::default();
            config.macros.insert(key.to_string(), "x".to_string());
            assert!(config.validate().is_err(), "macro '{}' accepted", key);
        }
    }

    #[test]
    fn test_load_merges_files_then_env() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("base.toml");
        fs::write(
            &base,
            "seq = 1
restart_delay_ms = 100

[macros]
env = \"dev\"

[[processes]]
name = \"one\"
command = \"true\"
",
        )
        .unwrap();
        let overlay = temp_dir.path().join("overlay.json");
        fs::write(
            &overlay,
            r#"{"seq": 7, "macros": {"env": "prod"}, "processes": [{"name": "two", "command": "true"}]}"#,
        )
        .unwrap();

        let config = WardenConfig::load(&[&base, &overlay], |var| match var {
            "WARDEN_AUTORESTART" => Some("true".to_string()),
            "WARDEN_SEQ" => Some("42".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.seq, 42);
        assert!(config.autorestart);
        assert_eq!(config.restart_delay(), Duration::from_millis(100));
        assert_eq!(config.macros.get("env").map(String::as_str), Some("prod"));
        let names: Vec<Option<&str>> = config.processes.iter().map(|p| p.name.as_deref()).collect();
        assert_eq!(names, vec![Some("one"), Some("two")]);

        let bad_env = WardenConfig::load(&[&base], |var| {
            (var == "WARDEN_SEQ").then(|| "many".to_string())
        });
        assert!(matches!(bad_env, Err(WardenError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_global_restart_delay_is_the_fallback() {
        let mut fast = ProcessConfig::command("true");
        fast.restart_delay_ms = Some(5);
        let config = WardenConfig {
            restart_delay_ms: 2_000,
            autorestart: true,
            processes: vec![fast, ProcessConfig::command("true")],
            ..Default::default()
        };

        let (tx, _rx) = mpsc::channel(8);
        let supervisors: Vec<Arc<Supervisor>> = config
            .supervisors(&tx)
            .unwrap()
            .into_iter()
            .map(|(s, _)| Arc::new(s))
            .collect();
        for supervisor in &supervisors {
            supervisor.run();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        for supervisor in &supervisors {
            supervisor.stop();
            supervisor.wait().await;
        }

        assert!(supervisors[0].restarts() > 1);
        assert_eq!(supervisors[1].restarts(), 0);
    }

    #[tokio::test]
    async fn test_log_timestamps_reach_file_sinks() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out.log");
        let config = WardenConfig {
            log_timestamps: true,
            stdout_log: Some(out.clone()),
            processes: vec![ProcessConfig::command("echo stamped")],
            ..Default::default()
        };

        let (tx, _rx) = mpsc::channel(8);
        let (supervisor, _) = config.supervisors(&tx).unwrap().remove(0);
        let supervisor = Arc::new(supervisor);
        supervisor.run();
        supervisor.wait().await;

        let content = fs::read_to_string(&out).unwrap();
        assert!(content.starts_with('['));
        assert!(content.ends_with("] stamped\n"));
    }
}
