use crate::error::WardenError;
use crate::logs::{discard, SharedSink};
use crate::memory::MemoryGuard;
use crate::names::{short_name, NameGenerator, RandomNames, SequenceGenerator};
use crate::process::forwarder::{drain, spawn_forwarder, DRAIN_GRACE};
use crate::process::macros::{command_line, expand_args};
use crate::process::rate::RateCounter;
use crate::process::report::{ErrorReporter, ErrorSender};
use crate::process::spawner::{spawn_attempt, Credentials, LaunchSpec};
use crate::process::types::{AttemptExit, SupervisorStatus};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default time between memory samples of a supervised child
pub const DEFAULT_GUARD_INTERVAL: Duration = Duration::from_secs(30);

/// Owns the lifecycle of one supervised command: spawning, output wiring,
/// timeouts, memory enforcement and restarts
///
/// Configure with the setters, wrap in an `Arc`, then `run`. An instance runs
/// at most once; `duplicate` gives a fresh instance with the same settings.
pub struct Supervisor {
    id: String,
    command: String,
    args: Vec<String>,

    restart_delay: Duration,
    timeout: Option<Duration>,
    max_pss: u64,
    guard_interval: Duration,
    credentials: Option<Credentials>,
    child_env: Option<Vec<(String, String)>>,
    sequence: Option<Arc<dyn SequenceGenerator>>,
    names: Arc<dyn NameGenerator>,
    stdout: SharedSink,
    stderr: SharedSink,

    autorestart: AtomicBool,
    restarts: AtomicU64,
    restarts_window: RateCounter,
    reporter: ErrorReporter,
    status: watch::Sender<SupervisorStatus>,
    global: CancellationToken,
    stdin: StdMutex<Option<StdinPipe>>,
}

/// The live child's stdin, closed when its attempt ends
#[derive(Clone)]
struct StdinPipe {
    pipe: Arc<Mutex<ChildStdin>>,
    closed: CancellationToken,
}

impl Supervisor {
    /// Create a supervisor for `command` with `args`, reporting to `errors`
    pub fn new(command: impl Into<String>, args: Vec<String>, errors: ErrorSender) -> Self {
        let (status, _) = watch::channel(SupervisorStatus::Init);
        Self {
            id: String::new(),
            command: command.into(),
            args,
            restart_delay: Duration::ZERO,
            timeout: None,
            max_pss: 0,
            guard_interval: DEFAULT_GUARD_INTERVAL,
            credentials: None,
            child_env: None,
            sequence: None,
            names: Arc::new(RandomNames),
            stdout: discard(),
            stderr: discard(),
            autorestart: AtomicBool::new(false),
            restarts: AtomicU64::new(0),
            restarts_window: RateCounter::default(),
            reporter: ErrorReporter::new(errors),
            status,
            global: CancellationToken::new(),
            stdin: StdMutex::new(None),
        }
    }

    /// Run `command_line` through `bash -c`
    pub fn shell(command_line: impl Into<String>, errors: ErrorSender) -> Self {
        Self::new("bash", vec!["-c".to_string(), command_line.into()], errors)
    }

    /// A fresh, never-run supervisor with this one's configuration
    pub fn duplicate(&self) -> Self {
        let mut copy = Self::new(self.command.clone(), self.args.clone(), self.reporter.sender());
        copy.restart_delay = self.restart_delay;
        copy.timeout = self.timeout;
        copy.max_pss = self.max_pss;
        copy.guard_interval = self.guard_interval;
        copy.credentials = self.credentials;
        copy.child_env = self.child_env.clone();
        copy.sequence = self.sequence.clone();
        copy.names = Arc::clone(&self.names);
        copy.stdout = Arc::clone(&self.stdout);
        copy.stderr = Arc::clone(&self.stderr);
        copy.set_autorestart(self.autorestart());
        copy
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Pause between an exit and the next attempt
    pub fn set_restart_delay(&mut self, delay: Duration) {
        self.restart_delay = delay;
    }

    /// Kill each attempt that runs longer than `timeout`
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout.filter(|t| !t.is_zero());
    }

    /// Memory ceiling in bytes; 0 disables the memory guard
    pub fn set_max_pss(&mut self, bytes: u64) {
        self.max_pss = bytes;
    }

    /// Time between memory samples when a ceiling is set
    pub fn set_guard_interval(&mut self, interval: Duration) {
        self.guard_interval = interval;
    }

    /// Run the child as `uid` (and `gid` unless 0). A `uid` of 0 clears it.
    pub fn set_credentials(&mut self, uid: u32, gid: u32) {
        self.credentials = (uid > 0).then_some(Credentials { uid, gid });
    }

    /// Explicit child environment; `None` inherits ours
    pub fn set_child_env(&mut self, env: Option<Vec<(String, String)>>) {
        self.child_env = env;
    }

    pub fn set_sequence(&mut self, sequence: Option<Arc<dyn SequenceGenerator>>) {
        self.sequence = sequence;
    }

    pub fn set_names(&mut self, names: Arc<dyn NameGenerator>) {
        self.names = names;
    }

    pub fn set_stdout(&mut self, sink: SharedSink) {
        self.stdout = sink;
    }

    pub fn set_stderr(&mut self, sink: SharedSink) {
        self.stderr = sink;
    }

    /// Whether a finished child is started again. May change at any time.
    pub fn set_autorestart(&self, enabled: bool) {
        self.autorestart.store(enabled, Ordering::Release);
    }

    pub fn autorestart(&self) -> bool {
        self.autorestart.load(Ordering::Acquire)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> SupervisorStatus {
        *self.status.borrow()
    }

    /// Errors reported so far
    pub fn errors(&self) -> u64 {
        self.reporter.count()
    }

    /// Restarts performed so far
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Acquire)
    }

    /// Restarts within the last minute
    pub fn restarts_per_minute(&self) -> u64 {
        self.restarts_window.count()
    }

    /// Start supervising and return the macro-expanded command line
    ///
    /// Returns an empty string, doing nothing, unless this instance has never
    /// run. Does not wait for the child; use `wait` for that. Must be called
    /// inside a tokio runtime.
    pub fn run(self: &Arc<Self>) -> String {
        let claimed = self.status.send_if_modified(|status| {
            if *status == SupervisorStatus::Init {
                *status = SupervisorStatus::Running;
                true
            } else {
                false
            }
        });
        if !claimed {
            return String::new();
        }

        let name = self.names.generate();
        let short = short_name(&name);
        let args = expand_args(&self.args, &short, self.sequence.as_deref());
        let expanded = command_line(&self.command, &args);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _done = MarkDone(&this.status);
            this.supervise(name, short, args).await;
        });

        expanded
    }

    /// Disable restarts, cancel the running attempt and close the rate
    /// counter. Safe to call any number of times from anywhere.
    pub fn stop(&self) {
        debug!(supervisor = %self.id, "stop signalled");
        self.set_autorestart(false);
        self.global.cancel();
        self.restarts_window.close();
    }

    /// Resolves once the supervising task has ended, or at once if it never
    /// started
    pub async fn wait(&self) {
        let mut status = self.status.subscribe();
        let _ = status
            .wait_for(|s| *s != SupervisorStatus::Running)
            .await;
    }

    /// Write to the live child's stdin
    ///
    /// Fails with `BrokenPipe` when no child is running, and aborts a write
    /// still pending when the attempt ends.
    pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let stdin = self
            .stdin
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let Some(StdinPipe { pipe, closed }) = stdin else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "no live child"));
        };

        tokio::select! {
            result = write_pipe(&pipe, buf) => result,
            _ = closed.cancelled() => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "child stdin closed"))
            }
        }
    }

    fn set_stdin(&self, stdin: Option<StdinPipe>) {
        let previous = std::mem::replace(
            &mut *self.stdin.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            stdin,
        );
        if let Some(previous) = previous {
            previous.closed.cancel();
        }
    }

    async fn supervise(&self, name: String, short: String, args: Vec<String>) {
        let label = format!("{}/{}", name, self.id);
        debug!(supervisor = %label, "starting ({})", short);

        loop {
            if self.global.is_cancelled() {
                break;
            }

            let attempt = self.global.child_token();
            let spec = LaunchSpec {
                command: &self.command,
                args: &args,
                credentials: self.credentials,
                env: self.child_env.as_deref(),
            };
            if let Some(creds) = spec.credentials {
                debug!(supervisor = %label, "running as {}:{}", creds.uid, creds.gid);
            }

            match spawn_attempt(&spec, &label) {
                Ok(mut child) => self.run_attempt(&label, &mut child, &attempt).await,
                Err(e) => {
                    self.reporter.report(e);
                    attempt.cancel();
                }
            }

            if !self.autorestart() {
                break;
            }

            tokio::select! {
                _ = self.global.cancelled() => {
                    debug!(supervisor = %label, "cancelling");
                    break;
                }
                _ = tokio::time::sleep(self.restart_delay) => {}
            }

            self.restarts.fetch_add(1, Ordering::AcqRel);
            self.restarts_window.add(1);
            debug!(supervisor = %label, "restarting");
        }

        debug!(supervisor = %label, "exiting ({})", short);
    }

    async fn run_attempt(&self, label: &str, child: &mut Child, attempt: &CancellationToken) {
        let mut forwarders = Vec::with_capacity(2);
        match child.stdout.take() {
            Some(out) => forwarders.push(spawn_forwarder(
                out,
                Arc::clone(&self.stdout),
                self.reporter.sender(),
            )),
            None => self.reporter.report(WardenError::Pipe(label.to_string(), "stdout")),
        }
        match child.stderr.take() {
            Some(err) => forwarders.push(spawn_forwarder(
                err,
                Arc::clone(&self.stderr),
                self.reporter.sender(),
            )),
            None => self.reporter.report(WardenError::Pipe(label.to_string(), "stderr")),
        }
        match child.stdin.take() {
            Some(pipe) => self.set_stdin(Some(StdinPipe {
                pipe: Arc::new(Mutex::new(pipe)),
                closed: CancellationToken::new(),
            })),
            None => self.reporter.report(WardenError::Pipe(label.to_string(), "stdin")),
        }

        let guard = match child.id() {
            Some(pid) if self.max_pss > 0 => {
                let mut guard = MemoryGuard::attach(pid);
                guard.set_name(label);
                guard.interval(self.guard_interval);
                guard.limit(self.max_pss);
                Some(guard)
            }
            _ => None,
        };

        let timer = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let exit = tokio::select! {
            result = child.wait() => AttemptExit::Exited(result),
            _ = attempt.cancelled() => AttemptExit::Cancelled,
            _ = timer => {
                attempt.cancel();
                AttemptExit::TimedOut
            }
        };

        if !matches!(exit, AttemptExit::Exited(_)) {
            // kill() also reaps the child
            if let Err(e) = child.kill().await {
                debug!(supervisor = %label, "kill after cancellation failed: {}", e);
            }
        }

        if !self.global.is_cancelled() {
            match exit {
                AttemptExit::Exited(Ok(status)) if status.success() => {}
                AttemptExit::Exited(Ok(status)) => {
                    let breached = guard.as_ref().map_or(false, |g| g.is_breached());
                    let detail = if breached {
                        format!("{} (memory limit exceeded)", status)
                    } else {
                        status.to_string()
                    };
                    self.reporter.report(WardenError::Exited(label.to_string(), detail));
                }
                AttemptExit::Exited(Err(e)) => {
                    self.reporter.report(WardenError::Wait(label.to_string(), e));
                }
                AttemptExit::TimedOut => {
                    let timeout = self.timeout.unwrap_or_default();
                    self.reporter
                        .report(WardenError::Timeout(label.to_string(), timeout));
                }
                // Only the global scope cancels an attempt directly
                AttemptExit::Cancelled => {}
            }
        }

        attempt.cancel();
        if let Some(guard) = guard {
            guard.cancel();
        }
        self.set_stdin(None);
        drain(forwarders, DRAIN_GRACE).await;
    }
}

impl std::fmt::Display for Supervisor {
    /// The command line as configured, before macro expansion
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", command_line(&self.command, &self.args))
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("id", &self.id)
            .field("command", &self.to_string())
            .field("status", &self.status())
            .field("restarts", &self.restarts())
            .field("errors", &self.errors())
            .finish()
    }
}

async fn write_pipe(pipe: &Mutex<ChildStdin>, buf: &[u8]) -> io::Result<usize> {
    let mut pipe = pipe.lock().await;
    pipe.write_all(buf).await?;
    pipe.flush().await?;
    Ok(buf.len())
}

/// Moves the status to `Done` when the supervising task ends, even by panic
struct MarkDone<'a>(&'a watch::Sender<SupervisorStatus>);

impl Drop for MarkDone<'_> {
    fn drop(&mut self) {
        self.0.send_replace(SupervisorStatus::Done);
    }
}
