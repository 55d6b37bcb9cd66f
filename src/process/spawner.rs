use crate::error::{Result, WardenError};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// User and group a child runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    /// 0 keeps the current group
    pub gid: u32,
}

/// Everything needed to start one attempt of a supervised command
#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec<'a> {
    /// Binary to run (looked up on PATH if not a path)
    pub command: &'a str,
    /// Arguments, already macro-expanded
    pub args: &'a [String],
    /// Run-as identity, if any
    pub credentials: Option<Credentials>,
    /// Explicit environment; `None` inherits ours
    pub env: Option<&'a [(String, String)]>,
}

/// Build the command for an attempt with all three standard streams piped
///
/// The child is killed if its handle is dropped, so an attempt can never leak
/// a process past its own end.
pub fn build_command(spec: &LaunchSpec<'_>) -> Command {
    let mut command = Command::new(spec.command);
    command.args(spec.args);

    #[cfg(unix)]
    if let Some(creds) = spec.credentials {
        command.uid(creds.uid);
        if creds.gid > 0 {
            command.gid(creds.gid);
        }
    }

    if let Some(env) = spec.env {
        command.env_clear();
        command.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    command
}

/// Start an attempt. `label` identifies the supervisor in errors.
pub fn spawn_attempt(spec: &LaunchSpec<'_>, label: &str) -> Result<Child> {
    build_command(spec)
        .spawn()
        .map_err(|e| WardenError::Spawn(label.to_string(), e))
}
