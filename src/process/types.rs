use serde::{Deserialize, Serialize};

/// Lifecycle of a supervisor instance: `Init -> Running -> Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorStatus {
    Init,
    Running,
    Done,
}

impl std::fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorStatus::Init => write!(f, "init"),
            SupervisorStatus::Running => write!(f, "running"),
            SupervisorStatus::Done => write!(f, "done"),
        }
    }
}

/// How one attempt ended
#[derive(Debug)]
pub(crate) enum AttemptExit {
    /// The child exited on its own
    Exited(std::io::Result<std::process::ExitStatus>),
    /// The global scope was cancelled
    Cancelled,
    /// The per-attempt timeout elapsed
    TimedOut,
}
