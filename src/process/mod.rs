// Process module - supervision of a single command and its restarts

mod forwarder;
mod macros;
pub mod rate;
mod report;
pub mod spawner;
mod supervisor;
mod types;

pub use forwarder::{drain, forward_lines, spawn_forwarder, DRAIN_GRACE};
pub use macros::{command_line, expand_args, NAME_MACRO, SEQ_MACRO};
pub use rate::{RateCounter, DEFAULT_WINDOW};
pub use report::{ErrorReporter, ErrorSender, SEND_TIMEOUT};
pub use spawner::{build_command, spawn_attempt, Credentials, LaunchSpec};
pub use supervisor::{Supervisor, DEFAULT_GUARD_INTERVAL};
pub use types::SupervisorStatus;
