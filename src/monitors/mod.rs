//! Check execution: protocol checkers, the dispatcher in front of them, and
//! the per-monitor scheduling that drives it all.

use std::time::Duration;

pub mod cadence;
pub mod cert_checker;
pub mod checker;
pub mod database_checker;
pub mod error;
pub mod http_checker;
pub mod port_checker;
pub mod push_checker;
pub mod push_receiver;
pub mod retention;
pub mod scheduler;
pub mod status_code;
pub mod status_recorder;

/// Upper bound on every outbound network operation.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub use cadence::Cadence;
pub use checker::{CheckDispatcher, CheckResult, Checker};
pub use error::CheckError;
pub use push_receiver::{PushReceipt, PushReceiver};
pub use retention::RetentionSweeper;
pub use scheduler::Scheduler;
pub use status_recorder::StatusRecorder;
