//! Analysis-server process supervision
//!
//! One [`ProcessSupervisor`] per project root owns the backend server
//! subprocess for that root: it starts the server lazily when a command
//! reports that none is running, restarts it after benign exits, retries
//! commands while the server is warming up, and marks the root failed when
//! the server crashes.

pub mod exit_codes;

mod process;
mod retry;

pub use process::{CommandOutput, ExecOptions, ProcessSupervisor};
