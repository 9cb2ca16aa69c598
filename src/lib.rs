//! analysis-host - Process supervision for language analysis backends
//!
//! Editor tooling (autocomplete, go-to-definition, references, lint,
//! outline) answers queries by invoking an out-of-process analysis server,
//! one long-lived instance per project root. This crate owns that process:
//! each [`ProcessSupervisor`] starts its server lazily, restarts it when a
//! command reports that none is running, retries commands while the server
//! warms up, and broadcasts the server's health over a status channel so
//! adapters can show spinners or disable features.
//!
//! The backend's own protocol is out of scope; the supervisor communicates
//! with it only through process exit codes, stdout, and stderr.

pub mod config;
pub mod registry;
pub mod status;
pub mod supervisor;

mod error;

pub use config::SupervisorConfig;
pub use error::{Error, Result};
pub use registry::SupervisorRegistry;
pub use status::{ServerStatus, StatusChannel, StatusEvent, StatusSubscription};
pub use supervisor::{CommandOutput, ExecOptions, ProcessSupervisor};

/// Initialize tracing output for host binaries
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("analysis_host=debug".parse().unwrap()),
        )
        .init();
}
