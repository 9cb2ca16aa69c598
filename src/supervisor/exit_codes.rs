//! Exit-code contract of the backend CLI
//!
//! Single-shot invocations report server health through their exit code.
//! The mapping below is fixed; anything outside it is treated as unknown.

use crate::status::ServerStatus;

/// Command succeeded
pub const OK: i32 = 0;
/// The server is still starting up
pub const SERVER_INITIALIZING: i32 = 1;
/// Command ran and found type errors (a successful analysis)
pub const TYPE_ERRORS: i32 = 2;
/// No server is running for this root
pub const NO_SERVER_RUNNING: i32 = 6;
/// The server is too busy to take the request
pub const OUT_OF_RETRIES: i32 = 7;
/// The running server was built from a different backend version and has
/// already shut itself down
pub const BUILD_ID_MISMATCH: i32 = 9;

/// Map a single-shot invocation's exit code to the server status it implies.
///
/// `None` (killed by a signal before exiting) maps to `Unknown`.
pub fn classify(code: Option<i32>) -> ServerStatus {
    match code {
        Some(OK) | Some(TYPE_ERRORS) => ServerStatus::Ready,
        Some(SERVER_INITIALIZING) => ServerStatus::Initializing,
        Some(NO_SERVER_RUNNING) | Some(BUILD_ID_MISMATCH) => ServerStatus::NotRunning,
        Some(OUT_OF_RETRIES) => ServerStatus::Busy,
        _ => ServerStatus::Unknown,
    }
}
