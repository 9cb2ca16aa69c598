//! End-to-end supervisor tests against a fake backend executable.
//!
//! Each test generates a small shell script standing in for the analysis
//! backend; its exit codes drive the supervisor exactly like the real CLI
//! would.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use analysis_host::{
    ExecOptions, ProcessSupervisor, ServerStatus, StatusEvent, SupervisorConfig,
};

/// Write an executable `fake-backend` script into `dir`
fn write_backend(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-backend");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn supervisor_for(root: &Path, backend: PathBuf, max_attempts: u32) -> ProcessSupervisor {
    let mut config = SupervisorConfig::new("fake-backend");
    config.program_path = Some(backend);
    config.max_attempts = max_attempts;
    ProcessSupervisor::new(root, config)
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for: {}", what);
}

fn read_count(path: &Path) -> u32 {
    std::fs::read_to_string(path)
        .map(|s| s.trim().parse().unwrap_or(0))
        .unwrap_or(0)
}

#[tokio::test]
async fn test_flags_and_file_context_are_passed() {
    let dir = tempfile::tempdir().unwrap();
    let backend = write_backend(dir.path(), "echo \"$@\"");
    let supervisor = supervisor_for(dir.path(), backend, 5);

    let output = supervisor
        .execute_command(
            &["check".to_string()],
            Some(Path::new("src/main.py")),
            &ExecOptions::default(),
            true,
        )
        .await
        .unwrap()
        .expect("backend is installed");

    assert_eq!(supervisor.status(), ServerStatus::Ready);
    assert_eq!(
        output.stdout.trim(),
        "check src/main.py --no-auto-start --from=analysis-host"
    );
}

#[tokio::test]
async fn test_stdin_is_piped_to_the_backend() {
    let dir = tempfile::tempdir().unwrap();
    let backend = write_backend(dir.path(), "cat");
    let supervisor = supervisor_for(dir.path(), backend, 5);

    let options = ExecOptions {
        stdin: Some("def f(): pass\n".to_string()),
    };
    let output = supervisor
        .execute_command(&["check-contents".to_string()], None, &options, true)
        .await
        .unwrap()
        .expect("backend is installed");

    assert_eq!(output.stdout, "def f(): pass\n");
}

#[tokio::test]
async fn test_type_errors_exit_code_is_a_successful_result() {
    let dir = tempfile::tempdir().unwrap();
    let backend = write_backend(dir.path(), "echo '{\"errors\": [1]}'\nexit 2");
    let supervisor = supervisor_for(dir.path(), backend, 5);

    let output = supervisor
        .execute_command(&["check".to_string()], None, &ExecOptions::default(), true)
        .await
        .unwrap()
        .expect("backend is installed");

    assert_eq!(output.exit_code, 2);
    assert_eq!(supervisor.status(), ServerStatus::Ready);
    let value: serde_json::Value = output.parse_stdout().unwrap();
    assert_eq!(value["errors"], serde_json::json!([1]));
}

#[tokio::test]
async fn test_busy_failures_retry_up_to_the_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let count_file = dir.path().join("count");
    let backend = write_backend(
        dir.path(),
        &format!(
            r#"count_file="{}"
n=$(cat "$count_file" 2>/dev/null || echo 0)
n=$((n+1))
echo "$n" > "$count_file"
if [ "$n" -lt 5 ]; then
  exit 7
fi
echo done"#,
            count_file.display()
        ),
    );
    let supervisor = supervisor_for(dir.path(), backend, 5);

    let output = supervisor
        .execute_command(&["check".to_string()], None, &ExecOptions::default(), true)
        .await
        .unwrap()
        .expect("backend is installed");

    // Four busy failures, success on the fifth and final attempt.
    assert_eq!(read_count(&count_file), 5);
    assert_eq!(output.stdout.trim(), "done");
    assert_eq!(supervisor.status(), ServerStatus::Ready);
}

#[tokio::test]
async fn test_busy_failures_exhaust_the_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let count_file = dir.path().join("count");
    let backend = write_backend(
        dir.path(),
        &format!(
            r#"n=$(cat "{count}" 2>/dev/null || echo 0)
echo $((n+1)) > "{count}"
exit 7"#,
            count = count_file.display()
        ),
    );
    let supervisor = supervisor_for(dir.path(), backend, 3);

    let error = supervisor
        .execute_command(&["check".to_string()], None, &ExecOptions::default(), false)
        .await
        .unwrap_err();

    assert_eq!(read_count(&count_file), 3);
    assert!(matches!(
        error,
        analysis_host::Error::CommandFailed {
            status: ServerStatus::Busy,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unknown_exit_code_fails_without_retrying() {
    let dir = tempfile::tempdir().unwrap();
    let count_file = dir.path().join("count");
    let backend = write_backend(
        dir.path(),
        &format!(
            r#"n=$(cat "{count}" 2>/dev/null || echo 0)
echo $((n+1)) > "{count}"
exit 42"#,
            count = count_file.display()
        ),
    );
    let supervisor = supervisor_for(dir.path(), backend, 5);

    let error = supervisor
        .execute_command(&["check".to_string()], None, &ExecOptions::default(), false)
        .await
        .unwrap_err();

    // Non-retryable: one attempt only.
    assert_eq!(read_count(&count_file), 1);
    assert_eq!(supervisor.status(), ServerStatus::Unknown);
    assert!(matches!(
        error,
        analysis_host::Error::CommandFailed {
            code: Some(42),
            status: ServerStatus::Unknown,
            ..
        }
    ));
}

#[tokio::test]
async fn test_version_mismatch_maps_to_not_running() {
    let dir = tempfile::tempdir().unwrap();
    // Command exits 9 (build-id mismatch); server mode just sleeps so the
    // reactive start has something to spawn.
    let spawn_log = dir.path().join("spawns");
    let backend = write_backend(
        dir.path(),
        &format!(
            r#"if [ "$1" = "server" ]; then
  echo started >> "{}"
  exec sleep 30
fi
exit 9"#,
            spawn_log.display()
        ),
    );
    let supervisor = supervisor_for(dir.path(), backend, 1);

    let error = supervisor
        .execute_command(&["check".to_string()], None, &ExecOptions::default(), false)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        analysis_host::Error::CommandFailed {
            status: ServerStatus::NotRunning,
            ..
        }
    ));

    // The not-running transition starts a fresh server.
    wait_until("server spawn", || spawn_log.exists()).await;
    supervisor.dispose();
}

#[tokio::test]
async fn test_server_crash_marks_the_root_failed() {
    let dir = tempfile::tempdir().unwrap();
    let count_file = dir.path().join("count");
    let backend = write_backend(
        dir.path(),
        &format!(
            r#"if [ "$1" = "server" ]; then
  exit 2
fi
n=$(cat "{count}" 2>/dev/null || echo 0)
echo $((n+1)) > "{count}"
exit 6"#,
            count = count_file.display()
        ),
    );
    let supervisor = supervisor_for(dir.path(), backend, 1);

    // The command reports no-server-running; the reactive start spawns the
    // server, which immediately crashes (exit 2, no signal).
    let _ = supervisor
        .execute_command(&["check".to_string()], None, &ExecOptions::default(), false)
        .await;

    wait_until("crash detection", || {
        supervisor.status() == ServerStatus::Failed
    })
    .await;

    // Fatal fast-path: no further invocations, result is None.
    let commands_before = read_count(&count_file);
    let result = supervisor
        .execute_command(&["check".to_string()], None, &ExecOptions::default(), false)
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(read_count(&count_file), commands_before);
}

#[tokio::test]
async fn test_repeated_not_running_spawns_a_single_server() {
    let dir = tempfile::tempdir().unwrap();
    let spawn_log = dir.path().join("spawns");
    let count_file = dir.path().join("count");
    // Command invocations alternate between no-server-running and
    // initializing, so the status transitions into NotRunning twice; the
    // long-lived server must still only be spawned once.
    let backend = write_backend(
        dir.path(),
        &format!(
            r#"if [ "$1" = "server" ]; then
  echo started >> "{spawns}"
  exec sleep 30
fi
n=$(cat "{count}" 2>/dev/null || echo 0)
n=$((n+1))
echo "$n" > "{count}"
if [ $((n % 2)) -eq 1 ]; then
  exit 6
fi
exit 1"#,
            spawns = spawn_log.display(),
            count = count_file.display()
        ),
    );
    let supervisor = supervisor_for(dir.path(), backend, 1);

    for _ in 0..4 {
        let _ = supervisor
            .execute_command(&["check".to_string()], None, &ExecOptions::default(), false)
            .await;
    }

    wait_until("server spawn", || spawn_log.exists()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let spawns = std::fs::read_to_string(&spawn_log).unwrap();
    assert_eq!(spawns.lines().count(), 1);
    supervisor.dispose();
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_dispose_kills_the_owned_server() {
    let dir = tempfile::tempdir().unwrap();
    let backend = write_backend(
        dir.path(),
        r#"if [ "$1" = "server" ]; then
  exec sleep 30
fi
exit 6"#,
    );
    let supervisor = supervisor_for(dir.path(), backend, 1);

    let _ = supervisor
        .execute_command(&["check".to_string()], None, &ExecOptions::default(), false)
        .await;

    wait_until("server start", || supervisor.server_pid().is_some()).await;
    let pid = supervisor.server_pid().unwrap();
    let proc_entry = PathBuf::from(format!("/proc/{}", pid));
    assert!(proc_entry.exists());

    supervisor.dispose();
    assert_eq!(supervisor.server_pid(), None);
    wait_until("server death", || !proc_entry.exists()).await;

    // The channel is terminal: late subscribers see Completed.
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = supervisor.subscribe_status(move |event| sink.lock().unwrap().push(event));
    assert!(seen.lock().unwrap().contains(&StatusEvent::Completed));
}
