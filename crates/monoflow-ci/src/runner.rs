//! Spawning a module's unit as a child process and collecting its result.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use monoflow_core::{BackendError, JobOutcome, UnitSpec};
use serde::Serialize;
use tokio::process::{Child, Command};

/// Environment variable carrying the moniker of the module being run.
pub const MODULE_ENV: &str = "MONOFLOW_MODULE";

/// Environment variable carrying the git ref the pipeline runs at.
pub const REF_ENV: &str = "MONOFLOW_REF";

/// Number of trailing stderr lines kept in a failure detail.
const STDERR_TAIL_LINES: usize = 10;

/// Result of one unit execution.
#[derive(Debug, Clone, Serialize)]
pub struct UnitResult {
    /// Module the unit belongs to.
    pub moniker: String,

    /// Exit code (0 = success, -1 when killed or terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall time in milliseconds.
    pub duration_ms: u64,

    /// Whether the unit was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl UnitResult {
    /// Whether this unit passed (exit code 0 within its timeout).
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Last few non-empty lines of stderr.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }

    pub fn into_outcome(self) -> JobOutcome {
        if self.passed() {
            return JobOutcome::Succeeded;
        }
        let mut detail = if self.timed_out {
            format!("timed out after {}ms", self.duration_ms)
        } else {
            format!("exit code {}", self.exit_code)
        };
        let tail = self.stderr_tail();
        if !tail.is_empty() {
            detail.push_str(": ");
            detail.push_str(&tail);
        }
        JobOutcome::Failed { detail }
    }
}

/// A spawned unit that has not been waited on yet.
///
/// The child is killed if this value is dropped before it exits.
#[derive(Debug)]
pub struct RunningUnit {
    moniker: String,
    child: Child,
    timeout: Option<Duration>,
    started: Instant,
}

impl RunningUnit {
    pub fn moniker(&self) -> &str {
        &self.moniker
    }

    /// OS process id, if the child is still running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the unit to exit, killing it once its timeout elapses.
    pub async fn wait(self) -> std::io::Result<UnitResult> {
        let Self {
            moniker,
            child,
            timeout,
            started,
        } = self;

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                // Dropping the wait future drops the child, which kills it.
                Err(_) => {
                    return Ok(UnitResult {
                        moniker,
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: String::new(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        timed_out: true,
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        Ok(UnitResult {
            moniker,
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
            timed_out: false,
        })
    }
}

/// Spawn `unit` for `moniker` in `dir`, exporting [`MODULE_ENV`] and
/// [`REF_ENV`] alongside the unit's own environment.
pub fn spawn_unit(
    moniker: &str,
    unit: &UnitSpec,
    dir: &Path,
    git_ref: &str,
) -> Result<RunningUnit, BackendError> {
    let Some((exe, args)) = unit.command.split_first() else {
        return Err(BackendError::Rejected {
            moniker: moniker.to_string(),
            reason: "unit has an empty command".to_string(),
        });
    };

    let child = Command::new(exe)
        .args(args)
        .current_dir(dir)
        .envs(&unit.env)
        .env(MODULE_ENV, moniker)
        .env(REF_ENV, git_ref)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    Ok(RunningUnit {
        moniker: moniker.to_string(),
        child,
        timeout: (unit.timeout_secs > 0).then(|| Duration::from_secs(unit.timeout_secs)),
        started: Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, stderr: &str) -> UnitResult {
        UnitResult {
            moniker: "lib".to_string(),
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration_ms: 100,
            timed_out: false,
        }
    }

    fn sh(script: &str) -> UnitSpec {
        UnitSpec::new(["sh", "-c", script])
    }

    #[test]
    fn test_unit_result_passed() {
        assert!(result(0, "").passed());
        assert!(!result(1, "").passed());

        let mut timed_out = result(0, "");
        timed_out.timed_out = true;
        assert!(!timed_out.passed());
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..25).map(|i| format!("line {i}\n\n")).collect();
        let tail = result(1, &stderr).stderr_tail();
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), STDERR_TAIL_LINES);
        assert_eq!(lines[0], "line 15");
        assert_eq!(lines[STDERR_TAIL_LINES - 1], "line 24");
    }

    #[test]
    fn test_failed_outcome_carries_exit_code_and_tail() {
        let outcome = result(3, "warning: x\nerror: boom\n").into_outcome();
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                detail: "exit code 3: warning: x\nerror: boom".to_string()
            }
        );
        assert_eq!(result(0, "noise").into_outcome(), JobOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_spawn_and_wait_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let running = spawn_unit("lib", &sh("echo hello; echo oops >&2"), dir.path(), "abc")
            .expect("spawn failed");
        assert_eq!(running.moniker(), "lib");

        let result = running.wait().await.expect("wait failed");
        assert!(result.passed());
        assert!(result.stdout.contains("hello"));
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_env_and_workdir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();
        let unit = sh(r#"test -f marker && test "$MONOFLOW_MODULE" = lib && test "$MONOFLOW_REF" = abc && test "$EXTRA" = 1"#)
            .with_env("EXTRA", "1");

        let result = spawn_unit("lib", &unit, dir.path(), "abc")
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(result.passed(), "stderr: {}", result.stderr);
    }

    #[tokio::test]
    async fn test_timeout_kills_unit() {
        let dir = tempfile::tempdir().unwrap();
        let unit = UnitSpec::new(["sleep", "5"]).with_timeout_secs(1);

        let start = Instant::now();
        let result = spawn_unit("slow", &unit, dir.path(), "abc")
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(result.timed_out);
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(matches!(
            result.into_outcome(),
            JobOutcome::Failed { detail } if detail.starts_with("timed out")
        ));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let unit = UnitSpec::new(Vec::<String>::new());
        let err = spawn_unit("lib", &unit, dir.path(), "abc").unwrap_err();
        assert!(matches!(err, BackendError::Rejected { moniker, .. } if moniker == "lib"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let unit = UnitSpec::new(["monoflow-definitely-not-a-binary"]);
        let err = spawn_unit("lib", &unit, dir.path(), "abc").unwrap_err();
        assert!(matches!(err, BackendError::Io(_)));
    }
}
