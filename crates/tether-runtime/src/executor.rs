//! Hook execution with a bounded run time and captured output.
//!
//! Each invocation spawns the hook with the event's arguments, feeds the
//! event's stdin bytes (if any), and waits for exit under the caller's
//! deadline. The child is spawned with `kill_on_drop`, so every exit path
//! that drops it (deadline, wait error, task cancellation) kills it.

use crate::hooks::HookRegistry;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tether_types::action::{ActionHandle, ActionOutcome};
use tether_types::event::Event;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default cap on captured hook output (64 KB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Limits applied to every hook run.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    /// Combined stdout + stderr kept in the outcome; the rest is dropped.
    pub max_output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Runs hooks from a [`HookRegistry`]; the consumer's [`ActionHandle`].
#[derive(Debug, Clone)]
pub struct HookExecutor {
    registry: HookRegistry,
    limits: ExecutionLimits,
}

impl HookExecutor {
    pub fn new(registry: HookRegistry, limits: ExecutionLimits) -> Self {
        Self { registry, limits }
    }

    /// Run the executable at `path` for `event`.
    pub async fn run(&self, path: &Path, event: Event, deadline: Duration) -> ActionOutcome {
        let mut cmd = Command::new(path);
        cmd.args(&event.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if event.stdin.is_empty() {
            cmd.stdin(Stdio::null());
        } else {
            cmd.stdin(Stdio::piped());
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ActionOutcome::SpawnFailed {
                    reason: format!("{}: {e}", path.display()),
                }
            }
        };
        debug!(hook = %path.display(), pid = ?child.id(), "Hook started");

        // Fed from a separate task so a hook that never reads its input
        // cannot stall the wait below.
        let feeder = child.stdin.take().map(|mut stdin| {
            let input = event.stdin;
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "Hook did not consume all of its stdin");
                }
            })
        });

        let outcome = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let combined =
                    combine_output(&output.stdout, &output.stderr, self.limits.max_output_bytes);
                if output.status.success() {
                    ActionOutcome::Completed { output: combined }
                } else {
                    ActionOutcome::Failed {
                        code: output.status.code(),
                        output: combined,
                    }
                }
            }
            Ok(Err(e)) => ActionOutcome::Failed {
                code: None,
                output: format!("wait failed: {e}"),
            },
            Err(_) => {
                warn!(hook = %path.display(), ?deadline, "Hook deadline reached, killing");
                ActionOutcome::TimedOut { after: deadline }
            }
        };

        if let Some(feeder) = feeder {
            feeder.abort();
        }
        outcome
    }
}

#[async_trait]
impl ActionHandle for HookExecutor {
    fn has_action(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    async fn invoke(&self, event: Event, deadline: Duration) -> ActionOutcome {
        match self.registry.resolve(&event.name) {
            Some(path) => self.run(&path, event, deadline).await,
            None => ActionOutcome::NotFound,
        }
    }
}

/// Stdout followed by stderr, lossily decoded and capped at `max` bytes.
fn combine_output(stdout: &[u8], stderr: &[u8], max: usize) -> String {
    let total = stdout.len() + stderr.len();
    let mut combined = Vec::with_capacity(total.min(max));
    combined.extend(stdout.iter().chain(stderr).take(max));
    let mut text = String::from_utf8_lossy(&combined).into_owned();
    if total > max {
        text.push_str(&format!("\n[{} bytes truncated]", total - max));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_output() {
        assert_eq!(combine_output(b"out\n", b"err\n", 1024), "out\nerr\n");
        assert_eq!(combine_output(b"", b"", 1024), "");
        assert_eq!(
            combine_output(b"abcdef", b"gh", 4),
            "abcd\n[4 bytes truncated]"
        );
    }

    #[tokio::test]
    async fn test_unknown_hook_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let executor = HookExecutor::new(HookRegistry::new(dir.path()), ExecutionLimits::default());
        assert!(!executor.has_action("unknown"));
        let outcome = executor
            .invoke(Event::new("unknown", vec![]), Duration::from_secs(1))
            .await;
        assert_eq!(outcome, ActionOutcome::NotFound);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn executor_with(hooks: &[(&str, &str)]) -> (TempDir, HookExecutor) {
            let dir = tempfile::tempdir().unwrap();
            for (name, body) in hooks {
                let path = dir.path().join(name);
                std::fs::write(&path, body).unwrap();
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            }
            let executor =
                HookExecutor::new(HookRegistry::new(dir.path()), ExecutionLimits::default());
            (dir, executor)
        }

        #[tokio::test]
        async fn test_runs_hook_with_args() {
            let (_dir, executor) = executor_with(&[("notify", "#!/bin/sh\necho \"$@\"\n")]);
            assert!(executor.has_action("notify"));
            let outcome = executor
                .invoke(
                    Event::new("notify", vec!["hello".into(), "world".into()]),
                    Duration::from_secs(10),
                )
                .await;
            assert_eq!(
                outcome,
                ActionOutcome::Completed {
                    output: "hello world\n".into()
                }
            );
        }

        #[tokio::test]
        async fn test_feeds_stdin() {
            let (_dir, executor) = executor_with(&[("copy", "#!/bin/sh\ncat\n")]);
            let event = Event::new("copy", vec![]).with_stdin(b"clipboard text".to_vec());
            let outcome = executor.invoke(event, Duration::from_secs(10)).await;
            assert_eq!(
                outcome,
                ActionOutcome::Completed {
                    output: "clipboard text".into()
                }
            );
        }

        #[tokio::test]
        async fn test_empty_stdin_is_not_a_pipe() {
            // `cat` on a null stdin returns immediately instead of waiting.
            let (_dir, executor) = executor_with(&[("copy", "#!/bin/sh\ncat\necho done\n")]);
            let outcome = executor
                .invoke(Event::new("copy", vec![]), Duration::from_secs(10))
                .await;
            assert_eq!(
                outcome,
                ActionOutcome::Completed {
                    output: "done\n".into()
                }
            );
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_failure_with_output() {
            let (_dir, executor) =
                executor_with(&[("broken", "#!/bin/sh\necho partial\necho oops >&2\nexit 3\n")]);
            let outcome = executor
                .invoke(Event::new("broken", vec![]), Duration::from_secs(10))
                .await;
            assert_eq!(
                outcome,
                ActionOutcome::Failed {
                    code: Some(3),
                    output: "partial\noops\n".into()
                }
            );
        }

        #[tokio::test]
        async fn test_deadline_kills_hook() {
            let (_dir, executor) = executor_with(&[("slow", "#!/bin/sh\nsleep 30\n")]);
            let started = std::time::Instant::now();
            let outcome = executor
                .invoke(Event::new("slow", vec![]), Duration::from_millis(200))
                .await;
            assert_eq!(
                outcome,
                ActionOutcome::TimedOut {
                    after: Duration::from_millis(200)
                }
            );
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_bad_interpreter_is_spawn_failure() {
            let (_dir, executor) =
                executor_with(&[("ghost", "#!/nonexistent/interpreter\nexit 0\n")]);
            let outcome = executor
                .invoke(Event::new("ghost", vec![]), Duration::from_secs(10))
                .await;
            assert!(
                matches!(outcome, ActionOutcome::SpawnFailed { .. }),
                "{outcome:?}"
            );
        }
    }
}
