use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::TraceFailure;
use crate::tracer::{CodeLocation, EntryPoint, TraceEvent, TraceObserver, TraceRunner};
use serde::Deserialize;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Interpreter-side profile hook. Writes one JSON object per line to
/// `$TTMM_TRACE_OUT` for every call whose caller and callee live under
/// `$TTMM_TRACE_ROOT`.
const BOOTSTRAP: &str = include_str!("bootstrap.py");

/// Lines of interpreter stderr kept when the exit status is the only failure signal.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum WireEvent {
    Call {
        caller_path: PathBuf,
        caller_line: i64,
        callee_path: PathBuf,
        callee_line: i64,
        callee_name: String,
    },
    Failure(TraceFailure),
}

impl From<WireEvent> for TraceEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::Call {
                caller_path,
                caller_line,
                callee_path,
                callee_line,
                callee_name,
            } => TraceEvent::Call {
                caller: CodeLocation {
                    path: caller_path,
                    line: caller_line,
                },
                callee: CodeLocation {
                    path: callee_path,
                    line: callee_line,
                },
                callee_name,
            },
            WireEvent::Failure(failure) => TraceEvent::Failure(failure),
        }
    }
}

/// Runs entry points in a local Python interpreter under a profile hook.
/// Not sandboxed, no timeout: the caller vouches for the entry point.
pub struct PythonRunner {
    python: String,
}

impl PythonRunner {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    pub fn from_config() -> Self {
        Self::new(Config::get().python.clone())
    }
}

impl TraceRunner for PythonRunner {
    fn run(
        &self,
        repo_root: &Path,
        entry: &EntryPoint,
        args: &[String],
        observer: &mut dyn TraceObserver,
    ) -> Result<()> {
        let events_path = event_file_path(repo_root);
        crate::util::ensure_parent_dir(&events_path)?;
        let (mode, target) = entry.mode_and_target();

        let output = Command::new(&self.python)
            .arg("-c")
            .arg(BOOTSTRAP)
            .arg(mode)
            .arg(&target)
            .args(args)
            .current_dir(repo_root)
            .env("TTMM_TRACE_OUT", &events_path)
            .env("TTMM_TRACE_ROOT", repo_root)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::TraceLaunch {
                program: self.python.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            tracing::debug!("traced program stdout:\n{}", stdout.trim_end());
        }

        let delivered = deliver_events(&events_path, observer);
        let _ = fs::remove_file(&events_path);
        let saw_failure = delivered?;

        if !output.status.success() && !saw_failure {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            observer.on_event(TraceEvent::Failure(TraceFailure {
                exc_type: "ExitStatus".to_string(),
                message: format!("interpreter exited with {}", output.status),
                traceback: (!tail.is_empty()).then_some(tail),
            }));
        }
        Ok(())
    }
}

fn event_file_path(repo_root: &Path) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    repo_root
        .join(".ttmm")
        .join(format!("trace-{}-{nanos}.jsonl", std::process::id()))
}

/// Feed every event in `path` to `observer`; returns whether a failure was seen.
/// A missing file means the interpreter died before the hook started.
fn deliver_events(path: &Path, observer: &mut dyn TraceObserver) -> Result<bool> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    let mut saw_failure = false;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WireEvent>(&line) {
            Ok(event) => {
                saw_failure |= matches!(event, WireEvent::Failure(_));
                observer.on_event(event.into());
            }
            Err(err) => tracing::warn!("skipping malformed trace event: {err}"),
        }
    }
    Ok(saw_failure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<TraceEvent>);

    impl TraceObserver for Recorder {
        fn on_event(&mut self, event: TraceEvent) {
            self.0.push(event);
        }
    }

    #[test]
    fn decodes_call_and_failure_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"kind": "call", "caller_path": "/r/a.py", "caller_line": 2, "callee_path": "/r/b.py", "callee_line": 1, "callee_name": "g"}"#,
                "\n",
                "not json\n",
                r#"{"kind": "failure", "exc_type": "ValueError", "message": "boom", "traceback": "Traceback..."}"#,
                "\n",
            ),
        )
        .unwrap();

        let mut recorder = Recorder::default();
        let saw_failure = deliver_events(&path, &mut recorder).unwrap();
        assert!(saw_failure);
        assert_eq!(recorder.0.len(), 2);
        assert_eq!(
            recorder.0[0],
            TraceEvent::Call {
                caller: CodeLocation {
                    path: PathBuf::from("/r/a.py"),
                    line: 2
                },
                callee: CodeLocation {
                    path: PathBuf::from("/r/b.py"),
                    line: 1
                },
                callee_name: "g".to_string(),
            }
        );
        assert!(matches!(&recorder.0[1], TraceEvent::Failure(f) if f.exc_type == "ValueError"));
    }

    #[test]
    fn missing_event_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::default();
        assert!(!deliver_events(&dir.path().join("none.jsonl"), &mut recorder).unwrap());
        assert!(recorder.0.is_empty());
    }

    #[test]
    fn missing_interpreter_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = PythonRunner::new("ttmm-no-such-python-interpreter");
        let mut recorder = Recorder::default();
        let result = runner.run(
            dir.path(),
            &EntryPoint::script("main.py"),
            &[],
            &mut recorder,
        );
        assert!(matches!(result, Err(Error::TraceLaunch { .. })));
    }
}
