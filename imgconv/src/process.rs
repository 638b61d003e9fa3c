//! Converter process management
//!
//! A converter reads the image on stdin, writes the result on stdout and
//! complains on stderr. All three pipes have small kernel buffers, so
//! writing stdin while only waiting on the child (or reading stdout while
//! stderr fills up) deadlocks. Each pipe therefore gets its own scoped
//! thread, and the calling thread only waits for the child, killing it
//! once the timeout passes. The scope joins every thread before
//! returning, on success and failure alike, so no pipe or buffer outlives
//! the call.
//!
//! Grandchildren that inherit the pipes and survive a kill keep the
//! drain threads alive until they exit.

use crate::config::{ConvertOptions, DiagnosticsPolicy};
use crate::error::ConvertError;
use crate::logging::log_external_tool;
use crate::tools::Invocation;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Variables removed from the child's environment. A process started from
/// a self-contained bundle (an AppImage, for one) points the loader at its
/// own libraries, which break system converters.
pub const SCRUBBED_ENV_VARS: &[&str] = &["LD_LIBRARY_PATH"];

const FEED_CHUNK: usize = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What a finished converter left behind.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    /// The error this run amounts to under `policy`, if any.
    pub fn failure(&self, program: &Path, policy: DiagnosticsPolicy) -> Option<ConvertError> {
        let complained = !self.stderr.trim().is_empty();
        let failed = match policy {
            DiagnosticsPolicy::Strict => !self.status.success() || complained,
            DiagnosticsPolicy::ExitStatus => !self.status.success(),
        };

        if failed {
            Some(ConvertError::subprocess(
                program.to_path_buf(),
                self.status,
                &self.stderr,
            ))
        } else {
            if complained {
                warn!(program = ?program, stderr = %self.stderr, "Converter succeeded with diagnostics");
            }
            None
        }
    }
}

/// Result of one run plus the input bytes it consumed.
///
/// `fed` holds every byte read from the live input when retention is on,
/// even when the run failed, so the caller's stream can be reassembled.
/// The already-buffered prefix is never copied into it.
pub struct ConverterRun {
    pub fed: Vec<u8>,
    pub outcome: Result<ProcessOutput, ConvertError>,
}

/// Run `invocation`, streaming `prefix` and then `input` into its stdin.
pub fn run_converter<R: Read + Send>(
    invocation: &Invocation,
    prefix: &[u8],
    input: &mut R,
    options: &ConvertOptions,
) -> ConverterRun {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for var in SCRUBBED_ENV_VARS {
        cmd.env_remove(var);
    }

    info!(
        program = ?invocation.program,
        args = ?invocation.args,
        "Executing converter"
    );

    let start = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            error!(program = ?invocation.program, error = %source, "Failed to launch converter");
            return ConverterRun {
                fed: Vec::new(),
                outcome: Err(ConvertError::Spawn {
                    program: invocation.program.clone(),
                    source,
                }),
            };
        }
    };

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let retain = options.retain_input;

    let (waited, (fed, feed_error), stdout, stderr) = thread::scope(|scope| {
        let feeder = scope.spawn(move || feed(prefix, input, stdin, retain));
        let stdout_thread = scope.spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut out) = stdout {
                let _ = out.read_to_end(&mut buf);
            }
            buf
        });
        let stderr_thread = scope.spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut err) = stderr {
                let _ = err.read_to_end(&mut buf);
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let waited = wait_bounded(&mut child, options.timeout);

        let fed = feeder.join().unwrap_or_else(|_| {
            (
                Vec::new(),
                Some(io::Error::other("input feeder panicked")),
            )
        });
        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();
        (waited, fed, stdout, stderr)
    });

    let duration = start.elapsed();
    let program = invocation.program.clone();

    let outcome = match waited {
        Err(e) => Err(ConvertError::Io(e)),
        Ok(None) => {
            let after = options.timeout.unwrap_or_default();
            error!(program = ?program, timeout = ?after, stderr = %stderr, "Converter timed out and was killed");
            Err(ConvertError::Timeout { program, after })
        }
        Ok(Some(status)) => {
            log_external_tool(&program, &invocation.args, &stderr, status.code(), duration);
            match feed_error {
                Some(e) if e.kind() != io::ErrorKind::BrokenPipe => {
                    error!(program = ?program, error = %e, "Failed to stream input to converter");
                    Err(ConvertError::Io(e))
                }
                _ => Ok(ProcessOutput {
                    status,
                    stdout,
                    stderr,
                    duration,
                }),
            }
        }
    };

    ConverterRun { fed, outcome }
}

/// Write `prefix`, then copy `input` into the child's stdin, closing it at
/// EOF. Returns the bytes read from `input` (when retained) and the first
/// error hit.
fn feed<R: Read>(
    prefix: &[u8],
    input: &mut R,
    stdin: Option<ChildStdin>,
    retain: bool,
) -> (Vec<u8>, Option<io::Error>) {
    let mut fed = Vec::new();
    let Some(mut stdin) = stdin else {
        return (fed, None);
    };
    if let Err(e) = stdin.write_all(prefix) {
        return (fed, Some(e));
    }

    let mut chunk = vec![0u8; FEED_CHUNK];
    loop {
        let n = match input.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return (fed, Some(e)),
        };
        if retain {
            fed.extend_from_slice(&chunk[..n]);
        }
        if let Err(e) = stdin.write_all(&chunk[..n]) {
            return (fed, Some(e));
        }
    }

    (fed, None)
}

/// `Ok(None)` means the timeout passed and the child was killed.
fn wait_bounded(child: &mut Child, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let Some(limit) = timeout else {
        return child.wait().map(Some);
    };

    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            // It may have exited between try_wait and kill; either way reap it.
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn sh(script: &str) -> Invocation {
        Invocation {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[test]
    fn test_streams_through_cat() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        let mut input = Cursor::new(data.clone());
        let run = run_converter(&sh("cat"), &[], &mut input, &ConvertOptions::default());

        let out = run.outcome.unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout, data);
        assert!(out.stderr.is_empty());
        assert_eq!(run.fed, data);
    }

    #[test]
    fn test_prefix_is_fed_but_not_retained() {
        let prefix = vec![b'p'; 100_000];
        let rest = vec![b'r'; 100_000];
        let run = run_converter(
            &sh("cat"),
            &prefix,
            &mut Cursor::new(rest.clone()),
            &ConvertOptions::default(),
        );

        let out = run.outcome.unwrap();
        assert_eq!(out.stdout.len(), prefix.len() + rest.len());
        assert_eq!(&out.stdout[..prefix.len()], &prefix[..]);
        assert_eq!(&out.stdout[prefix.len()..], &rest[..]);
        assert_eq!(run.fed, rest);
    }

    #[test]
    fn test_heavy_stderr_does_not_deadlock() {
        // Far more stderr than a pipe buffer holds, while stdin is still being fed.
        let script = "i=0; while [ $i -lt 4000 ]; do echo 'warning: noisy converter output line' >&2; i=$((i+1)); done; cat";
        let data = vec![7u8; 256 * 1024];
        let run = run_converter(&sh(script), &[], &mut Cursor::new(data.clone()), &ConvertOptions::default());

        let out = run.outcome.unwrap();
        assert_eq!(out.stdout.len(), data.len());
        assert!(out.stderr.lines().count() >= 4000);
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let run = run_converter(
            &sh("cat >/dev/null; echo 'bad input' >&2; exit 3"),
            &[],
            &mut Cursor::new(b"payload".to_vec()),
            &ConvertOptions::default(),
        );
        let out = run.outcome.unwrap();
        assert_eq!(out.status.code(), Some(3));
        let err = out.failure(Path::new("/bin/sh"), DiagnosticsPolicy::Strict).unwrap();
        assert!(err.to_string().contains("bad input"));
        assert!(out.failure(Path::new("/bin/sh"), DiagnosticsPolicy::ExitStatus).is_some());
    }

    #[test]
    fn test_stderr_policy() {
        let run = run_converter(
            &sh("cat; echo 'warning: ignored profile' >&2"),
            &[],
            &mut Cursor::new(b"x".to_vec()),
            &ConvertOptions::default(),
        );
        let out = run.outcome.unwrap();
        assert!(out.status.success());
        assert!(out.failure(Path::new("sh"), DiagnosticsPolicy::Strict).is_some());
        assert!(out.failure(Path::new("sh"), DiagnosticsPolicy::ExitStatus).is_none());
    }

    #[test]
    fn test_early_exit_keeps_fed_bytes() {
        // The child never reads; the feeder hits a broken pipe.
        let data = vec![1u8; 2 * 1024 * 1024];
        let mut input = Cursor::new(data);
        let run = run_converter(&sh("exit 0"), &[], &mut input, &ConvertOptions::default());

        assert!(run.outcome.is_ok());
        let consumed = input.position() as usize;
        assert_eq!(run.fed.len(), consumed);
    }

    #[test]
    fn test_no_retention() {
        let run = run_converter(
            &sh("cat"),
            &[],
            &mut Cursor::new(b"abc".to_vec()),
            &ConvertOptions::default().with_retain_input(false),
        );
        assert!(run.fed.is_empty());
        assert_eq!(run.outcome.unwrap().stdout, b"abc");
    }

    #[test]
    fn test_timeout_kills_child() {
        let start = Instant::now();
        let run = run_converter(
            &sh("exec sleep 30"),
            &[],
            &mut Cursor::new(Vec::new()),
            &ConvertOptions::default().with_timeout(Some(Duration::from_millis(200))),
        );
        assert!(matches!(run.outcome, Err(ConvertError::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program() {
        let inv = Invocation {
            program: PathBuf::from("/nonexistent/imgconv-test-tool"),
            args: vec![],
        };
        let run = run_converter(&inv, &[], &mut Cursor::new(b"x".to_vec()), &ConvertOptions::default());
        assert!(matches!(run.outcome, Err(ConvertError::Spawn { .. })));
        assert!(run.fed.is_empty());
    }

    #[test]
    fn test_library_path_is_scrubbed() {
        std::env::set_var("LD_LIBRARY_PATH", "/opt/bundle/lib");
        let run = run_converter(
            &sh("printf '%s' \"${LD_LIBRARY_PATH-unset}\""),
            &[],
            &mut Cursor::new(Vec::new()),
            &ConvertOptions::default(),
        );
        assert_eq!(run.outcome.unwrap().stdout, b"unset");
    }
}
