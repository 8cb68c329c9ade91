//! External program execution with captured output and a time limit

use std::{
    fmt,
    io::{self, Read},
    path::PathBuf,
    process::{Command, Stdio},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

/// Polling period of a running child
const POLL: Duration = Duration::from_millis(20);
/// How long to wait for the output of a killed child
const GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for {program}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} killed after {timeout:?}")]
    Timeout {
        program: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
}
type Result<T> = std::result::Result<T, RunError>;

/// A program run
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory of the child
    pub cwd: PathBuf,
    pub timeout: Duration,
}
impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        write!(f, " (in {})", self.cwd.display())
    }
}

/// Exit code and captured output of a completed run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    /// `None` if the child was terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}
impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external programs
pub trait ProcessRunner: Send + Sync {
    /// Runs to completion, or kills the child once the invocation timeout is over
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput>;
}

/// Runs programs as OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buffer = vec![];
            if let Err(e) = pipe.read_to_end(&mut buffer) {
                log::debug!("failed to read child output: {e}");
            }
            let _ = tx.send(String::from_utf8_lossy(&buffer).into_owned());
        });
    }
    rx
}

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        let program = invocation.program.clone();
        log::info!("running {invocation}");
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let now = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if now.elapsed() > invocation.timeout => {
                    if let Err(e) = child.kill() {
                        log::warn!("failed to kill {program}: {e}");
                    }
                    let _ = child.wait();
                    return Err(RunError::Timeout {
                        program,
                        timeout: invocation.timeout,
                        stdout: stdout.recv_timeout(GRACE).unwrap_or_default(),
                        stderr: stderr.recv_timeout(GRACE).unwrap_or_default(),
                    });
                }
                Ok(None) => thread::sleep(POLL),
                Err(source) => return Err(RunError::Wait { program, source }),
            }
        };
        // a background grandchild may keep the pipes open after the child exits
        let remaining = invocation.timeout.saturating_sub(now.elapsed()).max(GRACE);
        let deadline = Instant::now() + remaining;
        let collect = |rx: &mpsc::Receiver<String>| {
            match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Err(mpsc::RecvTimeoutError::Disconnected) => Ok(String::new()),
                received => received,
            }
        };
        let (stdout, stderr) = match (collect(&stdout), collect(&stderr)) {
            (Ok(stdout), Ok(stderr)) => (stdout, stderr),
            (stdout, stderr) => {
                log::warn!("{program} exited but its output pipes are still open");
                return Err(RunError::Timeout {
                    program,
                    timeout: invocation.timeout,
                    stdout: stdout.unwrap_or_default(),
                    stderr: stderr.unwrap_or_default(),
                });
            }
        };
        let output = ProcessOutput {
            code: status.code(),
            stdout,
            stderr,
        };
        log::debug!(
            "{program} exited with {:?}\nstdout:\n{}\nstderr:\n{}",
            output.code,
            output.stdout,
            output.stderr
        );
        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn invocation(program: &str, args: &[&str], timeout: Duration) -> Invocation {
        Invocation {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: std::env::temp_dir(),
            timeout,
        }
    }

    #[test]
    fn output_is_captured() {
        let output = SystemRunner
            .run(&invocation(
                "sh",
                &["-c", "echo out; echo err >&2; exit 3"],
                Duration::from_secs(10),
            ))
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[test]
    fn missing_program() {
        let err = SystemRunner
            .run(&invocation(
                "ir-reduce-no-such-program",
                &[],
                Duration::from_secs(1),
            ))
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }

    #[test]
    fn runaway_child_is_killed() {
        let now = Instant::now();
        let err = SystemRunner
            .run(&invocation("sleep", &["30"], Duration::from_millis(200)))
            .unwrap_err();
        assert!(matches!(err, RunError::Timeout { .. }));
        assert!(now.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn lingering_grandchild_does_not_block() {
        let now = Instant::now();
        let err = SystemRunner
            .run(&invocation(
                "sh",
                &["-c", "sleep 6 & echo started"],
                Duration::from_millis(500),
            ))
            .unwrap_err();
        assert!(now.elapsed() < Duration::from_secs(3));
        assert!(matches!(err, RunError::Timeout { .. }));
    }
}
