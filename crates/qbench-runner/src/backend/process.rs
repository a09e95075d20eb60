use anyhow::{anyhow, Result};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct CompletedProcess {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum ProcessOutcome {
    Completed(CompletedProcess),
    /// The child's process group was killed at the deadline.
    TimedOut { elapsed: Duration },
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs `cmd` to completion or until `budget` elapses, whichever comes first.
///
/// The child leads its own process group, so engines started by a wrapper
/// script die with it. Output still held open by a descendant after the child
/// exits counts against the same budget.
pub fn run_with_timeout(mut cmd: Command, budget: Duration) -> Result<ProcessOutcome> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let started = Instant::now();
    // An unrepresentable deadline means the budget never runs out.
    let deadline = started.checked_add(budget);
    let mut child = cmd
        .spawn()
        .map_err(|e| anyhow!("failed to spawn {}: {}", cmd.get_program().to_string_lossy(), e))?;
    let (tx, rx) = mpsc::channel();
    spawn_reader(Stream::Stdout, child.stdout.take(), tx.clone());
    spawn_reader(Stream::Stderr, child.stderr.take(), tx);

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        let remaining = remaining(deadline);
        if remaining.is_zero() {
            kill_process_group(&mut child);
            return Ok(ProcessOutcome::TimedOut {
                elapsed: started.elapsed(),
            });
        }
        thread::sleep(POLL_INTERVAL.min(remaining));
    };
    let elapsed = started.elapsed();

    let mut stdout = None;
    let mut stderr = None;
    while stdout.is_none() || stderr.is_none() {
        match rx.recv_timeout(remaining(deadline)) {
            Ok((Stream::Stdout, text)) => stdout = Some(text),
            Ok((Stream::Stderr, text)) => stderr = Some(text),
            Err(RecvTimeoutError::Timeout) => {
                kill_process_group(&mut child);
                return Ok(ProcessOutcome::TimedOut {
                    elapsed: started.elapsed(),
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread exited without reporting"));
            }
        }
    }
    Ok(ProcessOutcome::Completed(CompletedProcess {
        status,
        stdout: stdout.unwrap_or_default(),
        stderr: stderr.unwrap_or_default(),
        elapsed,
    }))
}

fn remaining(deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => Duration::MAX,
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: Stream,
    source: Option<R>,
    tx: Sender<(Stream, String)>,
) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buf);
        }
        // The receiver is gone once the budget ran out.
        let _ = tx.send((stream, String::from_utf8_lossy(&buf).into_owned()));
    });
}

/// Kills every process in the child's group, then reaps the child.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        // The group id equals the child's pid; the child is not reaped yet or
        // still a zombie, so the id cannot have been reused.
        let _ = Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{}", child.id()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
    let _ = child.wait();
}
