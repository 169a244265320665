use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::SandboxError;

/// What a supervised child did before it exited or was killed.
#[derive(Debug)]
pub struct Supervised {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
    /// Stdout went past the capture limit and was cut short.
    pub stdout_truncated: bool,
}

impl Supervised {
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    pub fn signal(&self) -> Option<i32> {
        self.status.and_then(|s| s.signal())
    }
}

/// Run `command` to completion or until `deadline` passes.
///
/// The child gets its own process group. Whatever is left in that group is
/// killed as soon as the child exits or the deadline passes, so background
/// processes never outlive the run. `stdin` is written in full and then
/// closed. Each output stream is captured up to `max_output` bytes; the
/// remainder is drained and dropped so the child never blocks on a full pipe.
/// The child is always reaped.
pub async fn supervise(
    mut command: Command,
    stdin: &str,
    deadline: Duration,
    max_output: usize,
) -> Result<Supervised, SandboxError> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|e| SandboxError::Launch(e.to_string()))?;
    let pid = child.id();

    let stdin_pipe = child.stdin.take();
    let input = stdin.as_bytes().to_vec();
    let writer = async move {
        if let Some(mut pipe) = stdin_pipe {
            // The program may exit without reading its input.
            if let Err(e) = pipe.write_all(&input).await {
                debug!(error = %e, "stdin closed early");
            }
        }
    };
    let stdout = read_capped(child.stdout.take(), max_output);
    let stderr = read_capped(child.stderr.take(), max_output);
    let reaper = async {
        let status = child.wait().await;
        // Leftover group members may still hold the output pipes open.
        if let Some(pid) = pid {
            kill_group(pid);
        }
        status
    };

    let finished = tokio::time::timeout(deadline, async {
        tokio::join!(writer, stdout, stderr, reaper)
    })
    .await;

    match finished {
        Ok(((), (stdout, stdout_truncated), (stderr, _), status)) => Ok(Supervised {
            status: Some(status?),
            stdout,
            stderr,
            elapsed: started.elapsed(),
            timed_out: false,
            stdout_truncated,
        }),
        Err(_) => {
            if let Some(pid) = pid {
                kill_group(pid);
            }
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to reap timed out child");
            }
            Ok(Supervised {
                status: None,
                stdout: String::new(),
                stderr: String::new(),
                elapsed: deadline,
                timed_out: true,
                stdout_truncated: false,
            })
        }
    }
}

/// SIGKILL every process in the group led by `pid`.
pub fn kill_group(pid: u32) {
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the group is already gone.
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, error = %err, "killpg failed");
        }
    }
}

/// Read a stream to its end, keeping at most `limit` bytes. The flag tells
/// whether anything was dropped.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> (String, bool) {
    let Some(mut reader) = reader else {
        return (String::new(), false);
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                truncated |= n > room;
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    (String::from_utf8_lossy(&kept).into_owned(), truncated)
}

/// Whether `pid` names a live process. Zombies count as gone.
#[cfg(test)]
pub(crate) fn process_alive(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    let state = stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next());
    !matches!(state, None | Some('Z') | Some('X'))
}

/// Poll until `pid` is gone, for at most two seconds.
#[cfg(test)]
pub(crate) async fn wait_gone(pid: u32) -> bool {
    for _ in 0..100 {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
