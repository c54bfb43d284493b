use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

use crate::error::{EngineError, Result};

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code, or -1 when the process was terminated by a signal.
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into an execution error carrying stderr.
    pub fn check(self) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            Err(EngineError::execution(format!(
                "process exited with code {}",
                self.exit_code
            )))
        } else {
            Err(EngineError::execution(stderr))
        }
    }
}

/// A builder for spawning one isolated child process and capturing its output
pub struct Cmd<'a> {
    program: &'a OsStr,
    args: Vec<&'a OsStr>,
    workdir: Option<&'a Path>,
    timeout: Option<Duration>,
}

impl<'a> Cmd<'a> {
    pub fn new<S: AsRef<OsStr> + ?Sized>(program: &'a S) -> Self {
        Self {
            program: program.as_ref(),
            args: Vec::new(),
            workdir: None,
            timeout: None,
        }
    }

    pub fn arg<S: AsRef<OsStr> + ?Sized>(mut self, arg: &'a S) -> Self {
        self.args.push(arg.as_ref());
        self
    }

    pub fn args<S: AsRef<OsStr>>(mut self, args: &'a [S]) -> Self {
        self.args.extend(args.iter().map(AsRef::as_ref));
        self
    }

    pub fn workdir(mut self, path: &'a Path) -> Self {
        self.workdir = Some(path);
        self
    }

    /// Kill the process (and its process group on Unix) after `limit`.
    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// Execute the command and return its output, whatever the exit code.
    pub fn output(self) -> Result<ProcessOutput> {
        let Cmd {
            program,
            args,
            workdir,
            timeout,
        } = self;
        let program_display = program.to_string_lossy().into_owned();
        let workdir_display = workdir.map(|p| p.display().to_string());

        trace!(
            program = %program_display,
            argc = args.len(),
            workdir = ?workdir_display,
            timeout = ?timeout,
            "cmd:spawn start"
        );

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| EngineError::Spawn {
            program: program_display.clone(),
            source,
        })?;

        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let status = match timeout {
            Some(limit) => match child
                .wait_timeout(limit)
                .map_err(|e| EngineError::io("Failed to wait for process", e))?
            {
                Some(status) => status,
                None => {
                    kill_process_tree(&mut child);
                    let _ = child.wait();
                    let stdout = collect(stdout_reader);
                    let stderr = collect(stderr_reader);
                    warn!(
                        program = %program_display,
                        after = ?limit,
                        "cmd:spawn timeout, process group killed"
                    );
                    return Err(EngineError::Timeout {
                        after: limit,
                        stdout,
                        stderr,
                    });
                }
            },
            None => child
                .wait()
                .map_err(|e| EngineError::io("Failed to wait for process", e))?,
        };

        // Background children would keep the pipes open past the exit.
        kill_leftover_group(&child);

        let output = ProcessOutput {
            stdout: collect(stdout_reader),
            stderr: collect(stderr_reader),
            exit_code: status.code().unwrap_or(-1),
        };

        if output.success() {
            trace!(program = %program_display, "cmd:spawn success");
        } else {
            debug!(
                program = %program_display,
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "cmd:spawn failure"
            );
        }
        Ok(output)
    }

    /// Execute the command; a non-zero exit becomes an execution error.
    pub fn run(self) -> Result<ProcessOutput> {
        self.output()?.check()
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    handle
        .join()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    // The child leads its own group, so its pid is the group id.
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        debug!(error = %e, "cmd:killpg failed, killing child only");
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(unix)]
fn kill_leftover_group(child: &Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = child.id(), "cmd:killed leftover group members"),
        Err(Errno::ESRCH) => {}
        Err(e) => debug!(error = %e, "cmd:killpg of leftover group failed"),
    }
}

#[cfg(not(unix))]
fn kill_leftover_group(_child: &Child) {}
