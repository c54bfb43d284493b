//! Shared fixtures for unit tests.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::cmd::ProcessOutput;
use crate::error::{EngineError, Result};
use crate::runner::{Invocation, ProgramRunner, ProgramSource, PythonRunner};

enum Reply {
    Output(ProcessOutput),
    Timeout { stdout: String, after: Duration },
    SpawnError,
}

/// Runner that never spawns anything and answers with a canned reply.
pub struct FakeRunner {
    reply: Reply,
    calls: AtomicUsize,
    invocations: Mutex<Vec<Invocation>>,
    program_existed: Mutex<Vec<bool>>,
}

impl FakeRunner {
    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            invocations: Mutex::new(Vec::new()),
            program_existed: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(stdout: &str, exit_code: i32) -> Self {
        Self::with_reply(Reply::Output(ProcessOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
        }))
    }

    pub fn failing(stderr: &str, exit_code: i32) -> Self {
        Self::with_reply(Reply::Output(ProcessOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        }))
    }

    pub fn timing_out(stdout: &str, after: Duration) -> Self {
        Self::with_reply(Reply::Timeout {
            stdout: stdout.to_string(),
            after,
        })
    }

    pub fn unspawnable() -> Self {
        Self::with_reply(Reply::SpawnError)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_invocation(&self) -> Option<Invocation> {
        self.invocations.lock().unwrap().last().cloned()
    }

    pub fn last_program_path(&self) -> Option<PathBuf> {
        match self.last_invocation()?.program {
            ProgramSource::File(path) => Some(path),
            ProgramSource::Inline(_) => None,
        }
    }

    /// Whether every file program existed at the moment it was spawned.
    pub fn program_existed_during_call(&self) -> bool {
        self.program_existed.lock().unwrap().iter().all(|e| *e)
    }
}

impl ProgramRunner for FakeRunner {
    fn spawn(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let ProgramSource::File(path) = &invocation.program {
            self.program_existed.lock().unwrap().push(path.exists());
        }
        self.invocations.lock().unwrap().push(invocation.clone());

        match &self.reply {
            Reply::Output(output) => Ok(output.clone()),
            Reply::Timeout { stdout, after } => Err(EngineError::Timeout {
                after: *after,
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            Reply::SpawnError => Err(EngineError::Spawn {
                program: "fake".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            }),
        }
    }
}

/// A real Python 3.9+ interpreter, or `None` when the host has none.
pub fn python_runner() -> Option<PythonRunner> {
    let check = Invocation::inline(
        "import sys\nsys.exit(0 if sys.version_info >= (3, 9) else 1)",
        std::env::temp_dir(),
    );
    let runner = PythonRunner::detect("python3")
        .ok()
        .filter(|runner| runner.run(&check).is_ok());
    if runner.is_none() {
        eprintln!("skipping: no python3 >= 3.9 on PATH");
    }
    runner
}

/// A Python interpreter that can import pytest.
pub fn pytest_runner() -> Option<PythonRunner> {
    let runner = python_runner()?;
    let check = Invocation::inline("import pytest", std::env::temp_dir());
    if runner.run(&check).is_err() {
        eprintln!(
            "skipping: pytest is not importable by {}",
            runner.interpreter().display()
        );
        return None;
    }
    Some(runner)
}
