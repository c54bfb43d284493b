//! Subprocess runner seam.
//!
//! Every execute, introspect and test run goes through a [`ProgramRunner`],
//! which spawns exactly one child process per call. Argument blobs travel as
//! process arguments, never through the environment or stdin.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::cmd::{Cmd, ProcessOutput};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramSource {
    /// Full program text, passed to the interpreter inline.
    Inline(String),
    /// A program file on disk.
    File(PathBuf),
}

/// One child process to spawn.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: ProgramSource,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn inline(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self::new(ProgramSource::Inline(program.into()), workdir)
    }

    pub fn file(path: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self::new(ProgramSource::File(path.into()), workdir)
    }

    fn new(program: ProgramSource, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program,
            args: Vec::new(),
            workdir: workdir.into(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }
}

pub trait ProgramRunner: Send + Sync {
    /// Spawn the program and wait for it, returning output whatever the exit code.
    fn spawn(&self, invocation: &Invocation) -> Result<ProcessOutput>;

    /// Spawn the program; a non-zero exit is an execution error carrying stderr.
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        self.spawn(invocation)?.check()
    }
}

/// Runs programs with a CPython interpreter.
#[derive(Debug, Clone)]
pub struct PythonRunner {
    interpreter: PathBuf,
}

impl PythonRunner {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// Resolve an interpreter name (or path) through `PATH`.
    pub fn detect(name: &str) -> Result<Self> {
        let interpreter = which::which(name).map_err(|e| {
            EngineError::Config(format!("Python interpreter '{}' not found: {}", name, e))
        })?;
        debug!(interpreter = %interpreter.display(), "runner:python detected");
        Ok(Self::new(interpreter))
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }
}

impl ProgramRunner for PythonRunner {
    fn spawn(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        let cmd = Cmd::new(self.interpreter.as_os_str());
        let cmd = match &invocation.program {
            ProgramSource::Inline(code) => cmd.arg("-c").arg(code.as_str()),
            ProgramSource::File(path) => cmd.arg(path.as_os_str()),
        };
        cmd.args(invocation.args.as_slice())
            .workdir(&invocation.workdir)
            .timeout(invocation.timeout)
            .output()
    }
}
