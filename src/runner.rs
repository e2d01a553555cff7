//! Execution of `VBoxManage` commands.
//!
//! Everything above this module talks to the hypervisor through
//! [`CommandRunner`], so the process backed [`VBoxManage`] can be swapped for
//! [`crate::mock::MockRunner`] in tests.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::utils::system::locate_vboxmanage;

/// Captured result of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }
}

/// Runs one management command to completion.
///
/// Implementations return `Err` only when the command could not be run at
/// all; a command that ran and failed is reported through
/// [`CommandOutput::success`]. No deadline is applied here: callers that need
/// bounded execution impose it inside their runner.
pub trait CommandRunner {
    fn run(&self, args: &[String]) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, args: &[String]) -> Result<CommandOutput> {
        (**self).run(args)
    }
}

/// Runner that spawns the `VBoxManage` binary.
#[derive(Debug, Clone)]
pub struct VBoxManage {
    program: PathBuf,
}

impl VBoxManage {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locate the binary, honouring an explicit override.
    pub fn locate(configured: Option<&Path>) -> Self {
        Self::new(locate_vboxmanage(configured))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl CommandRunner for VBoxManage {
    fn run(&self, args: &[String]) -> Result<CommandOutput> {
        debug!(command = %format!("{} {}", self.program.display(), args.join(" ")), "exec");

        let output = Command::new(&self.program).args(args).output().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::ToolNotFound(self.program.display().to_string())
            } else {
                Error::Spawn(e)
            }
        })?;

        let out = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        };
        trace!(stdout = %out.stdout, stderr = %out.stderr, success = out.success, "exec finished");
        Ok(out)
    }
}
