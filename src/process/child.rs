use std::{io, process::Child};

use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};

use super::status::StageStatus;

/// The handle of one spawned pipeline stage.
#[derive(Debug)]
pub enum StageChild {
    Process(Child),
    /// Stand-in for a stage that failed before its program could run.
    Failed(i32),
}

impl From<Child> for StageChild {
    fn from(value: Child) -> Self {
        Self::Process(value)
    }
}

impl StageChild {
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Process(process) => Some(process.id()),
            Self::Failed(_) => None,
        }
    }

    /// Blocks until the stage terminates.
    pub fn wait(&mut self) -> io::Result<StageStatus> {
        match self {
            Self::Process(process) => process.wait().map(Into::into),
            Self::Failed(code) => Ok(StageStatus::Failed(*code)),
        }
    }

    /// Asks the stage to terminate without waiting for it.
    pub fn terminate(&mut self) -> io::Result<()> {
        match self {
            Self::Process(process) => {
                // it may already have been reaped
                if process.try_wait()?.is_some() {
                    return Ok(());
                }
                let pid = Pid::from_raw(process.id() as i32);
                kill(pid, Signal::SIGTERM).map_err(io::Error::from)
            }
            Self::Failed(_) => Ok(()),
        }
    }
}
