use std::{os::unix::process::ExitStatusExt, process::ExitStatus};

/// How one pipeline stage finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Process(ExitStatus),
    /// The stage never ran: its program or a redirection could not be opened.
    Failed(i32),
}

impl From<ExitStatus> for StageStatus {
    fn from(value: ExitStatus) -> Self {
        Self::Process(value)
    }
}

impl StageStatus {
    /// The exit code, with death by signal reported as `128 + signal`.
    pub fn code(&self) -> i32 {
        match self {
            Self::Process(status) => status
                .code()
                .or_else(|| status.signal().map(|signal| 128 + signal))
                .unwrap_or(-1),
            Self::Failed(code) => *code,
        }
    }

    pub fn success(&self) -> bool {
        self.code() == 0
    }
}
