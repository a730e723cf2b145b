//! Per-session execution context.

use std::{
    io,
    path::{Path, PathBuf},
};

/// Where a session's commands come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Local,
    Remote,
}

/// State owned by one local loop or one remote connection.
///
/// Built-ins and pipelines read and update it explicitly, so concurrent
/// connections never see each other's exit codes or working directories.
#[derive(Debug, Clone)]
pub struct Session {
    mode: Mode,
    last_exit: i32,
    cwd: PathBuf,
}

impl Session {
    pub fn new(mode: Mode, cwd: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            last_exit: 0,
            cwd: cwd.into(),
        }
    }

    /// A session rooted at the process working directory.
    pub fn current(mode: Mode) -> io::Result<Self> {
        Ok(Self::new(mode, std::env::current_dir()?))
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn last_exit(&self) -> i32 {
        self.last_exit
    }

    pub fn record(&mut self, code: i32) {
        self.last_exit = code;
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn set_cwd(&mut self, cwd: PathBuf) {
        debug!(from = ?self.cwd, to = ?cwd, "changing directory");
        self.cwd = cwd;
    }

    /// Resolves `path` against the session working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.cwd.join(path)
    }
}
