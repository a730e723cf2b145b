use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::OpenOptionsExt,
    path::Path,
    process::{Child, Command as ChildCommand, Stdio},
};

use itertools::Itertools;
use nix::errno::Errno;
use os_pipe::{PipeReader, PipeWriter};
use thiserror::Error;

use crate::{
    builtins::{self, BuiltinOutcome, ControlSignal},
    parse::{Command, CommandList},
    session::Session,
};

use self::{child::StageChild, status::StageStatus, stream::Streams};

pub mod child;
pub mod status;
pub mod stream;

/// A stage exiting with this status ends the session, like `exit`.
pub const EXIT_SENTINEL: i32 = 99;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("built-in commands don't support piping: {name}")]
    BuiltinInPipeline { name: String },
    #[error("failed to create pipe: {0}")]
    Pipe(#[source] io::Error),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare standard streams: {0}")]
    Streams(#[source] io::Error),
}

impl ExecError {
    /// The status recorded for a pipeline that failed this way.
    pub fn code(&self) -> i32 {
        match self {
            Self::BuiltinInPipeline { .. } => 1,
            Self::Pipe(err) | Self::Spawn { source: err, .. } | Self::Streams(err) => {
                err.raw_os_error().unwrap_or(1)
            }
        }
    }
}

/// The result of running one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Status of the last stage, or of the built-in.
    Exited(i32),
    Control(ControlSignal),
}

/// Runs `list` with `streams` at its open ends and records the final status
/// in `session`.
///
/// A sole built-in runs in-process. Otherwise every stage is spawned, wired
/// through anonymous pipes, and waited for before returning.
pub fn run_pipeline(
    list: &CommandList,
    streams: &Streams,
    session: &mut Session,
) -> Result<Outcome, ExecError> {
    if let Some(cmd) = list.sole() {
        match builtins::dispatch(cmd, streams, session) {
            BuiltinOutcome::Executed(code) => return Ok(Outcome::Exited(code)),
            BuiltinOutcome::Control(signal) => return Ok(Outcome::Control(signal)),
            BuiltinOutcome::NotBuiltin => {}
        }
    }

    let result = Executor::new(session.cwd(), streams).run(list.commands());

    match &result {
        Ok(Outcome::Exited(code)) => session.record(*code),
        Ok(Outcome::Control(_)) => {}
        Err(err) => session.record(err.code()),
    }

    result
}

/// Opens a redirection target for writing, truncating unless `append`.
pub(crate) fn open_output(path: &Path, append: bool) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .mode(0o644)
        .open(path)
}

/// Launches one prepared stage.
type Spawner = fn(&mut ChildCommand) -> io::Result<Child>;

/// Whether a launch failure is a lack of process resources rather than a
/// problem with the program itself.
fn is_resource_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error().map(Errno::from_i32),
        Some(Errno::EAGAIN | Errno::ENOMEM | Errno::EMFILE | Errno::ENFILE)
    )
}

/// Spawns and reaps the stages of one pipeline.
///
/// Stages still owned by an executor when it is dropped, which only happens
/// on an error path, are terminated and reaped.
struct Executor<'a> {
    cwd: &'a Path,
    streams: &'a Streams,
    spawner: Spawner,
    children: Vec<StageChild>,
}

impl<'a> Executor<'a> {
    fn new(cwd: &'a Path, streams: &'a Streams) -> Self {
        Self::with_spawner(cwd, streams, ChildCommand::spawn)
    }

    fn with_spawner(cwd: &'a Path, streams: &'a Streams, spawner: Spawner) -> Self {
        Self {
            cwd,
            streams,
            spawner,
            children: Vec::new(),
        }
    }

    fn run(&mut self, commands: &[Command]) -> Result<Outcome, ExecError> {
        if let Some(cmd) = commands.iter().find(|cmd| builtins::is_builtin(cmd.program())) {
            return Err(ExecError::BuiltinInPipeline {
                name: cmd.program().to_owned(),
            });
        }

        let (readers, writers): (Vec<PipeReader>, Vec<PipeWriter>) = (1..commands.len())
            .map(|_| os_pipe::pipe())
            .collect::<io::Result<Vec<_>>>()
            .map_err(ExecError::Pipe)?
            .into_iter()
            .unzip();

        // each end moves into exactly one stage and is closed in this process
        // once that stage is spawned; leftovers close when these drop
        let mut readers = readers.into_iter();
        let mut writers = writers.into_iter();
        let last = commands.len() - 1;

        for (i, cmd) in commands.iter().enumerate() {
            let stdin = match i {
                0 => self.streams.input.stdio().map_err(ExecError::Streams)?,
                _ => readers.next().map(Stdio::from).unwrap_or_else(Stdio::null),
            };
            let stdout = if i == last {
                self.streams.output.stdio().map_err(ExecError::Streams)?
            } else {
                writers.next().map(Stdio::from).unwrap_or_else(Stdio::null)
            };

            let child = self.spawn_stage(cmd, stdin, stdout)?;
            self.children.push(child);
        }

        let statuses = self.wait_for_children();

        if statuses.iter().any(|status| status.code() == EXIT_SENTINEL) {
            return Ok(Outcome::Control(ControlSignal::SessionEnd));
        }

        Ok(Outcome::Exited(
            statuses.last().map(StageStatus::code).unwrap_or_default(),
        ))
    }

    /// Spawns one stage. Problems confined to the stage (missing program,
    /// unreadable redirection) are reported on the error stream and yield a
    /// failed stage so the rest of the pipeline still drains.
    fn spawn_stage(
        &self,
        cmd: &Command,
        stdin: Stdio,
        stdout: Stdio,
    ) -> Result<StageChild, ExecError> {
        let stdin = match &cmd.input {
            Some(path) => match File::open(self.cwd.join(path)) {
                Ok(file) => Stdio::from(file),
                Err(err) => return Ok(self.failed_stage(path, &err, 1)),
            },
            None => stdin,
        };
        let stdout = match &cmd.output {
            Some(path) => match open_output(&self.cwd.join(path), cmd.append) {
                Ok(file) => Stdio::from(file),
                Err(err) => return Ok(self.failed_stage(path, &err, 1)),
            },
            None => stdout,
        };
        let stderr = self.streams.error.stdio().map_err(ExecError::Streams)?;

        let mut child = ChildCommand::new(cmd.program());
        child
            .args(cmd.args())
            .current_dir(self.cwd)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr);

        trace!("spawning command: {}", cmd.argv.iter().join(" "));

        match (self.spawner)(&mut child) {
            Ok(child) => {
                debug!(pid = child.id(), program = cmd.program(), "spawned stage");
                Ok(child.into())
            }
            Err(err) if !is_resource_exhaustion(&err) => {
                let code = err.raw_os_error().unwrap_or(1);
                Ok(self.failed_stage(cmd.program(), &err, code))
            }
            Err(source) => {
                error!(program = cmd.program(), "spawn failed: {source}");
                Err(ExecError::Spawn {
                    program: cmd.program().to_owned(),
                    source,
                })
            }
        }
    }

    fn failed_stage(&self, subject: &str, err: &io::Error, code: i32) -> StageChild {
        debug!("stage failed before running: {subject}: {err}");
        self.streams.report(format_args!("{subject}: {err}"));
        StageChild::Failed(code)
    }

    /// Waits for every stage in spawn order.
    fn wait_for_children(&mut self) -> Vec<StageStatus> {
        std::mem::take(&mut self.children)
            .into_iter()
            .map(|mut child| {
                child.wait().unwrap_or_else(|err| {
                    warn!(pid = child.id(), "failed to wait for stage: {err}");
                    StageStatus::Failed(err.raw_os_error().unwrap_or(-1))
                })
            })
            .collect()
    }

    /// Terminates and reaps every stage still running.
    fn kill_children(&mut self) -> Vec<StageStatus> {
        for child in self.children.iter_mut() {
            if let Err(err) = child.terminate() {
                warn!(pid = child.id(), "failed to terminate stage: {err}");
            }
        }
        self.wait_for_children()
    }
}

impl Drop for Executor<'_> {
    fn drop(&mut self) {
        if !self.children.is_empty() {
            debug!("rolling back {} spawned stages", self.children.len());
            self.kill_children();
        }
    }
}
