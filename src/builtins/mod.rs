use std::{
    fs::File,
    io::{self, Write},
};

use enum_dispatch::enum_dispatch;
use strum::{EnumIter, IntoEnumIterator};

use crate::{
    parse::Command,
    process::{open_output, stream::Streams},
    session::Session,
};

pub mod cd;
pub mod dragon;
pub mod exit;
pub mod rc;
pub mod stop_server;

/// A request from a built-in that the caller has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// End the local loop or close this client's connection.
    SessionEnd,
    /// Shut the whole server down after replying.
    ServerStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOutcome {
    /// Ran in-process with the given status.
    Executed(i32),
    Control(ControlSignal),
    /// Not a built-in: the caller has to spawn it.
    NotBuiltin,
}

/// The streams a built-in writes to.
pub struct BuiltinIo {
    pub out: Box<dyn Write>,
    pub err: Box<dyn Write>,
}

#[enum_dispatch(BuiltinCommands)]
pub trait BuiltinCommand {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        args: &[String],
        io: &mut BuiltinIo,
        session: &mut Session,
    ) -> io::Result<BuiltinOutcome>;
}

#[enum_dispatch]
#[derive(EnumIter)]
pub enum BuiltinCommands {
    Exit(exit::Exit),
    Cd(cd::Cd),
    Rc(rc::Rc),
    StopServer(stop_server::StopServer),
    Dragon(dragon::Dragon),
}

impl BuiltinCommands {
    pub fn from_name(name: &str) -> Option<Self> {
        Self::iter().find(|cmd| cmd.name() == name)
    }
}

pub fn is_builtin(name: &str) -> bool {
    BuiltinCommands::from_name(name).is_some()
}

/// Runs `cmd` in-process if it names a built-in, recording its status in the
/// session. Redirections replace the session streams for the duration of the
/// call.
pub fn dispatch(cmd: &Command, streams: &Streams, session: &mut Session) -> BuiltinOutcome {
    let Some(builtin) = BuiltinCommands::from_name(cmd.program()) else {
        return BuiltinOutcome::NotBuiltin;
    };

    trace!("executing builtin: {:?}", cmd.argv);

    let outcome = match run_redirected(&builtin, cmd, streams, session) {
        Ok(outcome) => outcome,
        Err(err) => {
            streams.report(format_args!("{}: {err}", builtin.name()));
            BuiltinOutcome::Executed(err.raw_os_error().unwrap_or(1))
        }
    };

    if let BuiltinOutcome::Executed(code) = outcome {
        session.record(code);
    }

    outcome
}

fn run_redirected(
    builtin: &BuiltinCommands,
    cmd: &Command,
    streams: &Streams,
    session: &mut Session,
) -> io::Result<BuiltinOutcome> {
    if let Some(path) = &cmd.input {
        // nothing built in reads stdin, but a missing file is still an error
        if let Err(err) = File::open(session.resolve(path)) {
            streams.report(format_args!("{path}: {err}"));
            return Ok(BuiltinOutcome::Executed(err.raw_os_error().unwrap_or(1)));
        }
    }

    let out: Box<dyn Write> = match &cmd.output {
        Some(path) => match open_output(&session.resolve(path), cmd.append) {
            Ok(file) => Box::new(file),
            Err(err) => {
                streams.report(format_args!("{path}: {err}"));
                return Ok(BuiltinOutcome::Executed(err.raw_os_error().unwrap_or(1)));
            }
        },
        None => streams.output_writer()?,
    };

    let mut io = BuiltinIo {
        out,
        err: streams.error_writer()?,
    };

    let outcome = builtin.execute(cmd.args(), &mut io, session)?;
    io.out.flush()?;
    io.err.flush()?;

    Ok(outcome)
}
