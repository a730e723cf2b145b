use std::io::{self, Write};

use crate::session::{Mode, Session};

use super::{BuiltinCommand, BuiltinIo, BuiltinOutcome, ControlSignal};

#[derive(Default)]
pub struct StopServer;

impl BuiltinCommand for StopServer {
    fn name(&self) -> &'static str {
        "stop-server"
    }

    fn execute(
        &self,
        _args: &[String],
        io: &mut BuiltinIo,
        session: &mut Session,
    ) -> io::Result<BuiltinOutcome> {
        match session.mode() {
            Mode::Remote => Ok(BuiltinOutcome::Control(ControlSignal::ServerStop)),
            Mode::Local => {
                writeln!(io.err, "stop-server: only available in server mode")?;
                Ok(BuiltinOutcome::Executed(1))
            }
        }
    }
}
