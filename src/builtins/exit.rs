use std::io;

use crate::session::Session;

use super::{BuiltinCommand, BuiltinIo, BuiltinOutcome, ControlSignal};

#[derive(Default)]
pub struct Exit;

impl BuiltinCommand for Exit {
    fn name(&self) -> &'static str {
        "exit"
    }

    fn execute(
        &self,
        _args: &[String],
        _io: &mut BuiltinIo,
        _session: &mut Session,
    ) -> io::Result<BuiltinOutcome> {
        Ok(BuiltinOutcome::Control(ControlSignal::SessionEnd))
    }
}
