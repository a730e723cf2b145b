use std::io::{self, Write};

use crate::session::Session;

use super::{BuiltinCommand, BuiltinIo, BuiltinOutcome};

/// Prints the status of the previous command.
#[derive(Default)]
pub struct Rc;

impl BuiltinCommand for Rc {
    fn name(&self) -> &'static str {
        "rc"
    }

    fn execute(
        &self,
        _args: &[String],
        io: &mut BuiltinIo,
        session: &mut Session,
    ) -> io::Result<BuiltinOutcome> {
        let code = session.last_exit();
        writeln!(io.out, "{code}")?;

        // rc reports the status without replacing it
        Ok(BuiltinOutcome::Executed(code))
    }
}
