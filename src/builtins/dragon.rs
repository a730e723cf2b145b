use std::io::{self, Write};

use crate::session::Session;

use super::{BuiltinCommand, BuiltinIo, BuiltinOutcome};

pub const BANNER: &str = r#"
                 __====-_  _-====__
           _--^^^#####//      \\#####^^^--_
        _-^##########// (    ) \\##########^-_
       -############//  |\^^/|  \\############-
     _/############//   (@::@)   \\############\_
    /#############((     \\//     ))#############\
   -###############\\    (oo)    //###############-
  -#################\\  / VV \  //#################-
 -###################\\/      \//###################-
"#;

#[derive(Default)]
pub struct Dragon;

impl BuiltinCommand for Dragon {
    fn name(&self) -> &'static str {
        "dragon"
    }

    fn execute(
        &self,
        _args: &[String],
        io: &mut BuiltinIo,
        _session: &mut Session,
    ) -> io::Result<BuiltinOutcome> {
        io.out.write_all(BANNER.as_bytes())?;
        Ok(BuiltinOutcome::Executed(0))
    }
}
