use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use nix::{
    errno::Errno,
    unistd::{access, getuid, AccessFlags, User},
};

use crate::session::Session;

use super::{BuiltinCommand, BuiltinIo, BuiltinOutcome};

#[derive(Default)]
pub struct Cd;

impl BuiltinCommand for Cd {
    fn name(&self) -> &'static str {
        "cd"
    }

    fn execute(
        &self,
        args: &[String],
        io: &mut BuiltinIo,
        session: &mut Session,
    ) -> io::Result<BuiltinOutcome> {
        trace!("executing cd builtin: {args:?}");

        let target = match args {
            [] => match home_dir() {
                Some(home) => home,
                None => {
                    writeln!(io.err, "cd: cannot determine home directory")?;
                    return Ok(BuiltinOutcome::Executed(1));
                }
            },
            [path] => session.resolve(path),
            _ => {
                writeln!(io.err, "cd: too many arguments")?;
                return Ok(BuiltinOutcome::Executed(1));
            }
        };

        match enter(&target) {
            Ok(dir) => {
                session.set_cwd(dir);
                Ok(BuiltinOutcome::Executed(0))
            }
            Err(err) => {
                debug!("failed to cd: {}", err);
                writeln!(io.err, "cd: {}: {err}", target.display())?;
                Ok(BuiltinOutcome::Executed(err.raw_os_error().unwrap_or(1)))
            }
        }
    }
}

/// Canonicalizes `target` and checks it is a directory we may enter.
fn enter(target: &Path) -> io::Result<PathBuf> {
    let dir = target.canonicalize()?;

    if !dir.is_dir() {
        return Err(Errno::ENOTDIR.into());
    }
    access(&dir, AccessFlags::X_OK)?;

    Ok(dir)
}

fn home_dir() -> Option<PathBuf> {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => Some(home.into()),
        _ => User::from_uid(getuid()).ok().flatten().map(|user| user.dir),
    }
}
