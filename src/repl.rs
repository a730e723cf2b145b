use std::io::{self, BufRead, Write};

use crate::{
    builtins::ControlSignal,
    parse::parse_line,
    process::{run_pipeline, stream::Streams, Outcome},
    remote::EXIT_ACK,
    session::Session,
};

pub const PROMPT: &str = "dsh> ";

/// Reads command lines from `input` and runs them until end of input or
/// until the session is ended.
///
/// Prompts and parse warnings go to `output`; pipelines run against
/// `streams`.
pub fn run(
    mut input: impl BufRead,
    mut output: impl Write,
    streams: &Streams,
    session: &mut Session,
) -> io::Result<()> {
    let mut line = String::new();

    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            return Ok(());
        }

        let command = line.trim_end_matches(|c| c == '\n' || c == '\r');
        if command == "exit" {
            write!(output, "{EXIT_ACK}")?;
            return Ok(());
        }

        let list = match parse_line(command) {
            Ok(list) => list,
            Err(err) => {
                writeln!(output, "{err}")?;
                continue;
            }
        };

        match run_pipeline(&list, streams, session) {
            Ok(Outcome::Exited(code)) => trace!(code, "pipeline finished"),
            Ok(Outcome::Control(ControlSignal::SessionEnd)) => {
                write!(output, "{EXIT_ACK}")?;
                return Ok(());
            }
            Ok(Outcome::Control(ControlSignal::ServerStop)) => {
                debug!("ignoring server stop outside server mode");
            }
            Err(err) => {
                warn!("pipeline failed: {err}");
                streams.report(&err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        builtins::tests::{captured, contents},
        session::Mode,
    };

    fn run_script(script: &str, session: &mut Session) -> (String, String) {
        let (streams, mut file) = captured();
        let mut output = Vec::new();
        run(Cursor::new(script), &mut output, &streams, session).unwrap();
        drop(streams);
        (String::from_utf8(output).unwrap(), contents(&mut file))
    }

    #[test]
    fn runs_lines_until_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Mode::Local, dir.path());

        let (prompts, commands) = run_script("echo one\nrc\nexit\necho never\n", &mut session);
        assert_eq!(prompts, "dsh> dsh> dsh> exiting...\n");
        assert_eq!(commands, "one\n0\n");
    }

    #[test]
    fn end_of_input_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Mode::Local, dir.path());

        let (prompts, commands) = run_script("printf x", &mut session);
        assert_eq!(prompts, "dsh> dsh> \n");
        assert_eq!(commands, "x");
    }

    #[test]
    fn parse_warnings_keep_the_loop_going() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Mode::Local, dir.path());

        let script = format!("\n{}\necho ok\n", vec!["cat"; 9].join(" | "));
        let (prompts, commands) = run_script(&script, &mut session);
        assert!(prompts.contains("warning: no commands provided\n"));
        assert!(prompts.contains("error: piping limited to 8 commands\n"));
        assert_eq!(commands, "ok\n");
    }

    #[test]
    fn sentinel_exit_status_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Mode::Local, dir.path());

        let (prompts, commands) =
            run_script("sh -c \"exit 99\"\necho never\n", &mut session);
        assert!(prompts.ends_with("exiting...\n"));
        assert!(commands.is_empty());
    }

    #[test]
    fn execution_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Mode::Local, dir.path());

        let (_, commands) = run_script("rc | cat\nrc\n", &mut session);
        assert!(commands.starts_with("built-in commands don't support piping"));
        assert!(commands.ends_with("1\n"));
    }

    #[test]
    fn cd_applies_to_later_commands() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut session = Session::new(Mode::Local, dir.path());

        run_script("cd sub\necho here > marker\n", &mut session);
        assert!(dir.path().join("sub/marker").exists());
    }
}
