use itertools::Itertools;
use thiserror::Error;

use self::token::{parse_command, split_segments, Redirect};

pub mod token;

pub use self::token::Command;

/// Maximum number of commands in one pipeline.
pub const CMD_MAX: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("warning: no commands provided")]
    NoCommands,
    #[error("error: piping limited to {max} commands")]
    TooManyCommands { max: usize },
    #[error("syntax error: expected a file name after `{operator}`")]
    MissingRedirectTarget { operator: Redirect },
}

/// An ordered, non-empty pipeline. The first command reads the outer input
/// and the last one writes the outer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    /// The single command of a one-stage pipeline.
    pub fn sole(&self) -> Option<&Command> {
        match self.commands.as_slice() {
            [cmd] => Some(cmd),
            _ => None,
        }
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Parses a full line into a pipeline of at most [`CMD_MAX`] commands.
pub fn parse_line(line: &str) -> Result<CommandList, ParseError> {
    parse_line_with_limit(line, CMD_MAX)
}

/// Parses a full line, rejecting pipelines longer than `max`.
///
/// Empty segments (`a | | b`) are dropped silently.
pub fn parse_line_with_limit(line: &str, max: usize) -> Result<CommandList, ParseError> {
    let mut commands = Vec::new();

    for segment in split_segments(line) {
        let Some(cmd) = parse_command(segment)? else {
            continue;
        };

        if commands.len() == max {
            return Err(ParseError::TooManyCommands { max });
        }
        commands.push(cmd);
    }

    if commands.is_empty() {
        return Err(ParseError::NoCommands);
    }

    trace!(
        "parsed pipeline: {}",
        commands.iter().map(|cmd| cmd.argv.join(" ")).join(" | ")
    );

    Ok(CommandList { commands })
}
