use std::fmt;

use logos::{Lexer, Logos};
use thiserror::Error;

use super::ParseError;

#[derive(Debug, Clone, PartialEq, Default, Error)]
pub enum LexerError {
    #[default]
    #[error("unknown token")]
    UnknownToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Logos)]
#[logos(skip r"[ \t\r\n\f]+", error = LexerError)]
pub enum Token<'a> {
    #[token("|")]
    Pipe,
    #[token(">>")]
    Append,
    #[token(">")]
    Write,
    #[token("<")]
    Read,

    #[regex(r#"[^ \t\r\n\f"<>|]+"#)]
    Word(&'a str),
    // an unterminated quote runs to the end of the input
    #[regex(r#""[^"]*"?"#, quoted_str_callback)]
    Quoted(&'a str),
}

fn quoted_str_callback<'a>(lex: &mut Lexer<'a, Token<'a>>) -> &'a str {
    let slice = &lex.slice()[1..];
    slice.strip_suffix('"').unwrap_or(slice)
}

/// A file redirection operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    Read,
    Write,
    Append,
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "<",
            Self::Write => ">",
            Self::Append => ">>",
        })
    }
}

/// One parsed command of a pipeline.
///
/// `argv[0]` is the program name. A command is only materialized when it
/// has at least one word, so `argv` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    pub argv: Vec<String>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub append: bool,
}

impl Command {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    pub fn has_redirects(&self) -> bool {
        self.input.is_some() || self.output.is_some()
    }
}

#[derive(Debug, PartialEq)]
enum Lexeme {
    Word(String),
    Redirect(Redirect),
}

/// Returns the byte ranges of `line` between unquoted pipe characters.
pub(crate) fn split_segments(line: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;

    let mut lexer = Token::lexer(line);
    while let Some(token) = lexer.next() {
        if let Ok(Token::Pipe) = token {
            let span = lexer.span();
            segments.push(&line[start..span.start]);
            start = span.end;
        }
    }
    segments.push(&line[start..]);

    segments
}

/// Groups tokens into words. Words and quoted strings that touch each other
/// (`a"b c"d`) form a single word.
fn lexemes(segment: &str) -> Vec<Lexeme> {
    let mut lexemes = Vec::new();
    let mut word_end = None::<usize>;

    let mut lexer = Token::lexer(segment);
    while let Some(token) = lexer.next() {
        let span = lexer.span();
        let text = match token {
            Ok(Token::Word(text)) | Ok(Token::Quoted(text)) => text,
            Ok(Token::Read) => {
                lexemes.push(Lexeme::Redirect(Redirect::Read));
                word_end = None;
                continue;
            }
            Ok(Token::Write) => {
                lexemes.push(Lexeme::Redirect(Redirect::Write));
                word_end = None;
                continue;
            }
            Ok(Token::Append) => {
                lexemes.push(Lexeme::Redirect(Redirect::Append));
                word_end = None;
                continue;
            }
            // segments never carry an unquoted pipe, keep it literal if one sneaks in
            Ok(Token::Pipe) | Err(_) => lexer.slice(),
        };

        match lexemes.last_mut() {
            Some(Lexeme::Word(word)) if word_end == Some(span.start) => word.push_str(text),
            _ => lexemes.push(Lexeme::Word(text.to_owned())),
        }
        word_end = Some(span.end);
    }

    lexemes
}

/// Parses one pipeline segment into a [`Command`].
///
/// Returns `Ok(None)` when the segment holds no words at all.
pub fn parse_command(segment: &str) -> Result<Option<Command>, ParseError> {
    let mut cmd = Command::default();
    let mut pending = None::<Redirect>;

    for lexeme in lexemes(segment.trim()) {
        match lexeme {
            Lexeme::Redirect(op) => {
                if let Some(operator) = pending.replace(op) {
                    return Err(ParseError::MissingRedirectTarget { operator });
                }
            }
            Lexeme::Word(word) => match pending.take() {
                Some(Redirect::Read) => cmd.input = Some(word),
                Some(Redirect::Write) => {
                    cmd.output = Some(word);
                    cmd.append = false;
                }
                Some(Redirect::Append) => {
                    cmd.output = Some(word);
                    cmd.append = true;
                }
                None => cmd.argv.push(word),
            },
        }
    }

    if let Some(operator) = pending {
        return Err(ParseError::MissingRedirectTarget { operator });
    }

    if cmd.argv.is_empty() {
        trace!(segment, "segment has no command");
        return Ok(None);
    }

    Ok(Some(cmd))
}
