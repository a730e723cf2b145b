pub use crate::{
    builtins::ControlSignal,
    config::{Config, Invocation, RunMode},
    error::{Error, Result},
    parse::{parse_line, Command, CommandList, ParseError},
    process::{run_pipeline, stream::Streams, ExecError, Outcome},
    remote::{Client, SessionEnd, SessionOutcome},
    server::{ConcurrencyMode, Server, ServerHandle},
    session::{Mode, Session},
};
