//! A small command shell that runs pipelines locally or for remote clients.

#[macro_use]
extern crate tracing;

pub mod builtins;
pub mod config;
pub mod error;
pub mod parse;
pub mod prelude;
pub mod process;
pub mod remote;
pub mod repl;
pub mod server;
pub mod session;
