//! Running sessions over a TCP connection.
//!
//! The wire format is thin: a client sends one command line per
//! write, and the server answers with the command's raw output followed by a
//! single [`EOF_MARKER`] byte.

pub mod client;
pub mod transport;

pub use self::{
    client::Client,
    transport::{serve_connection, Connection, SessionEnd, SessionOutcome, TransportError},
};

/// Sent after every command's output to mark where it ends.
pub const EOF_MARKER: u8 = 0x04;

/// Upper bound on one received command line. Longer lines are truncated.
pub const RECV_CHUNK: usize = 1024;

pub const DEFAULT_PORT: u16 = 1234;

pub const EXIT_ACK: &str = "exiting...\n";
pub const STOP_ACK: &str = "stopping server...\n";
