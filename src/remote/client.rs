use std::{
    io::{self, BufRead, BufReader, ErrorKind, Write},
    net::{TcpStream, ToSocketAddrs},
};

use crate::repl::PROMPT;

use super::EOF_MARKER;

/// The client side of a remote session.
pub struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        debug!(peer = ?stream.peer_addr().ok(), "connected to server");
        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    /// Sends one command line and returns everything the server wrote for it,
    /// without the trailing marker.
    pub fn execute(&mut self, line: &str) -> io::Result<String> {
        self.send(line)?;
        self.read_reply()
    }

    /// Sends one command line, NUL terminated, in a single write.
    pub fn send(&mut self, line: &str) -> io::Result<()> {
        let mut request = Vec::with_capacity(line.len() + 1);
        request.extend_from_slice(line.as_bytes());
        request.push(0);
        self.send_raw(&request)
    }

    pub(crate) fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(bytes)?;
        stream.flush()
    }

    /// Reads up to and including the next marker.
    pub fn read_reply(&mut self) -> io::Result<String> {
        let mut reply = Vec::new();
        self.reader.read_until(EOF_MARKER, &mut reply)?;

        if reply.pop() != Some(EOF_MARKER) {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "server closed the connection mid-reply",
            ));
        }

        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// Forwards lines from `input` until it runs dry or the session ends,
    /// printing each reply to `output`.
    pub fn run_loop(&mut self, mut input: impl BufRead, mut output: impl Write) -> io::Result<()> {
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
            if command.is_empty() {
                continue;
            }

            let reply = self.execute(command)?;
            write!(output, "{reply}")?;
            output.flush()?;

            if matches!(command, "exit" | "stop-server") {
                return Ok(());
            }
        }
    }
}
