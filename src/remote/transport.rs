use std::{
    io::{self, ErrorKind, Read, Write},
    net::{SocketAddr, TcpStream},
    path::PathBuf,
};

use thiserror::Error;

use crate::{
    builtins::ControlSignal,
    parse::{parse_line, CommandList},
    process::{run_pipeline, stream::Streams, ExecError, Outcome},
    session::{Mode, Session},
};

use super::{EOF_MARKER, EXIT_ACK, RECV_CHUNK, STOP_ACK};

/// What handling one command line asks of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Keep reading lines from this client.
    Continue,
    ClientExited,
    ServerStop,
}

/// Why a connection's session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientExited,
    ServerStop,
}

/// A socket-level failure. It ends the connection, never the server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to receive from client: {0}")]
    Receive(#[source] io::Error),
    #[error("failed to send to client: {0}")]
    Send(#[source] io::Error),
}

/// Serves every command a client sends until it leaves or stops the server.
pub fn serve_connection(stream: TcpStream) -> Result<SessionEnd, TransportError> {
    Connection::new(stream).serve()
}

/// One client connection and the session its commands run in.
pub struct Connection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    session: Session,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|err| {
            warn!("cannot read working directory, starting client in /: {err}");
            PathBuf::from("/")
        });
        Self::with_session(stream, Session::new(Mode::Remote, cwd))
    }

    pub fn with_session(stream: TcpStream, session: Session) -> Self {
        Self {
            peer: stream.peer_addr().ok(),
            stream,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn serve(&mut self) -> Result<SessionEnd, TransportError> {
        let mut buf = vec![0u8; RECV_CHUNK];

        loop {
            let len = match self.stream.read(&mut buf) {
                Ok(0) => {
                    debug!(peer = ?self.peer, "client closed the connection");
                    return Ok(SessionEnd::ClientExited);
                }
                Ok(len) => len,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Receive(err)),
            };

            if len == RECV_CHUNK {
                warn!(peer = ?self.peer, "command filled the receive buffer, it may be truncated");
            }

            let line = decode_line(&buf[..len]);
            match self.handle_line(&line)? {
                SessionOutcome::Continue => {}
                SessionOutcome::ClientExited => return Ok(SessionEnd::ClientExited),
                SessionOutcome::ServerStop => return Ok(SessionEnd::ServerStop),
            }
        }
    }

    /// Runs one command line and answers it, always ending the answer with
    /// exactly one marker byte.
    pub fn handle_line(&mut self, line: &str) -> Result<SessionOutcome, TransportError> {
        info!(peer = ?self.peer, "exec request: {line}");

        match line {
            "exit" => {
                self.send_message(EXIT_ACK)?;
                return Ok(SessionOutcome::ClientExited);
            }
            "stop-server" => {
                self.send_message(STOP_ACK)?;
                return Ok(SessionOutcome::ServerStop);
            }
            _ => {}
        }

        let list = match parse_line(line) {
            Ok(list) => list,
            Err(err) => {
                self.send_message(&format!("{err}\n"))?;
                return Ok(SessionOutcome::Continue);
            }
        };

        let next = match self.execute(&list) {
            Ok(Outcome::Exited(code)) => {
                debug!(peer = ?self.peer, code, "command finished");
                SessionOutcome::Continue
            }
            Ok(Outcome::Control(ControlSignal::SessionEnd)) => {
                self.send_text(EXIT_ACK)?;
                SessionOutcome::ClientExited
            }
            Ok(Outcome::Control(ControlSignal::ServerStop)) => {
                self.send_text(STOP_ACK)?;
                SessionOutcome::ServerStop
            }
            Err(err) => {
                warn!(peer = ?self.peer, "command failed: {err}");
                self.send_text(&format!("{err}\n"))?;
                SessionOutcome::Continue
            }
        };

        self.send_marker()?;
        Ok(next)
    }

    fn execute(&mut self, list: &CommandList) -> Result<Outcome, ExecError> {
        let streams = match Streams::socket(&self.stream) {
            Ok(streams) => streams,
            Err(err) => {
                let err = ExecError::Streams(err);
                self.session.record(err.code());
                return Err(err);
            }
        };

        run_pipeline(list, &streams, &mut self.session)
    }

    fn send_message(&mut self, text: &str) -> Result<(), TransportError> {
        self.send_text(text)?;
        self.send_marker()
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.stream
            .write_all(text.as_bytes())
            .map_err(TransportError::Send)
    }

    fn send_marker(&mut self) -> Result<(), TransportError> {
        self.stream
            .write_all(&[EOF_MARKER])
            .map_err(TransportError::Send)
    }
}

/// Everything up to the first NUL, minus the line terminator.
fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.split(|b| *b == 0).next().unwrap_or_default();
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c| c == '\n' || c == '\r')
        .to_owned()
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread};

    use super::*;
    use crate::remote::Client;

    /// Serves one connection in a background thread.
    fn serve_one(cwd: &std::path::Path) -> (Client, thread::JoinHandle<Result<SessionEnd, TransportError>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let cwd = cwd.to_path_buf();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            Connection::with_session(stream, Session::new(Mode::Remote, cwd)).serve()
        });

        (Client::connect(addr).unwrap(), handle)
    }

    #[test]
    fn lines_lose_nul_and_newline() {
        assert_eq!(decode_line(b"ls -l\0"), "ls -l");
        assert_eq!(decode_line(b"echo hi\r\n"), "echo hi");
        assert_eq!(decode_line(b"exit\0garbage"), "exit");
        assert_eq!(decode_line(b""), "");
    }

    #[test]
    fn command_output_comes_back_before_the_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, handle) = serve_one(dir.path());

        assert_eq!(client.execute("echo hello").unwrap(), "hello\n");
        assert_eq!(client.execute("printf abc | tr a-c x-z").unwrap(), "xyz");
        assert_eq!(client.execute("exit").unwrap(), EXIT_ACK);

        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::ClientExited);
    }

    #[test]
    fn errors_are_sent_to_the_client() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, handle) = serve_one(dir.path());

        let reply = client.execute("ls dsh-missing-entry").unwrap();
        assert!(reply.contains("dsh-missing-entry"), "{reply}");
        let reply = client.execute("rc").unwrap();
        assert_ne!(reply, "0\n");

        let reply = client.execute("dsh-no-such-program-xyz").unwrap();
        assert!(reply.starts_with("dsh-no-such-program-xyz: "), "{reply}");
        assert_eq!(client.execute("rc").unwrap(), "2\n");

        drop(client);
        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::ClientExited);
    }

    #[test]
    fn parse_problems_keep_the_session_open() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, handle) = serve_one(dir.path());

        assert_eq!(
            client.execute(" | ").unwrap(),
            "warning: no commands provided\n"
        );
        let line = vec!["cat"; 9].join(" | ");
        assert_eq!(
            client.execute(&line).unwrap(),
            "error: piping limited to 8 commands\n"
        );
        let reply = client.execute("cd a | cat").unwrap();
        assert!(reply.starts_with("built-in commands don't support piping"));
        assert_eq!(client.execute("echo still here").unwrap(), "still here\n");

        client.execute("exit").unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn cd_and_rc_stay_in_the_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (mut client, handle) = serve_one(&root);

        assert_eq!(client.execute("cd inner").unwrap(), "");
        assert_eq!(client.execute("rc").unwrap(), "0\n");
        assert_eq!(
            client.execute("pwd").unwrap(),
            format!("{}\n", root.join("inner").display())
        );
        client.execute("echo saved > note.txt").unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join("inner/note.txt")).unwrap(),
            "saved\n"
        );

        client.execute("exit").unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn stop_server_is_reported_to_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, handle) = serve_one(dir.path());

        assert_eq!(client.execute("stop-server").unwrap(), STOP_ACK);
        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::ServerStop);
    }

    #[test]
    fn handled_lines_report_what_the_session_should_do() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut connection = Connection::with_session(stream, Session::new(Mode::Remote, dir.path()));

        assert_eq!(connection.handle_line("echo x").unwrap(), SessionOutcome::Continue);
        assert_eq!(connection.handle_line("").unwrap(), SessionOutcome::Continue);
        assert_eq!(connection.handle_line("exit 1").unwrap(), SessionOutcome::ClientExited);
        assert_eq!(connection.handle_line("stop-server").unwrap(), SessionOutcome::ServerStop);
        assert_eq!(connection.session().last_exit(), 0);
        drop(peer);
    }

    #[test]
    fn exit_builtin_with_arguments_also_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, handle) = serve_one(dir.path());

        assert_eq!(client.execute("exit now").unwrap(), EXIT_ACK);
        assert_eq!(handle.join().unwrap().unwrap(), SessionEnd::ClientExited);
    }

    #[test]
    fn client_stdin_feeds_the_first_stage() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, handle) = serve_one(dir.path());

        // head reads the next line the client writes on the same socket
        client.send_raw(b"head -n 1\0").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        client.send_raw(b"from client\n").unwrap();
        assert_eq!(client.read_reply().unwrap(), "from client\n");

        client.execute("exit").unwrap();
        handle.join().unwrap().unwrap();
    }
}
