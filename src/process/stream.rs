use std::{
    fs::File,
    io::{self, Write},
    net::TcpStream,
    os::fd::{AsFd, OwnedFd},
    process::Stdio,
};

/// One open end of a pipeline: what the first stage reads, or where the last
/// stage and every stage's errors are written.
#[derive(Debug)]
pub enum Endpoint {
    /// The matching standard stream of this process.
    Inherit,
    Null,
    Descriptor(OwnedFd),
}

impl Endpoint {
    /// Wraps a duplicate of `fd`; the caller keeps its own handle.
    pub fn from_fd(fd: impl AsFd) -> io::Result<Self> {
        Ok(Self::Descriptor(fd.as_fd().try_clone_to_owned()?))
    }

    /// A fresh handle for a child's standard stream slot.
    pub fn stdio(&self) -> io::Result<Stdio> {
        match self {
            Self::Inherit => Ok(Stdio::inherit()),
            Self::Null => Ok(Stdio::null()),
            Self::Descriptor(fd) => Ok(Stdio::from(fd.try_clone()?)),
        }
    }

    fn writer(&self, inherit: fn() -> Box<dyn Write>) -> io::Result<Box<dyn Write>> {
        match self {
            Self::Inherit => Ok(inherit()),
            Self::Null => Ok(Box::new(io::sink())),
            Self::Descriptor(fd) => Ok(Box::new(File::from(fd.try_clone()?))),
        }
    }
}

/// The outer descriptors of a pipeline.
#[derive(Debug)]
pub struct Streams {
    pub input: Endpoint,
    pub output: Endpoint,
    pub error: Endpoint,
}

impl Streams {
    pub fn terminal() -> Self {
        Self {
            input: Endpoint::Inherit,
            output: Endpoint::Inherit,
            error: Endpoint::Inherit,
        }
    }

    /// Uses a client connection as input, output and error stream at once.
    pub fn socket(stream: &TcpStream) -> io::Result<Self> {
        Ok(Self {
            input: Endpoint::from_fd(stream)?,
            output: Endpoint::from_fd(stream)?,
            error: Endpoint::from_fd(stream)?,
        })
    }

    /// Writer for in-process output, used by built-ins.
    pub fn output_writer(&self) -> io::Result<Box<dyn Write>> {
        self.output.writer(|| Box::new(io::stdout()))
    }

    /// Writer for in-process diagnostics.
    pub fn error_writer(&self) -> io::Result<Box<dyn Write>> {
        self.error.writer(|| Box::new(io::stderr()))
    }

    /// Writes one diagnostic line, ignoring a closed error stream.
    pub fn report(&self, message: impl std::fmt::Display) {
        let written = self
            .error_writer()
            .and_then(|mut err| writeln!(err, "{message}").and_then(|_| err.flush()));
        if let Err(err) = written {
            warn!("failed to report error to session: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use super::*;

    #[test]
    fn descriptor_writers_share_the_file() {
        let mut file = tempfile::tempfile().unwrap();
        let streams = Streams {
            input: Endpoint::Null,
            output: Endpoint::from_fd(&file).unwrap(),
            error: Endpoint::from_fd(&file).unwrap(),
        };

        streams.output_writer().unwrap().write_all(b"out\n").unwrap();
        streams.report("oops");

        let mut contents = String::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "out\noops\n");
    }

    #[test]
    fn null_endpoint_discards() {
        let streams = Streams {
            input: Endpoint::Null,
            output: Endpoint::Null,
            error: Endpoint::Null,
        };
        streams.output_writer().unwrap().write_all(b"gone").unwrap();
        assert!(streams.input.stdio().is_ok());
    }
}
