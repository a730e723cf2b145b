use std::{
    fs, io,
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    str::FromStr,
};

use getopts::Options;
use serde::Deserialize;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::{remote::DEFAULT_PORT, server::ConcurrencyMode};

const CONFIG_FILE: &str = "dsh.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Args(#[from] getopts::Fail),
    #[error("invalid {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("-c and -s are mutually exclusive")]
    ConflictingModes,
    #[error("cannot resolve {host}:{port}")]
    Unresolved { host: String, port: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    #[default]
    Local,
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: RunMode,
    /// Falls back to a mode-specific default when unset.
    pub interface: Option<String>,
    pub port: u16,
    pub threaded: bool,
    pub log_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: RunMode::Local,
            interface: None,
            port: DEFAULT_PORT,
            threaded: false,
            log_dir: PathBuf::from("."),
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(Config),
    Help(String),
}

impl Config {
    /// Layers the config file, the environment and `args` (without the
    /// program name) over the defaults.
    pub fn load(args: &[String]) -> Result<Invocation, ConfigError> {
        Self::load_with(args, |key| std::env::var(key).ok())
    }

    pub fn load_with(
        args: &[String],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Invocation, ConfigError> {
        let mut config = match env("DSH_CONFIG") {
            Some(path) => Self::read_file(Path::new(&path))?,
            None if Path::new(CONFIG_FILE).is_file() => Self::read_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };

        config.apply_env(env)?;
        config.apply_args(args)
    }

    pub fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    pub fn interface(&self) -> &str {
        match (&self.interface, self.mode) {
            (Some(interface), _) => interface.as_str(),
            (None, RunMode::Server) => "0.0.0.0",
            (None, _) => "127.0.0.1",
        }
    }

    pub fn address(&self) -> Result<SocketAddr, ConfigError> {
        let unresolved = || ConfigError::Unresolved {
            host: self.interface().to_owned(),
            port: self.port,
        };

        (self.interface(), self.port)
            .to_socket_addrs()
            .map_err(|_| unresolved())?
            .next()
            .ok_or_else(unresolved)
    }

    pub fn concurrency(&self) -> ConcurrencyMode {
        if self.threaded {
            ConcurrencyMode::Concurrent
        } else {
            ConcurrencyMode::Sequential
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(mode) = env("DSH_MODE") {
            self.mode = parse_value("DSH_MODE", &mode)?;
        }
        if let Some(interface) = env("DSH_INTERFACE") {
            self.interface = Some(interface);
        }
        if let Some(port) = env("DSH_PORT") {
            self.port = parse_value("DSH_PORT", &port)?;
        }
        if let Some(threaded) = env("DSH_THREADED") {
            self.threaded = match threaded.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "DSH_THREADED",
                        value: threaded,
                    })
                }
            };
        }
        Ok(())
    }

    fn apply_args(mut self, args: &[String]) -> Result<Invocation, ConfigError> {
        let opts = options();
        let matches = opts.parse(args)?;

        if matches.opt_present("h") {
            return Ok(Invocation::Help(opts.usage("Usage: dsh [options]")));
        }

        let client = matches.opt_present("c");
        let server = matches.opt_present("s");
        match (client, server) {
            (true, true) => return Err(ConfigError::ConflictingModes),
            (true, false) => self.mode = RunMode::Client,
            (false, true) => self.mode = RunMode::Server,
            (false, false) => {}
        }

        if let Some(target) = matches.opt_str("c").or_else(|| matches.opt_str("s")) {
            self.apply_target(&target)?;
        }
        if let Some(interface) = matches.opt_str("i") {
            self.interface = Some(interface);
        }
        if let Some(port) = matches.opt_str("p") {
            self.port = parse_value("port", &port)?;
        }
        if matches.opt_present("x") {
            self.threaded = true;
        }

        Ok(Invocation::Run(self))
    }

    /// Applies an `addr:port`, `addr` or `:port` shorthand.
    fn apply_target(&mut self, target: &str) -> Result<(), ConfigError> {
        let (host, port) = match target.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (target, None),
        };

        if !host.is_empty() {
            self.interface = Some(host.to_owned());
        }
        if let Some(port) = port {
            self.port = parse_value("port", port)?;
        }
        Ok(())
    }
}

fn options() -> Options {
    let mut opts = Options::new();
    opts.optflagopt("c", "client", "run as a client", "ADDR:PORT")
        .optflagopt("s", "server", "run as a server", "ADDR:PORT")
        .optopt("i", "interface", "interface to bind or connect to", "ADDR")
        .optopt("p", "port", "port to bind or connect to", "PORT")
        .optflag("x", "threaded", "serve clients concurrently")
        .optflag("h", "help", "print this help");
    opts
}

fn parse_value<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    fn load(list: &[&str], env: &[(&str, &str)]) -> Result<Invocation, ConfigError> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::load_with(&args(list), |key| env.get(key).cloned())
    }

    fn run_config(list: &[&str], env: &[(&str, &str)]) -> Config {
        match load(list, env).unwrap() {
            Invocation::Run(config) => config,
            Invocation::Help(_) => panic!("unexpected help"),
        }
    }

    #[test]
    fn defaults_run_locally() {
        let config = run_config(&[], &[]);
        assert_eq!(config.mode, RunMode::Local);
        assert_eq!(config.port, 1234);
        assert!(!config.threaded);
        assert_eq!(config.concurrency(), ConcurrencyMode::Sequential);
    }

    #[test]
    fn interface_default_depends_on_mode() {
        assert_eq!(run_config(&["-s"], &[]).interface(), "0.0.0.0");
        assert_eq!(run_config(&["-c"], &[]).interface(), "127.0.0.1");
    }

    #[test]
    fn flags_override_environment() {
        let env = [("DSH_MODE", "client"), ("DSH_PORT", "4000"), ("DSH_THREADED", "1")];
        let config = run_config(&["-s", "-p", "5000"], &env);
        assert_eq!(config.mode, RunMode::Server);
        assert_eq!(config.port, 5000);
        assert!(config.threaded);
        assert_eq!(
            config.address().unwrap(),
            "0.0.0.0:5000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn target_shorthand_sets_address() {
        let config = run_config(&["-c", "10.0.0.7:4321"], &[]);
        assert_eq!(config.mode, RunMode::Client);
        assert_eq!(config.interface(), "10.0.0.7");
        assert_eq!(config.port, 4321);

        let config = run_config(&["-s", ":9000", "-x"], &[]);
        assert_eq!(config.interface(), "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.concurrency(), ConcurrencyMode::Concurrent);
    }

    #[test]
    fn file_sits_below_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsh.toml");
        fs::write(&path, "mode = \"server\"\nport = 7000\nthreaded = true\n").unwrap();
        let path = path.to_str().unwrap();

        let config = run_config(&[], &[("DSH_CONFIG", path), ("DSH_PORT", "7001")]);
        assert_eq!(config.mode, RunMode::Server);
        assert_eq!(config.port, 7001);
        assert!(config.threaded);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            load(&["-p", "http"], &[]),
            Err(ConfigError::InvalidValue { name: "port", .. })
        ));
        assert!(matches!(
            load(&[], &[("DSH_MODE", "daemon")]),
            Err(ConfigError::InvalidValue { name: "DSH_MODE", .. })
        ));
        assert!(matches!(load(&["-c", "-s"], &[]), Err(ConfigError::ConflictingModes)));
        assert!(matches!(load(&["-q"], &[]), Err(ConfigError::Args(_))));
    }

    #[test]
    fn help_prints_usage() {
        match load(&["-h"], &[]).unwrap() {
            Invocation::Help(usage) => assert!(usage.contains("--threaded")),
            Invocation::Run(_) => panic!("expected help"),
        }
    }
}
