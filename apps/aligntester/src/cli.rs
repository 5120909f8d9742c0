use clap::{Args, Parser, ValueEnum};
use std::path::{Path, PathBuf};

use align_sync::{ClientConfig, Mode};

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "aligntester",
    about = "Operator console for the floppy drive alignment tester",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "ALIGNTESTER_BACKEND",
        default_value = align_sync::config::DEFAULT_BACKEND_URL,
        help = "Base URL of the alignment backend"
    )]
    pub backend: String,

    #[arg(
        long = "ws-url",
        env = "ALIGNTESTER_WS_URL",
        value_name = "URL",
        help = "Push channel URL (defaults to ws://<backend host>/ws)"
    )]
    pub ws_url: Option<String>,

    #[arg(
        long = "state-file",
        env = "ALIGNTESTER_STATE_FILE",
        value_name = "PATH",
        help = "Where the last format and head position are kept between runs"
    )]
    pub state_file: Option<PathBuf>,

    #[arg(
        long,
        value_enum,
        default_value_t = ModeArg::Manual,
        help = "Mode selected when the console opens"
    )]
    pub mode: ModeArg,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Automatic,
    Manual,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Automatic => Mode::Automatic,
            ModeArg::Manual => Mode::Manual,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "ALIGNTESTER_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "ALIGNTESTER_LOG_FILE",
        help = "Write structured logs to the specified file (defaults to aligntester.log beside the state file)"
    )]
    pub file: Option<PathBuf>,
}

pub const DEFAULT_LOG_FILE: &str = "aligntester.log";

impl LoggingArgs {
    /// The console owns the terminal, so logs go to a file: the explicit one, or
    /// one next to `state_file`.
    pub fn to_config(&self, state_file: Option<&Path>) -> LogConfig {
        let file = self.file.clone().or_else(|| {
            state_file
                .and_then(Path::parent)
                .map(|dir| dir.join(DEFAULT_LOG_FILE))
        });
        LogConfig {
            level: self.level,
            file,
        }
    }
}

impl Cli {
    /// Layers the command line over the environment-derived defaults.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        config.backend_url = self.backend.clone();
        if let Some(url) = &self.ws_url {
            config.ws_url = Some(url.clone());
        }
        if let Some(path) = &self.state_file {
            config.state_file = Some(path.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "aligntester",
            "--backend",
            "http://bench:9000",
            "--ws-url",
            "ws://bench:9000/ws",
            "--mode",
            "automatic",
            "--log-level",
            "debug",
        ]);
        let config = cli.client_config();
        assert_eq!(config.backend_url, "http://bench:9000");
        assert_eq!(config.ws_url.as_deref(), Some("ws://bench:9000/ws"));
        assert_eq!(Mode::from(cli.mode), Mode::Automatic);
        assert_eq!(cli.logging.level, LogLevel::Debug);
    }

    #[test]
    fn log_file_defaults_beside_state_file() {
        let cli = Cli::parse_from(["aligntester"]);
        let config = cli
            .logging
            .to_config(Some(Path::new("/var/lib/aligntester/state.toml")));
        assert_eq!(
            config.file,
            Some(PathBuf::from("/var/lib/aligntester/aligntester.log"))
        );

        let cli = Cli::parse_from(["aligntester", "--log-file", "/tmp/align.log"]);
        let config = cli.logging.to_config(Some(Path::new("/var/lib/aligntester/state.toml")));
        assert_eq!(config.file, Some(PathBuf::from("/tmp/align.log")));
    }
}
