//! CLI argument definitions for logsentinel-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// LogSentinel log monitoring daemon.
///
/// Tails a log file into a message broker, classifies consumed lines,
/// stores alerts and serves the most recent ones over HTTP.
#[derive(Parser, Debug)]
#[command(name = "logsentinel-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logsentinel.toml configuration file.
    #[arg(short, long, default_value = "/etc/logsentinel/logsentinel.toml")]
    pub config: PathBuf,

    /// Which part of the system this process runs.
    #[arg(long, value_enum, default_value_t = Role::All)]
    pub role: Role,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

/// Process role.
///
/// `all` runs everything in one process over the in-memory broker.
/// The other roles split the system the way it is deployed against an
/// external broker and database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Generator, ingest, detection and query API.
    All,
    /// Generator and ingest (tail -> publish).
    Producer,
    /// Detection (consume -> classify -> persist).
    Consumer,
    /// Query API only.
    Dashboard,
}

impl Role {
    /// Whether the tail/publish side runs in this process.
    pub fn runs_producer(self) -> bool {
        matches!(self, Self::All | Self::Producer)
    }

    /// Whether the consume/classify side runs in this process.
    pub fn runs_consumer(self) -> bool {
        matches!(self, Self::All | Self::Consumer)
    }

    /// Whether the query API runs in this process.
    pub fn runs_dashboard(self) -> bool {
        matches!(self, Self::All | Self::Dashboard)
    }

    /// Whether this process needs an alert store.
    pub fn needs_store(self) -> bool {
        self.runs_consumer() || self.runs_dashboard()
    }

    /// Whether this process needs a broker client.
    pub fn needs_broker(self) -> bool {
        self.runs_producer() || self.runs_consumer()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
            Self::Dashboard => "dashboard",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["logsentinel-daemon"]);
        assert_eq!(cli.role, Role::All);
        assert_eq!(
            cli.config,
            PathBuf::from("/etc/logsentinel/logsentinel.toml")
        );
        assert!(!cli.validate);
        assert!(cli.pid_file.is_none());
    }

    #[test]
    fn parses_role_and_overrides() {
        let cli = DaemonCli::parse_from([
            "logsentinel-daemon",
            "--config",
            "/tmp/ls.toml",
            "--role",
            "consumer",
            "--log-format",
            "pretty",
            "--validate",
        ]);
        assert_eq!(cli.role, Role::Consumer);
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(DaemonCli::try_parse_from(["logsentinel-daemon", "--role", "worker"]).is_err());
    }

    #[test]
    fn role_selection() {
        assert!(Role::All.runs_producer() && Role::All.runs_consumer() && Role::All.runs_dashboard());
        assert!(Role::Producer.runs_producer());
        assert!(!Role::Producer.needs_store());
        assert!(Role::Consumer.needs_store() && Role::Consumer.needs_broker());
        assert!(!Role::Dashboard.needs_broker());
        assert_eq!(Role::Dashboard.to_string(), "dashboard");
    }
}
