// ABOUTME: CLI argument parsing for pool-relay
//
// Flags override values from the config file:
// - --target / --listen: upstream and listening addresses
// - --keepalive: keep-alive period for pool members
// - --config: explicit config file
// - --log-format: text or JSON lines on stderr

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::RelayConfig;
use crate::logging::LogFormat;

/// TCP load-balancing relay over a pool of connections to every IP of a host
#[derive(Debug, Parser)]
#[command(name = "pool-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The target host and port to connect to
    #[arg(long)]
    pub target: Option<String>,

    /// The IP and port to listen on
    #[arg(long)]
    pub listen: Option<String>,

    /// Keep-alive period for pool connections, in seconds
    #[arg(long, value_name = "SECS")]
    pub keepalive: Option<u64>,

    /// Config file (default: ./pool-relay.toml, then the user config dir)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Overlay flags that were given onto `config`
    pub fn apply_to(&self, config: &mut RelayConfig) {
        if let Some(target) = &self.target {
            config.target.clone_from(target);
        }
        if let Some(listen) = &self.listen {
            config.listen.clone_from(listen);
        }
        if let Some(secs) = self.keepalive {
            config.keepalive_interval = Duration::from_secs(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_leave_config_untouched() {
        let cli = Cli::parse_from(["pool-relay"]);
        let mut config = RelayConfig::default();
        cli.apply_to(&mut config);

        assert_eq!(config, RelayConfig::default());
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "pool-relay",
            "--target",
            "example.com:443",
            "--listen",
            "0.0.0.0:8000",
            "--keepalive",
            "15",
            "--log-format",
            "json",
        ]);
        let mut config = RelayConfig::default();
        cli.apply_to(&mut config);

        assert_eq!(config.target, "example.com:443");
        assert_eq!(config.listen, "0.0.0.0:8000");
        assert_eq!(config.keepalive_interval, Duration::from_secs(15));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_config_path_flag() {
        let cli = Cli::parse_from(["pool-relay", "-c", "/etc/relay.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/relay.toml")));
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["pool-relay", "--log-format", "xml"]).is_err());
    }
}
