use clap::{Parser, Subcommand};
use std::time::Duration;

pub const DEFAULT_DEPARTURES_URL: &str = "https://prod.ivtr-od.tpg.ch/v1/GetNextDepartures.json";
pub const DEFAULT_CONNECTIONS_URL: &str = "https://transport.opendata.ch/v1/connections";

#[derive(Debug, Parser)]
#[command(name = "tpg-tui", version, about = "Departures and routes for the Geneva public transport network")]
pub struct Cli {
    /// tpg open data API key
    #[arg(long, env = "TPG_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    #[arg(long, env = "TPG_DEPARTURES_URL", default_value = DEFAULT_DEPARTURES_URL)]
    pub departures_url: String,

    #[arg(long, env = "TPG_CONNECTIONS_URL", default_value = DEFAULT_CONNECTIONS_URL)]
    pub connections_url: String,

    /// HTTP timeout; the client default applies when unset
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Stop code to open in the departures tab
    #[arg(long)]
    pub stop: Option<String>,

    /// Route origin for the routes tab
    #[arg(long)]
    pub from: Option<String>,

    /// Route destination for the routes tab
    #[arg(long)]
    pub to: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the next departures at a stop and exit
    Departures {
        stop: String,
        /// Only show this line
        #[arg(long)]
        line: Option<String>,
        /// One `line,destination,left` row per departure
        #[arg(long)]
        compact: bool,
    },
    /// Print connections between two stops and exit
    Route {
        from: String,
        to: String,
        /// Local date and time, "YYYY-MM-DD HH:MM"; defaults to now
        #[arg(long)]
        at: Option<String>,
        /// Treat --at as the arrival time
        #[arg(long)]
        arrival: bool,
    },
}

/// Settings needed to talk to the transit APIs.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub departures_url: String,
    pub connections_url: String,
    pub timeout: Option<Duration>,
}

impl From<&Cli> for Config {
    fn from(cli: &Cli) -> Self {
        Self {
            api_key: cli.api_key.clone(),
            departures_url: cli.departures_url.clone(),
            connections_url: cli.connections_url.clone(),
            timeout: cli.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["tpg-tui", "--api-key", "k"]).unwrap();
        let config = Config::from(&cli);
        assert_eq!(config.api_key, "k");
        assert_eq!(config.departures_url, DEFAULT_DEPARTURES_URL);
        assert!(config.timeout.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_departures_subcommand() {
        let cli = Cli::try_parse_from(["tpg-tui", "--timeout-secs", "3", "departures", "CVIN", "--line", "12"])
            .unwrap();
        assert_eq!(Config::from(&cli).timeout, Some(Duration::from_secs(3)));
        match cli.command {
            Some(Command::Departures { stop, line, compact }) => {
                assert_eq!(stop, "CVIN");
                assert_eq!(line.as_deref(), Some("12"));
                assert!(!compact);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
