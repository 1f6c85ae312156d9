// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : little_john: polling trading loop for a Robinhood-style broker
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Logs into the broker, polls account / quote / position state on a
          fixed interval, lets a pluggable brain decide buy / sell / stay and
          executes the decision at most once per tick. Exposes Prometheus
          metrics and records JSONL state history.
=============================================================================
*/
use std::env;
use std::time::Duration;

use ahash::AHashSet;
use clap::Parser;
use dotenvy::dotenv;

use crate::control::DEFAULT_TICK_INTERVAL;
use crate::robinhood::DEFAULT_BASE_URL;

/// Command-line flags. Everything else comes from the environment / `.env`.
#[derive(Parser, Debug, Clone)]
#[command(name = "little_john", version, about = "Polling trading loop")]
pub struct Cli {
    /// Turn on debug logging output (same as LOG=1)
    #[arg(short, long)]
    pub log: bool,
    /// Show a progress bar while waiting between ticks
    #[arg(long)]
    pub dots: bool,
    /// Run this many ticks and exit instead of waiting for Enter
    #[arg(long)]
    pub ticks: Option<usize>,
}

/// Where orders and state come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VenueMode {
    Mock,
    Robinhood,
}

impl VenueMode {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" | "paper" => Some(VenueMode::Mock),
            "robinhood" | "rh" | "live" => Some(VenueMode::Robinhood),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueMode::Mock => "mock",
            VenueMode::Robinhood => "robinhood",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrainMode {
    Idle,
    Hold,
}

impl BrainMode {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" | "none" | "noop" => Some(BrainMode::Idle),
            "hold" | "stay" => Some(BrainMode::Hold),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrainMode::Idle => "idle",
            BrainMode::Hold => "hold",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    // console
    pub log: bool,
    pub dots: bool,
    pub ticks: Option<usize>,

    // loop
    pub tick_interval: Duration,
    pub symbols: Vec<String>,
    pub brain: BrainMode,

    // broker
    pub venue_mode: VenueMode,
    pub robinhood_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub http_timeout: Duration,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,
}

impl Args {
    /// Credentials for the session. The mock venue accepts anything.
    pub fn credentials(&self) -> Result<(String, String), String> {
        match (&self.username, &self.password, &self.venue_mode) {
            (Some(u), Some(p), _) => Ok((u.clone(), p.clone())),
            (_, _, VenueMode::Mock) => Ok(("paper".into(), "paper".into())),
            _ => Err("ROBINHOOD_USERNAME / ROBINHOOD_PASSWORD not set".into()),
        }
    }
}

/// SYMBOLS=AAPL,msft, ,TSLA,aapl -> ["AAPL", "MSFT", "TSLA"] (first occurrence wins)
pub fn parse_symbols(s: &str) -> Vec<String> {
    let mut seen = AHashSet::new();
    s.split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| x.to_ascii_uppercase())
        .filter(|x| seen.insert(x.clone()))
        .collect()
}

fn flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

pub fn load() -> Args {
    // .env first so everything below sees it
    let _ = dotenv();
    let cli = Cli::parse();

    let log = cli.log || env::var("LOG").map(|v| flag(&v)).unwrap_or(false);
    let tick_interval = env_parse("TICK_SECS")
        .filter(|s: &f64| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_TICK_INTERVAL);

    let symbols = env::var("SYMBOLS")
        .ok()
        .map(|s| parse_symbols(&s))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec!["AAPL".to_string()]);

    let brain = env::var("BRAIN").ok().and_then(|s| BrainMode::parse_one(&s)).unwrap_or(BrainMode::Idle);
    let venue_mode = env::var("VENUE_MODE")
        .ok()
        .and_then(|s| VenueMode::parse_one(&s))
        .unwrap_or(VenueMode::Mock);

    Args {
        log,
        dots: cli.dots,
        ticks: cli.ticks,
        tick_interval,
        symbols,
        brain,
        venue_mode,
        robinhood_url: env::var("ROBINHOOD_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        username: env::var("ROBINHOOD_USERNAME").ok().filter(|s| !s.is_empty()),
        password: env::var("ROBINHOOD_PASSWORD").ok().filter(|s| !s.is_empty()),
        http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS").unwrap_or(30)),
        record_file: env::var("RECORD_FILE").ok().filter(|s| !s.is_empty()),
        metrics_port: env_parse("METRICS_PORT").unwrap_or(9899),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(venue_mode: VenueMode, user: Option<&str>) -> Args {
        Args {
            log: false,
            dots: false,
            ticks: None,
            tick_interval: Duration::from_secs(10),
            symbols: vec!["AAPL".into()],
            brain: BrainMode::Idle,
            venue_mode,
            robinhood_url: DEFAULT_BASE_URL.into(),
            username: user.map(str::to_string),
            password: user.map(|_| "pw".to_string()),
            http_timeout: Duration::from_secs(30),
            record_file: None,
            metrics_port: 9899,
        }
    }

    #[test]
    fn symbols_are_trimmed_and_upper() {
        assert_eq!(parse_symbols("aapl, msft,, TSLA ,tsla"), vec!["AAPL", "MSFT", "TSLA"]);
        assert!(parse_symbols(" , ").is_empty());
    }

    #[test]
    fn symbols_dedup_keeps_first_position() {
        assert_eq!(parse_symbols("AAPL,MSFT,aapl"), vec!["AAPL", "MSFT"]);
        assert_eq!(parse_symbols("tsla, AAPL ,msft,TSLA,aapl"), vec!["TSLA", "AAPL", "MSFT"]);
    }

    #[test]
    fn modes_parse_aliases() {
        assert_eq!(VenueMode::parse_one(" Paper "), Some(VenueMode::Mock));
        assert_eq!(VenueMode::parse_one("rh"), Some(VenueMode::Robinhood));
        assert_eq!(VenueMode::parse_one("binance"), None);
        assert_eq!(BrainMode::parse_one("STAY"), Some(BrainMode::Hold));
        assert_eq!(BrainMode::parse_one(""), None);
    }

    #[test]
    fn live_venue_needs_credentials() {
        assert!(args(VenueMode::Robinhood, None).credentials().is_err());
        assert_eq!(args(VenueMode::Robinhood, Some("al")).credentials().unwrap().0, "al");
        assert!(args(VenueMode::Mock, None).credentials().is_ok());
    }

    #[test]
    fn flag_values() {
        assert!(flag("1") && flag("TRUE") && flag(" on "));
        assert!(!flag("0") && !flag("nope"));
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::parse_from(["little_john", "-l", "--ticks", "3"]);
        assert!(cli.log);
        assert!(!cli.dots);
        assert_eq!(cli.ticks, Some(3));
    }
}
