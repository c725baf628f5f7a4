use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

use crate::simulation::DEFAULT_SEED;

/// hw_eventsd: fan and disk power management daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: $HW_EVENTSD_CONFIG, then
    /// ~/.config/hw_eventsd/config.yml, then /etc/hw_eventsd/config.yml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Replace every command, disk and sensor with a synthetic one
    #[arg(short = 's', long = "simulation")]
    pub simulation: bool,

    /// Seed of the simulated temperatures
    #[arg(long = "seed", default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Debug logging, includes every tick
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Log errors only
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Detach from the terminal
    #[arg(long = "daemonize")]
    pub daemonize: bool,
}

impl Cli {
    /// Log level selected by the flags; the most verbose one wins.
    pub fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Trace
        } else if self.verbose {
            LevelFilter::Debug
        } else if self.quiet {
            LevelFilter::Error
        } else {
            LevelFilter::Info
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["hw_eventsd"]).unwrap();
        assert_eq!(cli.config, None);
        assert!(!cli.simulation);
        assert_eq!(cli.seed, DEFAULT_SEED);
        assert_eq!(cli.log_level(), LevelFilter::Info);
    }

    #[test]
    fn flags() {
        let cli = Cli::try_parse_from([
            "hw_eventsd",
            "-c",
            "/etc/fans.yml",
            "--simulation",
            "--seed",
            "7",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/fans.yml")));
        assert!(cli.simulation);
        assert_eq!(cli.seed, 7);
        assert_eq!(cli.log_level(), LevelFilter::Debug);

        let cli = Cli::try_parse_from(["hw_eventsd", "-q", "-d"]).unwrap();
        assert_eq!(cli.log_level(), LevelFilter::Trace);
        let cli = Cli::try_parse_from(["hw_eventsd", "-q"]).unwrap();
        assert_eq!(cli.log_level(), LevelFilter::Error);
    }
}
