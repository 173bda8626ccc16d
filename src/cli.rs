use crate::ingest::DEFAULT_BATCH_SIZE;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "temperature-sidecar",
    version,
    about = "Temperature feed ingestion and query API"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Subscribe to the feed and persist readings in batches.
    Consume {
        /// Readings per bulk write; must be at least 1.
        #[arg(default_value_t = DEFAULT_BATCH_SIZE as i64, allow_negative_numbers = true)]
        batch_size: i64,
    },
    /// Serve the query and control API only.
    Serve,
    /// Consume the feed and serve the API from one process.
    Run {
        #[arg(default_value_t = DEFAULT_BATCH_SIZE as i64, allow_negative_numbers = true)]
        batch_size: i64,
    },
    /// Turn ingestion on or off.
    SetStatus {
        /// "on" or "off", any case.
        status: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_defaults_to_ten() {
        let args = Args::try_parse_from(["temperature-sidecar", "consume"]).unwrap();
        assert!(matches!(args.command, Command::Consume { batch_size: 10 }));
    }

    #[test]
    fn negative_batch_size_reaches_validation() {
        let args = Args::try_parse_from(["temperature-sidecar", "run", "-5"]).unwrap();
        assert!(matches!(args.command, Command::Run { batch_size: -5 }));
    }

    #[test]
    fn set_status_takes_raw_value() {
        let args = Args::try_parse_from(["temperature-sidecar", "set-status", "OFF"]).unwrap();
        match args.command {
            Command::SetStatus { status } => assert_eq!(status, "OFF"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
