use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::{
    common::error::Result,
    network::Transport,
    simulator::{DelayBounds, Timing},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum TransportKind {
    Memory,
    Tcp,
}

/// Ricart–Agrawala mutual exclusion between simulated processes.
#[derive(Parser, Debug, Clone)]
#[command(name = "ra-mutex", version)]
pub struct Args {
    /// Number of processes competing for the resource.
    #[arg(short = 'n', long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub processes: u32,

    #[arg(long, value_enum, default_value_t = TransportKind::Memory)]
    pub transport: TransportKind,

    /// First TCP port; process i listens on base_port + i - 1.
    #[arg(long, default_value_t = 18813)]
    pub base_port: u16,

    /// Lower bound of the thinking delay, in seconds.
    #[arg(long, default_value_t = 5)]
    pub thinking_min: u64,

    /// Upper bound of the thinking delay, in seconds.
    #[arg(long, default_value_t = 5)]
    pub thinking_max: u64,

    /// Lower bound of the resource usage delay, in seconds.
    #[arg(long, default_value_t = 10)]
    pub using_min: u64,

    /// Upper bound of the resource usage delay, in seconds.
    #[arg(long, default_value_t = 10)]
    pub using_max: u64,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "ra_mutex=info")]
    pub log_filter: String,
}

impl Args {
    pub fn timing(&self) -> Result<Timing> {
        Ok(Timing {
            thinking: DelayBounds::new(
                Duration::from_secs(self.thinking_min),
                Duration::from_secs(self.thinking_max),
            )?,
            using: DelayBounds::new(
                Duration::from_secs(self.using_min),
                Duration::from_secs(self.using_max),
            )?,
        })
    }

    pub fn transport(&self) -> Transport {
        match self.transport {
            TransportKind::Memory => Transport::Memory,
            TransportKind::Tcp => Transport::Tcp {
                base_port: self.base_port,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["ra-mutex"]);

        assert_eq!(args.processes, 3);
        assert_eq!(args.transport(), Transport::Memory);
        assert_eq!(args.timing().unwrap(), Timing::default());
    }

    #[test]
    fn test_tcp_and_timing_flags() {
        let args = Args::parse_from([
            "ra-mutex",
            "-n",
            "5",
            "--transport",
            "tcp",
            "--base-port",
            "20000",
            "--using-max",
            "30",
        ]);

        assert_eq!(args.processes, 5);
        assert_eq!(args.transport(), Transport::Tcp { base_port: 20000 });
        assert_eq!(args.timing().unwrap().using.max(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Args::try_parse_from(["ra-mutex", "-n", "0"]).is_err());

        let args = Args::parse_from(["ra-mutex", "--thinking-min", "9", "--thinking-max", "2"]);
        assert!(args.timing().is_err());
    }
}
