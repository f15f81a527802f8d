//! Interactive control surface.
//!
//! ```text
//! list            state, clock and queue sizes of every process
//! time-cs <secs>  upper bound of the resource usage delay
//! time-p <secs>   upper bound of the thinking delay
//! exit            stop every process
//! ```

use std::{fmt::Write as _, str::FromStr, time::Duration};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::{common::error::Result, mutex::Status, network::Cluster};

pub const USAGE: &str = "commands: list | time-cs <secs> | time-p <secs> | exit";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Command {
    List,
    SetUsingMax(Duration),
    SetThinkingMax(Duration),
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("{0} takes exactly one argument")]
    Arity(&'static str),
    #[error("expected whole seconds, got {0:?}")]
    BadSeconds(String),
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(ParseCommandError::Empty);
        };
        let args: Vec<&str> = words.collect();

        match name.to_ascii_lowercase().as_str() {
            "list" => Ok(Command::List),
            "exit" | "quit" => Ok(Command::Exit),
            "time-cs" => seconds("time-cs", &args).map(Command::SetUsingMax),
            "time-p" => seconds("time-p", &args).map(Command::SetThinkingMax),
            _ => Err(ParseCommandError::Unknown(name.to_string())),
        }
    }
}

fn seconds(command: &'static str, args: &[&str]) -> std::result::Result<Duration, ParseCommandError> {
    match args {
        [value] => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ParseCommandError::BadSeconds(value.to_string())),
        _ => Err(ParseCommandError::Arity(command)),
    }
}

pub fn format_statuses(statuses: &[Status]) -> String {
    let mut out = String::new();
    for status in statuses {
        let pending = match status.pending {
            Some(record) => format!("({}, {})", record.timestamp, record.requester),
            None => "-".to_string(),
        };
        let _ = writeln!(
            out,
            "{}, {}, clock {}, request {}, replies {}, deferred {}",
            status.id, status.state, status.clock, pending, status.replies, status.deferred
        );
    }
    out
}

/// Reads commands until `exit` or end of input. The caller shuts the cluster
/// down afterwards.
pub async fn run<R>(cluster: &Cluster, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    println!("{USAGE}");

    while let Some(line) = lines.next_line().await? {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(ParseCommandError::Empty) => continue,
            Err(err) => {
                println!("{err}; {USAGE}");
                continue;
            }
        };
        debug!(?command, "console command");

        match command {
            Command::List => print!("{}", format_statuses(&cluster.statuses())),
            Command::SetUsingMax(max) => match cluster.set_using_max(max) {
                Ok(bounds) => println!("resource usage delay now {:?}..={:?}", bounds.min(), bounds.max()),
                Err(err) => println!("{err}"),
            },
            Command::SetThinkingMax(max) => match cluster.set_thinking_max(max) {
                Ok(bounds) => println!("thinking delay now {:?}..={:?}", bounds.min(), bounds.max()),
                Err(err) => println!("{err}"),
            },
            Command::Exit => break,
        }
    }

    Ok(())
}
