use crate::error::{MarketError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Deposit,
    Post,
    Claim,
    Submit,
    Approve,
    Reject,
    Cancel,
    Sweep,
}

/// One marketplace command as read from the driver input.
///
/// `detail` carries the free-text column: the title for `post`, the reason
/// for `reject`. Columns that an op does not use may be left empty.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Command {
    pub op: Op,
    pub actor: Option<String>,
    pub task: Option<u64>,
    pub amount: Option<Decimal>,
    pub detail: Option<String>,
}

/// Reads commands from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over
/// `Result<Command>`. It handles whitespace trimming and flexible record
/// lengths automatically.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes commands, so
    /// large scripts stream without loading everything into memory.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(MarketError::from))
    }
}
