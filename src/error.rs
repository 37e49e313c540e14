use crate::domain::task::{TaskId, TaskStatus};
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MarketError>;

/// Error taxonomy for the marketplace engine.
///
/// Precondition violations (`InsufficientFunds`, `InvalidTransition`,
/// `Unauthorized`) are returned to the caller and never retried.
/// `Persistence` and `Ledger` failures inside a fund-moving operation trigger
/// the compensating-refund path; `CompensationFailed` means that path itself
/// failed and an operator has to reconcile the escrow by hand.
#[derive(Error, Debug)]
pub enum MarketError {
    #[error("{principal} has {available}, needs {required}")]
    InsufficientFunds {
        principal: String,
        required: Decimal,
        available: Decimal,
    },
    #[error("cannot {action} task {task} while it is {status}")]
    InvalidTransition {
        task: TaskId,
        status: TaskStatus,
        action: &'static str,
    },
    #[error("{principal} may not {action} task {task}")]
    Unauthorized {
        principal: String,
        task: TaskId,
        action: &'static str,
    },
    #[error("no such task: {0}")]
    UnknownTask(TaskId),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("ledger failure: {0}")]
    Ledger(String),
    #[error(
        "refund of {amount} to {principal} for task {task} failed; contact an administrator"
    )]
    CompensationFailed {
        task: TaskId,
        principal: String,
        amount: Decimal,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid command: {0}")]
    Command(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
