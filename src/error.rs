use crate::models::Period;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the cohort engine itself. File and CLI failures are
/// reported through `anyhow` at the application boundary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("period {0} is not a member of the period sequence")]
    InvalidPeriod(Period),

    #[error("period sequence is empty")]
    EmptySequence,

    #[error("period sequence must be strictly increasing (found {prev} before {next})")]
    UnsortedSequence { prev: Period, next: Period },

    #[error("record {row} is missing required field '{field}'")]
    MissingField { field: &'static str, row: usize },

    #[error("primary snapshot for period {period} was already ingested")]
    PrimaryAlreadyIngested { period: Period },

    #[error("sub-period {got} of period {period} folded after sub-period {last}")]
    SubPeriodOutOfOrder { period: Period, last: u8, got: u8 },

    #[error("cannot derive period and sub-period from file name '{0}'")]
    FileName(String),
}
