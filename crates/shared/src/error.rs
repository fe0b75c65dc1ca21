use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("payload line {line} is not a number: {raw:?}")]
    NotANumber { line: usize, raw: String },
    #[error("expected {expected} payload values, got {actual}")]
    ValueCount { expected: usize, actual: usize },
}
