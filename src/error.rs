//!
//! error taxonomy of the crate
//!
//! Structural/configuration errors (`UndefinedParameter`,
//! `InvalidPriorConfiguration`) fail fast and are not retried.
//! `NoFinitePath` is surfaced to the caller, which may retry with different
//! input. Per-example numerical failures during EM are handled locally by
//! the trainers (skip and warn) and never appear here; `NoTrainableData` is
//! raised only when every example fails.
//!
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// an expression referenced a parameter name absent from the assignment
    UndefinedParameter(String),
    /// a prior was configured over an inconsistent constraint set
    InvalidPriorConfiguration(String),
    /// Viterbi traceback requested but no finite-weight path exists
    NoFinitePath,
    /// every training example had non-finite likelihood
    NoTrainableData,
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UndefinedParameter(name) => {
                write!(f, "undefined parameter: {}", name)
            }
            Error::InvalidPriorConfiguration(reason) => {
                write!(f, "invalid prior configuration: {}", reason)
            }
            Error::NoFinitePath => {
                write!(f, "no finite-weight path through the machine")
            }
            Error::NoTrainableData => {
                write!(f, "all training examples have non-finite likelihood")
            }
        }
    }
}

impl std::error::Error for Error {}
