//!
//! fstem: weighted finite-state transducers with symbolic weights,
//! banded/checkpointed dynamic programming, and EM parameter fitting.
//!
//! The same engine serves sequence-to-sequence transducer training
//! (Baum-Welch over symbol pairs) and continuous-trace decoding
//! (Gaussian-emission basecalling over event summaries).
//!
pub mod basecall;
pub mod common;
pub mod dp;
pub mod error;
pub mod expr;
pub mod fit;
pub mod gaussian;
pub mod machine;
pub mod params;
pub mod prior;
pub mod prob;
pub mod trace;

#[macro_use]
extern crate approx;
