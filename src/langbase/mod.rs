//! Langbase Pipes client used for both the simulated client and the evaluator.

mod client;
mod types;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use client::LangbaseClient;
pub use types::*;
