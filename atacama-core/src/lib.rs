//! Shared primitives, traits, and utilities for the atacama toolkit.
//!
//! `atacama-core` provides the foundation the other atacama crates build on:
//!
//! - **Error types** — [`AtacamaError`], [`ErrorCategory`] and [`Result`]
//! - **Traits** — [`Summarizable`], [`Scored`]
//! - **Randomness** — the seeded [`Xorshift64`] generator

pub mod error;
pub mod rng;
pub mod traits;

pub use error::{AtacamaError, ErrorCategory, Result};
pub use rng::Xorshift64;
pub use traits::*;
