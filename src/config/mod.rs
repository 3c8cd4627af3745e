//! Configuration constants for BrinDB.
//!
//! Import constants from this module rather than defining them locally; see
//! `constants` for the dependency notes between values.

mod constants;

pub use constants::*;
