//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `pinsub` application.
//!
//! It centralizes the error taxonomy and the logging setup so the client,
//! configuration and pin layers report failures the same way.

pub mod error;
pub mod logging;
