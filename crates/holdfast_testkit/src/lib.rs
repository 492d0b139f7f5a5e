//! # Holdfast Testkit
//!
//! Test utilities for Holdfast.
//!
//! This crate provides:
//! - A small sample schema (items, authors, a derived shelf) with
//!   reaction and derivation rules wired up
//! - Space and backend construction helpers
//! - Property-based generators using proptest
//!
//! The workspace's cross-crate integration tests live in this crate's
//! `tests/` directory, where they can see every layer at once.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
