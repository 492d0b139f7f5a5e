//! # Holdfast Codec
//!
//! Binary wire format primitives for Holdfast entity blobs.
//!
//! The format is a deterministic tag/length encoding:
//! - fixed-width big-endian integers
//! - `u32` length prefixes for strings, byte strings, and sequences
//! - one tag byte per field value (tags are assigned by the schema layer)
//!
//! Determinism matters: identity keys are hashes over encoded bytes, so
//! identical logical values must always encode to identical bytes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod reader;
mod writer;

pub use error::{CodecError, CodecResult};
pub use reader::{Reader, MAX_LENGTH};
pub use writer::Writer;
