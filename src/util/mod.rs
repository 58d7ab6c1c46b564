//! # Utility Modules
//!
//! Small helpers shared by the library, the CLI and the tests.

pub mod hex;

pub use hex::{decode_hex, encode_hex_upper, pretty_hex};
