//! The payload module contains the components responsible for decoding the
//! variable data block of an M-Bus response into typed records.

pub mod data_encoding;
pub mod record;
pub mod vif;
pub mod vif_maps;

pub use data_encoding::*;
pub use record::*;
pub use vif::*;
pub use vif_maps::*;
