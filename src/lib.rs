//! # ultralite-mbus - M-Bus reader for heat meters on an optical head
//!
//! Reads a heat meter through an infrared optical head on a serial port,
//! decodes its M-Bus response and keeps a polling consumer supplied with the
//! latest readings, riding out the misses an optical link produces.
//!
//! ## Features
//!
//! - Wake-up handshake and command transmission at 2400 baud (8N1 / 8E1)
//! - Long-frame validation: markers, length fields and checksum
//! - Variable data record decoding: DIF/DIFE, VIF/VIFE, BCD, binary and time points
//! - Named reading snapshots with derived temperature difference and thermal power
//! - Polling coordinator with exponential backoff and last-known-good values
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ultralite_mbus::{MeterConfig, MeterCoordinator};
//!
//! # async fn run() -> Result<(), ultralite_mbus::MBusError> {
//! let coordinator = Arc::new(MeterCoordinator::with_serial(MeterConfig::new("/dev/ttyUSB0"))?);
//! let outcome = coordinator.refresh().await;
//! if let Some(snapshot) = coordinator.snapshot() {
//!     println!("{} -> {:?}", snapshot.device_id(), outcome.is_success());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Offline decoding of a captured frame:
//!
//! ```rust
//! use ultralite_mbus::{decode_hex, ReadingSnapshot};
//!
//! let bytes = decode_hex("68 03 03 68 08 01 72 7B 16").unwrap();
//! assert!(ReadingSnapshot::from_frame_bytes(&bytes, chrono::Utc::now()).is_err());
//! ```

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod mbus;
pub mod payload;
pub mod snapshot;
pub mod util;

pub use crate::config::{MeterConfig, RetryPolicy, TransportConfig};
pub use crate::coordinator::{
    run_poll_cycle, Availability, MeterCoordinator, PollOutcome, PollPhase, PollState,
    PollerHandle, Trigger,
};
pub use crate::error::{ErrorKind, MBusError};
pub use crate::logging::{init_logger, init_logger_with_level};

// Link layer
pub use mbus::{
    decode_long_frame, parse_variable_data, DeviceHeader, MBusFrame, MBusFrameType, MockTransport,
    SerialTransport, Transport,
};

// Records and readings
pub use payload::{parse_records, DataRecord, Quantity, RecordSet, RecordValue, Unit};
pub use snapshot::{
    build_snapshot, thermal_power_kw, Reading, ReadingKind, ReadingSnapshot, ReadingValue,
};
pub use util::hex::decode_hex;
