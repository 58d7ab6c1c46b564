//! The mbus module contains the link-layer side of the reader: frame codec,
//! variable data header, and the transports that carry frames to and from the meter.

pub mod device;
pub mod frame;
pub mod serial;
pub mod serial_mock;

pub use device::{parse_variable_data, DeviceHeader, StatusFlags};
pub use frame::*;
pub use serial::{SerialTransport, Transport};
pub use serial_mock::{MockEvent, MockResponse, MockTransport};
