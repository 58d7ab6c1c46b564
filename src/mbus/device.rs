//! Fixed header of a variable data response (CI `0x72`).
//!
//! ```text
//! ID(4, BCD) MAN(2) VER(1) MED(1) ACC(1) STATUS(1) SIG(2)
//! ```

use crate::constants::{MBUS_CONTROL_INFO_RESP_VARIABLE, MBUS_VARIABLE_DATA_HEADER_LENGTH};
use crate::error::MBusError;
use crate::mbus::frame::MBusFrame;
use crate::payload::data_encoding::{decode_bcd, decode_manufacturer};
use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Status byte of the variable data header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct StatusFlags: u8 {
        const APPLICATION_BUSY = 0x01;
        const APPLICATION_ERROR = 0x02;
        const POWER_LOW = 0x04;
        const PERMANENT_ERROR = 0x08;
        const TEMPORARY_ERROR = 0x10;
    }
}

impl StatusFlags {
    pub fn has_error(self) -> bool {
        self.intersects(
            StatusFlags::APPLICATION_ERROR
                | StatusFlags::PERMANENT_ERROR
                | StatusFlags::TEMPORARY_ERROR,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceHeader {
    /// `None` when the identification field is not valid BCD.
    pub identification: Option<u32>,
    pub manufacturer: String,
    pub version: u8,
    pub medium: u8,
    pub access_number: u8,
    pub status: StatusFlags,
    pub signature: u16,
}

impl DeviceHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, MBusError> {
        if bytes.len() < MBUS_VARIABLE_DATA_HEADER_LENGTH {
            return Err(MBusError::malformed(
                0,
                format!(
                    "variable data header needs {} bytes, got {}",
                    MBUS_VARIABLE_DATA_HEADER_LENGTH,
                    bytes.len()
                ),
            ));
        }

        let identification = decode_bcd(&bytes[0..4])
            .ok()
            .and_then(|id| u32::try_from(id).ok());

        Ok(DeviceHeader {
            identification,
            manufacturer: decode_manufacturer([bytes[4], bytes[5]]),
            version: bytes[6],
            medium: bytes[7],
            access_number: bytes[8],
            status: StatusFlags::from_bits_retain(bytes[9]),
            signature: u16::from_le_bytes([bytes[10], bytes[11]]),
        })
    }

    pub fn medium_name(&self) -> &'static str {
        medium_name(self.medium)
    }
}

/// Splits the data block of a CI `0x72` response into its header and the record area.
pub fn parse_variable_data(frame: &MBusFrame) -> Result<(DeviceHeader, &[u8]), MBusError> {
    if frame.control_information != MBUS_CONTROL_INFO_RESP_VARIABLE {
        return Err(MBusError::malformed(
            0,
            format!(
                "unsupported control information 0x{:02X}",
                frame.control_information
            ),
        ));
    }
    let header = DeviceHeader::parse(&frame.data)?;
    Ok((header, &frame.data[MBUS_VARIABLE_DATA_HEADER_LENGTH..]))
}

/// Medium names from EN 13757-3 table 3.
pub fn medium_name(medium: u8) -> &'static str {
    match medium {
        0x00 => "Other",
        0x01 => "Oil",
        0x02 => "Electricity",
        0x03 => "Gas",
        0x04 => "Heat (outlet)",
        0x05 => "Steam",
        0x06 => "Warm water",
        0x07 => "Water",
        0x08 => "Heat cost allocator",
        0x09 => "Compressed air",
        0x0A => "Cooling (outlet)",
        0x0B => "Cooling (inlet)",
        0x0C => "Heat (inlet)",
        0x0D => "Heat / cooling",
        0x0E => "Bus / system",
        0x15 => "Hot water",
        0x16 => "Cold water",
        0x17 => "Dual water",
        0x18 => "Pressure",
        0x19 => "A/D converter",
        _ => "Unknown",
    }
}
