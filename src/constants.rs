//! M-Bus Protocol Constants
//!
//! This module defines constants used by the optical M-Bus reader,
//! based on the EN 13757-2/-3 standards.

// ----------------------------------------------------------------------------
// Frame markers
// ----------------------------------------------------------------------------

/// Single character acknowledge
pub const MBUS_FRAME_ACK: u8 = 0xE5;

/// Short frame start byte
pub const MBUS_FRAME_SHORT_START: u8 = 0x10;

/// Long/control frame start byte (appears twice)
pub const MBUS_FRAME_LONG_START: u8 = 0x68;

/// Stop byte for short and long frames
pub const MBUS_FRAME_STOP: u8 = 0x16;

/// `68 L L 68` + checksum + stop
pub const MBUS_FRAME_LONG_OVERHEAD: usize = 6;

/// Smallest long frame: a control frame carrying C, A and CI only
pub const MBUS_FRAME_LONG_MIN_LENGTH: usize = MBUS_FRAME_LONG_OVERHEAD + 3;

/// Short frame: `10 C A CS 16`
pub const MBUS_FRAME_SHORT_LENGTH: usize = 5;

// ----------------------------------------------------------------------------
// Addresses
// ----------------------------------------------------------------------------

/// Broadcast with reply; any single meter on the optical head answers
pub const MBUS_ADDRESS_BROADCAST_REPLY: u8 = 0xFE;

/// Broadcast without reply
pub const MBUS_ADDRESS_BROADCAST_NOREPLY: u8 = 0xFF;

// ----------------------------------------------------------------------------
// Control field
// ----------------------------------------------------------------------------

pub const MBUS_CONTROL_MASK_SND_NKE: u8 = 0x40;
pub const MBUS_CONTROL_MASK_REQ_UD2: u8 = 0x5B; // includes DIR M2S and FCV
pub const MBUS_CONTROL_MASK_RSP_UD: u8 = 0x08; // S2M response

pub const MBUS_CONTROL_MASK_FCB: u8 = 0x20;

// ----------------------------------------------------------------------------
// Control information (CI)
// ----------------------------------------------------------------------------

pub const MBUS_CONTROL_INFO_RESP_VARIABLE: u8 = 0x72;

/// Length of the fixed header in front of variable data records
pub const MBUS_VARIABLE_DATA_HEADER_LENGTH: usize = 12;

// ----------------------------------------------------------------------------
// Data Information Block
// ----------------------------------------------------------------------------

/// DIF (Data Information Field) mask for data length
pub const MBUS_DATA_RECORD_DIF_MASK_DATA: u8 = 0x0F;

/// DIF mask for function
pub const MBUS_DATA_RECORD_DIF_MASK_FUNCTION: u8 = 0x30;

/// DIF mask for storage number
pub const MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO: u8 = 0x40;

/// DIFE (Data Information Field Extension) mask for storage number
pub const MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO: u8 = 0x0F;

/// DIFE mask for tariff
pub const MBUS_DATA_RECORD_DIFE_MASK_TARIFF: u8 = 0x30;

/// DIFE mask for device (subunit)
pub const MBUS_DATA_RECORD_DIFE_MASK_DEVICE: u8 = 0x40;

/// DIF/DIFE extension bit
pub const MBUS_DIB_DIF_EXTENSION_BIT: u8 = 0x80;

/// DIF manufacturer specific
pub const MBUS_DIB_DIF_MANUFACTURER_SPECIFIC: u8 = 0x0F;

/// DIF more records follow
pub const MBUS_DIB_DIF_MORE_RECORDS_FOLLOW: u8 = 0x1F;

/// DIF idle filler
pub const MBUS_DIB_DIF_IDLE_FILLER: u8 = 0x2F;

/// EN 13757-3 allows at most ten DIFE/VIFE bytes per block
pub const MBUS_DIB_MAX_EXTENSIONS: usize = 10;

// ----------------------------------------------------------------------------
// Value Information Block
// ----------------------------------------------------------------------------

/// VIF without extension
pub const MBUS_DIB_VIF_WITHOUT_EXTENSION: u8 = 0x7F;

/// VIF/VIFE extension bit
pub const MBUS_DIB_VIF_EXTENSION_BIT: u8 = 0x80;

/// Plain-text VIF: unit follows as length-prefixed ASCII
pub const MBUS_DIB_VIF_PLAIN_TEXT: u8 = 0x7C;

/// First extension table (EN 13757-3 table 14)
pub const MBUS_DIB_VIF_EXTENSION_FD: u8 = 0xFD;

/// Second extension table (EN 13757-3 table 12)
pub const MBUS_DIB_VIF_EXTENSION_FB: u8 = 0xFB;

/// Custom VIF size
pub const MBUS_VALUE_INFO_BLOCK_CUSTOM_VIF_SIZE: u8 = 16;

// ----------------------------------------------------------------------------
// Optical head wake-up
// ----------------------------------------------------------------------------

/// Byte repeated during the photodiode wake window
pub const MBUS_WAKEUP_BYTE: u8 = 0x55;

/// Baud rate for both wake-up (8N1) and commands (8E1)
pub const MBUS_OPTICAL_BAUDRATE: u32 = 2400;

/// Thermal power factor for water: kW per (m³/h · K)
pub const WATER_HEAT_CAPACITY_KW_PER_M3H_K: f64 = 1.163;
