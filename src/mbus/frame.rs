//! # M-Bus Frame Codec
//!
//! This module validates and parses the long frames a meter answers with and
//! packs the short frames the reader sends.
//!
//! ## Frame layout
//!
//! ```text
//! short:  10 C A CS 16
//! long:   68 L L 68 C A CI <data...> CS 16      L = 3 + data.len()
//! ```
//!
//! `CS` is the modulo-256 sum of every byte from `C` up to the last data byte.
//!
//! ## Usage
//!
//! ```ignore
//! let frame = decode_long_frame(&bytes)?;
//! let (header, records) = parse_variable_data(&frame)?;
//! ```
//!
//! Structure is checked in a fixed order (size, start markers, stop marker,
//! length fields, checksum) and nothing is interpreted until all checks pass,
//! so a frame mangled on the optical link never reaches the record decoder.

use crate::constants::{
    MBUS_ADDRESS_BROADCAST_REPLY, MBUS_CONTROL_MASK_FCB, MBUS_CONTROL_MASK_REQ_UD2,
    MBUS_CONTROL_MASK_SND_NKE, MBUS_FRAME_ACK, MBUS_FRAME_LONG_MIN_LENGTH,
    MBUS_FRAME_LONG_OVERHEAD, MBUS_FRAME_LONG_START, MBUS_FRAME_SHORT_START, MBUS_FRAME_STOP,
};
use crate::error::MBusError;
use nom::{number::complete::be_u8, sequence::tuple, IResult};
use std::ops::Range;

/// Represents an M-Bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBusFrame {
    pub frame_type: MBusFrameType,
    pub control: u8,
    pub address: u8,
    pub control_information: u8,
    pub data: Vec<u8>,
    pub checksum: u8,
}

/// Represents the different types of M-Bus frames.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MBusFrameType {
    Ack,
    Short,
    /// Long frame without data (`L == 3`).
    Control,
    Long,
}

impl MBusFrame {
    /// Builds a short frame with its checksum filled in.
    pub fn short(control: u8, address: u8) -> Self {
        let mut frame = MBusFrame {
            frame_type: MBusFrameType::Short,
            control,
            address,
            control_information: 0,
            data: Vec::new(),
            checksum: 0,
        };
        frame.checksum = calculate_checksum(&frame);
        frame
    }

    /// Builds a long (or control, when `data` is empty) frame with its checksum filled in.
    pub fn long(control: u8, address: u8, control_information: u8, data: Vec<u8>) -> Self {
        let frame_type = if data.is_empty() {
            MBusFrameType::Control
        } else {
            MBusFrameType::Long
        };
        let mut frame = MBusFrame {
            frame_type,
            control,
            address,
            control_information,
            data,
            checksum: 0,
        };
        frame.checksum = calculate_checksum(&frame);
        frame
    }
}

/// SND_NKE: resets the meter's link layer.
pub fn snd_nke(address: u8) -> Vec<u8> {
    pack_frame(&MBusFrame::short(MBUS_CONTROL_MASK_SND_NKE, address))
}

/// REQ_UD2: requests class 2 user data. The frame count bit is always set.
pub fn req_ud2(address: u8) -> Vec<u8> {
    pack_frame(&MBusFrame::short(
        MBUS_CONTROL_MASK_REQ_UD2 | MBUS_CONTROL_MASK_FCB,
        address,
    ))
}

/// Packs an M-Bus frame into a byte vector.
pub fn pack_frame(frame: &MBusFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.data.len() + MBUS_FRAME_LONG_MIN_LENGTH);

    match frame.frame_type {
        MBusFrameType::Ack => out.push(MBUS_FRAME_ACK),
        MBusFrameType::Short => {
            out.extend_from_slice(&[
                MBUS_FRAME_SHORT_START,
                frame.control,
                frame.address,
                frame.checksum,
                MBUS_FRAME_STOP,
            ]);
        }
        MBusFrameType::Control | MBusFrameType::Long => {
            let len = (frame.data.len() + 3) as u8;
            out.extend_from_slice(&[
                MBUS_FRAME_LONG_START,
                len,
                len,
                MBUS_FRAME_LONG_START,
                frame.control,
                frame.address,
                frame.control_information,
            ]);
            out.extend_from_slice(&frame.data);
            out.push(frame.checksum);
            out.push(MBUS_FRAME_STOP);
        }
    }

    out
}

/// Modulo-256 sum of a byte run.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Calculates the checksum of an M-Bus frame.
pub fn calculate_checksum(frame: &MBusFrame) -> u8 {
    match frame.frame_type {
        MBusFrameType::Ack => 0,
        MBusFrameType::Short => frame.control.wrapping_add(frame.address),
        MBusFrameType::Control | MBusFrameType::Long => frame
            .control
            .wrapping_add(frame.address)
            .wrapping_add(frame.control_information)
            .wrapping_add(checksum(&frame.data)),
    }
}

/// Verifies the integrity of an M-Bus frame.
pub fn verify_frame(frame: &MBusFrame) -> Result<(), MBusError> {
    let calculated = calculate_checksum(frame);
    if frame.checksum != calculated {
        return Err(MBusError::ChecksumMismatch {
            expected: frame.checksum,
            calculated,
        });
    }
    Ok(())
}

fn long_header(input: &[u8]) -> IResult<&[u8], (u8, u8, u8, u8)> {
    tuple((be_u8, be_u8, be_u8, be_u8))(input)
}

/// Validates `bytes` as exactly one long frame and splits it into its fields.
///
/// The data block is returned undecoded.
pub fn decode_long_frame(bytes: &[u8]) -> Result<MBusFrame, MBusError> {
    if bytes.len() < MBUS_FRAME_LONG_MIN_LENGTH {
        return Err(MBusError::FrameTooShort {
            actual: bytes.len(),
            minimum: MBUS_FRAME_LONG_MIN_LENGTH,
        });
    }

    let (_, (start1, len1, len2, start2)) =
        long_header(bytes).map_err(|_| MBusError::FrameTooShort {
            actual: bytes.len(),
            minimum: MBUS_FRAME_LONG_MIN_LENGTH,
        })?;

    if start1 != MBUS_FRAME_LONG_START {
        return Err(MBusError::InvalidStartByte {
            offset: 0,
            found: start1,
        });
    }
    if start2 != MBUS_FRAME_LONG_START {
        return Err(MBusError::InvalidStartByte {
            offset: 3,
            found: start2,
        });
    }

    let last = bytes[bytes.len() - 1];
    if last != MBUS_FRAME_STOP {
        return Err(MBusError::InvalidStopByte(last));
    }

    let observed = bytes.len() - MBUS_FRAME_LONG_OVERHEAD;
    if len1 != len2 {
        return Err(MBusError::LengthMismatch {
            declared: len1 as usize,
            actual: len2 as usize,
        });
    }
    if (len1 as usize) < 3 || len1 as usize != observed {
        return Err(MBusError::LengthMismatch {
            declared: len1 as usize,
            actual: observed,
        });
    }

    let body = &bytes[4..bytes.len() - 2];
    let expected = bytes[bytes.len() - 2];
    let calculated = checksum(body);
    if expected != calculated {
        return Err(MBusError::ChecksumMismatch {
            expected,
            calculated,
        });
    }

    let frame_type = if len1 == 3 {
        MBusFrameType::Control
    } else {
        MBusFrameType::Long
    };

    Ok(MBusFrame {
        frame_type,
        control: body[0],
        address: body[1],
        control_information: body[2],
        data: body[3..].to_vec(),
        checksum: expected,
    })
}

/// Where a long-frame candidate sits in a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameScan {
    /// `68 L L 68` found and all `L + 6` bytes are present.
    Complete(Range<usize>),
    /// A candidate starts at `start` but more bytes are needed.
    Partial { start: usize },
    /// Nothing that can start a long frame (ACKs and line noise only).
    Nothing,
}

/// Finds the first long-frame candidate in `buf`, skipping ACK bytes and noise.
///
/// Only the `68 L L 68` envelope is checked; validation is left to
/// [`decode_long_frame`].
pub fn find_long_frame(buf: &[u8]) -> FrameScan {
    let mut from = 0;
    while let Some(pos) = buf[from..]
        .iter()
        .position(|&b| b == MBUS_FRAME_LONG_START)
    {
        let start = from + pos;
        let rest = &buf[start..];
        if rest.len() < 4 {
            return FrameScan::Partial { start };
        }
        if rest[1] == rest[2] && rest[3] == MBUS_FRAME_LONG_START {
            let total = rest[1] as usize + MBUS_FRAME_LONG_OVERHEAD;
            return if rest.len() >= total {
                FrameScan::Complete(start..start + total)
            } else {
                FrameScan::Partial { start }
            };
        }
        from = start + 1;
    }
    FrameScan::Nothing
}

/// True when `address` is a valid primary address to poll.
pub fn is_pollable_address(address: u8) -> bool {
    address <= 250 || address == MBUS_ADDRESS_BROADCAST_REPLY
}
