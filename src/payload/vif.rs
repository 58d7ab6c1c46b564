//! # Value Information Block
//!
//! Parses the VIF and its VIFE chain and resolves them through the tables in
//! [`crate::payload::vif_maps`] to a quantity, a base unit and a scale.

use crate::constants::{
    MBUS_DIB_MAX_EXTENSIONS, MBUS_DIB_VIF_EXTENSION_BIT, MBUS_DIB_VIF_EXTENSION_FB,
    MBUS_DIB_VIF_EXTENSION_FD, MBUS_DIB_VIF_PLAIN_TEXT, MBUS_DIB_VIF_WITHOUT_EXTENSION,
    MBUS_VALUE_INFO_BLOCK_CUSTOM_VIF_SIZE,
};
use crate::payload::data_encoding::decode_ascii_reversed;
use crate::payload::vif_maps::{lookup_primary_vif, lookup_vife_fd};
use nom::{bytes::complete::take, number::complete::be_u8, IResult};
use serde::Serialize;
use std::fmt;

/// Physical or administrative meaning of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Energy,
    Volume,
    Power,
    VolumeFlow,
    FlowTemperature,
    ReturnTemperature,
    TemperatureDifference,
    ExternalTemperature,
    Pressure,
    OnTime,
    OperatingTime,
    Date,
    DateTime,
    FabricationNumber,
    EnhancedIdentification,
    BusAddress,
    AccessNumber,
    Medium,
    Manufacturer,
    ParameterSet,
    ModelVersion,
    HardwareVersion,
    FirmwareVersion,
    SoftwareVersion,
    ErrorFlags,
    PlainText,
    ManufacturerSpecific,
    Unknown,
}

/// Base units every decoded value is normalised to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Unit {
    #[serde(rename = "kWh")]
    KilowattHour,
    #[serde(rename = "m³")]
    CubicMetre,
    #[serde(rename = "kW")]
    Kilowatt,
    #[serde(rename = "m³/h")]
    CubicMetrePerHour,
    #[serde(rename = "°C")]
    Celsius,
    #[serde(rename = "K")]
    Kelvin,
    #[serde(rename = "bar")]
    Bar,
    #[serde(rename = "days")]
    Day,
    #[serde(rename = "")]
    None,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::KilowattHour => "kWh",
            Unit::CubicMetre => "m³",
            Unit::Kilowatt => "kW",
            Unit::CubicMetrePerHour => "m³/h",
            Unit::Celsius => "°C",
            Unit::Kelvin => "K",
            Unit::Bar => "bar",
            Unit::Day => "days",
            Unit::None => "",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Conversion from the raw register value to the base unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Multiply by 10^n.
    Decimal(i8),
    /// Divide by n (seconds, minutes and hours to days).
    Divide(u32),
}

impl Scale {
    pub fn apply(self, raw: f64) -> f64 {
        match self {
            // Dividing by the positive power keeps 295 * 10^-3 at exactly 0.295.
            Scale::Decimal(e) if e < 0 => raw / 10f64.powi(-(e as i32)),
            Scale::Decimal(e) => raw * 10f64.powi(e as i32),
            Scale::Divide(d) => raw / d as f64,
        }
    }

    fn with_correction(self, exponent: i8) -> Scale {
        match self {
            Scale::Decimal(e) => Scale::Decimal(e.saturating_add(exponent)),
            other => other,
        }
    }
}

/// How the data field of a record is interpreted once the VIF is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// A physical magnitude, scaled into the base unit.
    Numeric,
    /// An opaque number such as a serial or version; never scaled.
    Identifier,
    /// Type F compound date and time.
    DateTime,
    /// Type G compound date.
    Date,
    /// Opaque bytes.
    Raw,
}

/// Decode behaviour for one VIF code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VifDescriptor {
    pub quantity: Quantity,
    pub unit: Unit,
    pub scale: Scale,
    pub kind: ValueKind,
}

impl VifDescriptor {
    pub const UNKNOWN: VifDescriptor = VifDescriptor {
        quantity: Quantity::Unknown,
        unit: Unit::None,
        scale: Scale::Decimal(0),
        kind: ValueKind::Numeric,
    };

    pub const fn new(quantity: Quantity, unit: Unit, scale: Scale, kind: ValueKind) -> Self {
        VifDescriptor {
            quantity,
            unit,
            scale,
            kind,
        }
    }
}

/// Represents the M-Bus value information block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInformationBlock {
    pub vif: u8,
    pub vife: Vec<u8>,
    /// Unit text of a plain-text VIF (`0x7C`/`0xFC`).
    pub plain_text: Option<String>,
}

impl ValueInformationBlock {
    /// Resolves the block through the static tables. Never fails: codes that
    /// are not in the tables resolve to [`VifDescriptor::UNKNOWN`].
    pub fn resolve(&self) -> Resolution {
        let code = self.vif & MBUS_DIB_VIF_WITHOUT_EXTENSION;

        if self.vif == MBUS_DIB_VIF_EXTENSION_FD {
            let descriptor = self
                .vife
                .first()
                .and_then(|v| lookup_vife_fd(v & MBUS_DIB_VIF_WITHOUT_EXTENSION))
                .copied()
                .unwrap_or(VifDescriptor::UNKNOWN);
            let orthogonal = self.vife.len() > 1;
            return Resolution {
                descriptor,
                orthogonal,
            };
        }

        if self.vif == MBUS_DIB_VIF_EXTENSION_FB {
            return Resolution {
                descriptor: VifDescriptor::UNKNOWN,
                orthogonal: false,
            };
        }

        let mut descriptor = match code {
            MBUS_DIB_VIF_PLAIN_TEXT => VifDescriptor::new(
                Quantity::PlainText,
                Unit::None,
                Scale::Decimal(0),
                ValueKind::Numeric,
            ),
            0x7F => VifDescriptor::new(
                Quantity::ManufacturerSpecific,
                Unit::None,
                Scale::Decimal(0),
                ValueKind::Raw,
            ),
            _ => lookup_primary_vif(code)
                .copied()
                .unwrap_or(VifDescriptor::UNKNOWN),
        };

        let mut orthogonal = false;
        for vife in &self.vife {
            match vife & MBUS_DIB_VIF_WITHOUT_EXTENSION {
                // Multiplicative correction factor 10^(nnn-6)
                e @ 0x70..=0x77 => {
                    descriptor.scale = descriptor.scale.with_correction((e & 0x07) as i8 - 6);
                }
                // Multiplicative correction factor 10^3
                0x7D => descriptor.scale = descriptor.scale.with_correction(3),
                _ => orthogonal = true,
            }
        }

        Resolution {
            descriptor,
            orthogonal,
        }
    }
}

/// Outcome of resolving a VIB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub descriptor: VifDescriptor,
    /// Set when an extension changes the meaning of the value (per time unit,
    /// error state, phase and the like) in a way the tables do not model.
    pub orthogonal: bool,
}

fn too_large(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Failure(nom::error::Error::new(
        input,
        nom::error::ErrorKind::TooLarge,
    ))
}

/// Parses a VIF, its VIFE chain and, for a plain-text VIF, the unit text.
pub fn parse_vib(input: &[u8]) -> IResult<&[u8], ValueInformationBlock> {
    let (mut input, vif) = be_u8(input)?;

    let mut vife = Vec::new();
    let mut more = vif & MBUS_DIB_VIF_EXTENSION_BIT != 0;
    while more {
        if vife.len() == MBUS_DIB_MAX_EXTENSIONS {
            return Err(too_large(input));
        }
        let (i, byte) = be_u8(input)?;
        input = i;
        vife.push(byte);
        more = byte & MBUS_DIB_VIF_EXTENSION_BIT != 0;
    }

    let mut plain_text = None;
    if vif & MBUS_DIB_VIF_WITHOUT_EXTENSION == MBUS_DIB_VIF_PLAIN_TEXT {
        let (i, len) = be_u8(input)?;
        if len > MBUS_VALUE_INFO_BLOCK_CUSTOM_VIF_SIZE {
            return Err(too_large(i));
        }
        let (i, text) = take(len)(i)?;
        input = i;
        plain_text = Some(decode_ascii_reversed(text));
    }

    Ok((
        input,
        ValueInformationBlock {
            vif,
            vife,
            plain_text,
        },
    ))
}
