//! VIF/VIFE Mapping Tables and Lookup Functions
//!
//! This module provides lookups for M-Bus Value Information Fields (VIF)
//! and the `0xFD` extension table as defined in EN 13757-3, restricted to the
//! codes a heat meter reports. Each family row expands to one entry per code
//! when the tables are first used; afterwards lookups are plain map reads.

use crate::payload::vif::{Quantity, Scale, Unit, ValueKind, VifDescriptor};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Families of eight (or four) consecutive codes whose last three (two) bits
/// select a decimal exponent: `(first code, count, quantity, unit, exponent of first code)`.
pub const VIF_DECIMAL_FAMILIES: &[(u8, u8, Quantity, Unit, i8)] = &[
    // 10^(n-3) Wh
    (0x00, 8, Quantity::Energy, Unit::KilowattHour, -6),
    // 10^(n-6) m³
    (0x10, 8, Quantity::Volume, Unit::CubicMetre, -6),
    // 10^(n-3) W
    (0x28, 8, Quantity::Power, Unit::Kilowatt, -6),
    // 10^(n-6) m³/h
    (0x38, 8, Quantity::VolumeFlow, Unit::CubicMetrePerHour, -6),
    (0x58, 4, Quantity::FlowTemperature, Unit::Celsius, -3),
    (0x5C, 4, Quantity::ReturnTemperature, Unit::Celsius, -3),
    (0x60, 4, Quantity::TemperatureDifference, Unit::Kelvin, -3),
    (0x64, 4, Quantity::ExternalTemperature, Unit::Celsius, -3),
    (0x68, 4, Quantity::Pressure, Unit::Bar, -3),
];

/// Duration families: the two low bits select seconds, minutes, hours or days.
pub const VIF_DURATION_FAMILIES: &[(u8, Quantity)] = &[
    (0x20, Quantity::OnTime),
    (0x24, Quantity::OperatingTime),
];

const DURATION_SCALES: [Scale; 4] = [
    Scale::Divide(86_400),
    Scale::Divide(1_440),
    Scale::Divide(24),
    Scale::Decimal(0),
];

/// Single codes that are not part of a family.
pub const VIF_SINGLE_CODES: &[(u8, Quantity, ValueKind)] = &[
    (0x6C, Quantity::Date, ValueKind::Date),
    (0x6D, Quantity::DateTime, ValueKind::DateTime),
    (0x78, Quantity::FabricationNumber, ValueKind::Identifier),
    (0x79, Quantity::EnhancedIdentification, ValueKind::Identifier),
    (0x7A, Quantity::BusAddress, ValueKind::Identifier),
];

/// `0xFD` extension codes (first VIFE with the extension bit masked off).
pub const VIFE_FD_CODES: &[(u8, Quantity)] = &[
    (0x08, Quantity::AccessNumber),
    (0x09, Quantity::Medium),
    (0x0A, Quantity::Manufacturer),
    (0x0B, Quantity::ParameterSet),
    (0x0C, Quantity::ModelVersion),
    (0x0D, Quantity::HardwareVersion),
    (0x0E, Quantity::FirmwareVersion),
    (0x0F, Quantity::SoftwareVersion),
    (0x17, Quantity::ErrorFlags),
];

static PRIMARY_VIF_TABLE: Lazy<HashMap<u8, VifDescriptor>> = Lazy::new(|| {
    let mut table = HashMap::new();

    for &(first, count, quantity, unit, exponent) in VIF_DECIMAL_FAMILIES {
        for n in 0..count {
            let scale = Scale::Decimal(exponent + n as i8);
            table.insert(
                first + n,
                VifDescriptor::new(quantity, unit, scale, ValueKind::Numeric),
            );
        }
    }

    for &(first, quantity) in VIF_DURATION_FAMILIES {
        for (n, scale) in DURATION_SCALES.iter().enumerate() {
            table.insert(
                first + n as u8,
                VifDescriptor::new(quantity, Unit::Day, *scale, ValueKind::Numeric),
            );
        }
    }

    for &(code, quantity, kind) in VIF_SINGLE_CODES {
        table.insert(
            code,
            VifDescriptor::new(quantity, Unit::None, Scale::Decimal(0), kind),
        );
    }

    table
});

static VIFE_FD_TABLE: Lazy<HashMap<u8, VifDescriptor>> = Lazy::new(|| {
    VIFE_FD_CODES
        .iter()
        .map(|&(code, quantity)| {
            (
                code,
                VifDescriptor::new(
                    quantity,
                    Unit::None,
                    Scale::Decimal(0),
                    ValueKind::Identifier,
                ),
            )
        })
        .collect()
});

/// Looks up a primary VIF code (extension bit already masked off).
pub fn lookup_primary_vif(code: u8) -> Option<&'static VifDescriptor> {
    PRIMARY_VIF_TABLE.get(&code)
}

/// Looks up a code from the `0xFD` extension table.
pub fn lookup_vife_fd(code: u8) -> Option<&'static VifDescriptor> {
    VIFE_FD_TABLE.get(&code)
}
