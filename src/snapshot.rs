//! # Reading Snapshots
//!
//! Maps the decoded records of one response to the fixed set of named
//! readings a consumer displays, and adds the derived ones.
//!
//! Only present-value records are eligible (storage 0, tariff 0, subunit 0,
//! instantaneous, no unmodelled VIFE). When a quantity appears more than once
//! the first record wins. `device_id` is mandatory; every other reading is
//! simply left out when the meter did not send it.

use crate::constants::WATER_HEAT_CAPACITY_KW_PER_M3H_K;
use crate::error::MBusError;
use crate::mbus::device::{parse_variable_data, DeviceHeader};
use crate::mbus::frame::decode_long_frame;
use crate::payload::record::{parse_records, DataRecord, RecordValue};
use crate::payload::vif::{Quantity, Unit};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Logical reading names, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    DeviceId,
    EnergyTotal,
    VolumeTotal,
    VolumeFlow,
    FlowTemperature,
    ReturnTemperature,
    DeltaTemperature,
    ThermalPower,
    OperatingTimeDays,
    SerialNumber,
    FirmwareVersion,
    SoftwareVersion,
    MeterTime,
}

impl ReadingKind {
    pub const ALL: [ReadingKind; 13] = [
        ReadingKind::DeviceId,
        ReadingKind::EnergyTotal,
        ReadingKind::VolumeTotal,
        ReadingKind::VolumeFlow,
        ReadingKind::FlowTemperature,
        ReadingKind::ReturnTemperature,
        ReadingKind::DeltaTemperature,
        ReadingKind::ThermalPower,
        ReadingKind::OperatingTimeDays,
        ReadingKind::SerialNumber,
        ReadingKind::FirmwareVersion,
        ReadingKind::SoftwareVersion,
        ReadingKind::MeterTime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ReadingKind::DeviceId => "device_id",
            ReadingKind::EnergyTotal => "energy_total",
            ReadingKind::VolumeTotal => "volume_total",
            ReadingKind::VolumeFlow => "volume_flow",
            ReadingKind::FlowTemperature => "flow_temperature",
            ReadingKind::ReturnTemperature => "return_temperature",
            ReadingKind::DeltaTemperature => "delta_temperature",
            ReadingKind::ThermalPower => "thermal_power",
            ReadingKind::OperatingTimeDays => "operating_time_days",
            ReadingKind::SerialNumber => "serial_number",
            ReadingKind::FirmwareVersion => "firmware_version",
            ReadingKind::SoftwareVersion => "software_version",
            ReadingKind::MeterTime => "meter_time",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// The reading a record of `quantity` feeds, if any.
    fn for_quantity(quantity: Quantity) -> Option<Self> {
        match quantity {
            Quantity::Energy => Some(ReadingKind::EnergyTotal),
            Quantity::Volume => Some(ReadingKind::VolumeTotal),
            Quantity::VolumeFlow => Some(ReadingKind::VolumeFlow),
            Quantity::FlowTemperature => Some(ReadingKind::FlowTemperature),
            Quantity::ReturnTemperature => Some(ReadingKind::ReturnTemperature),
            Quantity::TemperatureDifference => Some(ReadingKind::DeltaTemperature),
            Quantity::OperatingTime => Some(ReadingKind::OperatingTimeDays),
            Quantity::FabricationNumber => Some(ReadingKind::SerialNumber),
            Quantity::FirmwareVersion => Some(ReadingKind::FirmwareVersion),
            Quantity::SoftwareVersion => Some(ReadingKind::SoftwareVersion),
            Quantity::DateTime => Some(ReadingKind::MeterTime),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Integer(u64),
    Text(String),
}

impl ReadingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Number(v) => Some(*v),
            ReadingValue::Integer(v) => Some(*v as f64),
            ReadingValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ReadingValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Number(v) => write!(f, "{v}"),
            ReadingValue::Integer(v) => write!(f, "{v}"),
            ReadingValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub value: ReadingValue,
    pub unit: Unit,
}

impl Reading {
    fn number(value: f64, unit: Unit) -> Self {
        Reading {
            value: ReadingValue::Number(value),
            unit,
        }
    }

    fn text(value: String) -> Self {
        Reading {
            value: ReadingValue::Text(value),
            unit: Unit::None,
        }
    }
}

/// Every named reading of one successful poll. Never modified once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingSnapshot {
    pub taken_at: DateTime<Utc>,
    pub device: Option<DeviceHeader>,
    pub readings: BTreeMap<ReadingKind, Reading>,
}

impl ReadingSnapshot {
    /// Runs the whole decode pipeline on one captured response frame.
    pub fn from_frame_bytes(bytes: &[u8], taken_at: DateTime<Utc>) -> Result<Self, MBusError> {
        let frame = decode_long_frame(bytes)?;
        let (header, payload) = parse_variable_data(&frame)?;
        let records = parse_records(payload)?;
        log::debug!(
            "decoded {} records from {} ({})",
            records.len(),
            header.manufacturer,
            header.medium_name()
        );
        build_snapshot(Some(header), &records.records, taken_at)
    }

    pub fn get(&self, kind: ReadingKind) -> Option<&Reading> {
        self.readings.get(&kind)
    }

    pub fn value(&self, kind: ReadingKind) -> Option<f64> {
        self.get(kind).and_then(|r| r.value.as_f64())
    }

    pub fn device_id(&self) -> &str {
        self.get(ReadingKind::DeviceId)
            .and_then(|r| r.value.as_text())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReadingKind, &Reading)> {
        self.readings.iter()
    }
}

/// Thermal power in kW of water flowing at `flow_m3h` with a temperature
/// difference of `delta_k`.
pub fn thermal_power_kw(flow_m3h: f64, delta_k: f64) -> f64 {
    WATER_HEAT_CAPACITY_KW_PER_M3H_K * flow_m3h * delta_k
}

fn reading_for(kind: ReadingKind, record: &DataRecord) -> Option<Reading> {
    match (&record.value, kind) {
        (RecordValue::Identifier(id), ReadingKind::SerialNumber) => {
            Some(Reading::text(format!("{id:08}")))
        }
        (RecordValue::Identifier(v), _) => Some(Reading {
            value: ReadingValue::Integer(*v),
            unit: Unit::None,
        }),
        (RecordValue::Numeric(v), _) => Some(Reading::number(*v, record.unit)),
        (RecordValue::DateTime(t), _) => {
            Some(Reading::text(t.format("%Y-%m-%d %H:%M").to_string()))
        }
        (RecordValue::Text(s), _) => Some(Reading::text(s.clone())),
        _ => None,
    }
}

// Temperatures come in 0.1 K steps at best; this hides float noise of the subtraction.
fn round_millis(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Builds a snapshot from a decoded record sequence.
pub fn build_snapshot(
    header: Option<DeviceHeader>,
    records: &[DataRecord],
    taken_at: DateTime<Utc>,
) -> Result<ReadingSnapshot, MBusError> {
    let mut readings = BTreeMap::new();

    for record in records.iter().filter(|r| r.is_current()) {
        let Some(kind) = ReadingKind::for_quantity(record.quantity) else {
            continue;
        };
        if readings.contains_key(&kind) {
            continue;
        }
        if let Some(reading) = reading_for(kind, record) {
            readings.insert(kind, reading);
        }
    }

    let device_id = header
        .as_ref()
        .and_then(|h| h.identification)
        .map(|id| format!("{id:08}"))
        .or_else(|| {
            readings
                .get(&ReadingKind::SerialNumber)
                .and_then(|r| r.value.as_text())
                .map(str::to_string)
        })
        .ok_or_else(|| MBusError::IncompleteSnapshot(ReadingKind::DeviceId.name().into()))?;
    readings.insert(ReadingKind::DeviceId, Reading::text(device_id));

    let value = |kind: ReadingKind, readings: &BTreeMap<ReadingKind, Reading>| {
        readings.get(&kind).and_then(|r| r.value.as_f64())
    };

    if !readings.contains_key(&ReadingKind::DeltaTemperature) {
        if let (Some(flow), Some(ret)) = (
            value(ReadingKind::FlowTemperature, &readings),
            value(ReadingKind::ReturnTemperature, &readings),
        ) {
            readings.insert(
                ReadingKind::DeltaTemperature,
                Reading::number(round_millis(flow - ret), Unit::Kelvin),
            );
        }
    }

    if let (Some(flow), Some(delta)) = (
        value(ReadingKind::VolumeFlow, &readings),
        value(ReadingKind::DeltaTemperature, &readings),
    ) {
        readings.insert(
            ReadingKind::ThermalPower,
            Reading::number(thermal_power_kw(flow, delta), Unit::Kilowatt),
        );
    }

    Ok(ReadingSnapshot {
        taken_at,
        device: header,
        readings,
    })
}
