//! # M-Bus Data Records
//!
//! Walks the variable data block of a validated frame and produces one
//! [`DataRecord`] per DIB/VIB/data triple. The DIF decides how many data bytes
//! follow and how they are encoded; the VIF decides what they mean.
//!
//! A record whose VIF is not in the tables is kept with [`Quantity::Unknown`].
//! A record whose length cannot be determined, or whose declared length runs
//! past the end of the payload, aborts the walk with
//! [`MBusError::MalformedRecord`] since the next record boundary is lost.

use crate::constants::{
    MBUS_DATA_RECORD_DIFE_MASK_DEVICE, MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO,
    MBUS_DATA_RECORD_DIFE_MASK_TARIFF, MBUS_DATA_RECORD_DIF_MASK_DATA,
    MBUS_DATA_RECORD_DIF_MASK_FUNCTION, MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO,
    MBUS_DIB_DIF_EXTENSION_BIT, MBUS_DIB_DIF_IDLE_FILLER, MBUS_DIB_DIF_MANUFACTURER_SPECIFIC,
    MBUS_DIB_DIF_MORE_RECORDS_FOLLOW, MBUS_DIB_MAX_EXTENSIONS,
};
use crate::error::MBusError;
use crate::payload::data_encoding::{
    decode_ascii_reversed, decode_bcd, decode_date_g, decode_int_le, decode_real_le,
    decode_time_point_f, decode_uint_le,
};
use crate::payload::vif::{parse_vib, Quantity, Scale, Unit, ValueInformationBlock, ValueKind};
use chrono::{NaiveDate, NaiveDateTime};
use nom::{bytes::complete::take, number::complete::be_u8, IResult};

/// Encoding of the data field, from the low nibble of the DIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCoding {
    NoData,
    /// Signed little-endian integer of n bytes.
    Integer(usize),
    /// 32-bit IEEE-754 real.
    Real,
    /// Packed BCD of n bytes.
    Bcd(usize),
    /// Length given by the LVAR byte in front of the data.
    Variable,
    SelectionForReadout,
    /// `0x?F` codes; the walk handles the ones it understands itself.
    Special,
}

impl DataCoding {
    pub fn from_dif(dif: u8) -> Self {
        match dif & MBUS_DATA_RECORD_DIF_MASK_DATA {
            0x0 => DataCoding::NoData,
            0x1 => DataCoding::Integer(1),
            0x2 => DataCoding::Integer(2),
            0x3 => DataCoding::Integer(3),
            0x4 => DataCoding::Integer(4),
            0x5 => DataCoding::Real,
            0x6 => DataCoding::Integer(6),
            0x7 => DataCoding::Integer(8),
            0x8 => DataCoding::SelectionForReadout,
            0x9 => DataCoding::Bcd(1),
            0xA => DataCoding::Bcd(2),
            0xB => DataCoding::Bcd(3),
            0xC => DataCoding::Bcd(4),
            0xD => DataCoding::Variable,
            0xE => DataCoding::Bcd(6),
            _ => DataCoding::Special,
        }
    }

    /// Data length in bytes; `None` when an LVAR byte decides it.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            DataCoding::NoData | DataCoding::SelectionForReadout | DataCoding::Special => Some(0),
            DataCoding::Integer(n) | DataCoding::Bcd(n) => Some(n),
            DataCoding::Real => Some(4),
            DataCoding::Variable => None,
        }
    }
}

/// Function field of the DIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFunction {
    Instantaneous,
    Maximum,
    Minimum,
    DuringError,
}

impl RecordFunction {
    fn from_dif(dif: u8) -> Self {
        match (dif & MBUS_DATA_RECORD_DIF_MASK_FUNCTION) >> 4 {
            0 => RecordFunction::Instantaneous,
            1 => RecordFunction::Maximum,
            2 => RecordFunction::Minimum,
            _ => RecordFunction::DuringError,
        }
    }
}

/// Represents the M-Bus data information block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInformationBlock {
    pub dif: u8,
    pub dife: Vec<u8>,
    pub coding: DataCoding,
    pub function: RecordFunction,
    pub storage_number: u64,
    pub tariff: u32,
    pub subunit: u32,
}

impl DataInformationBlock {
    pub fn new(dif: u8, dife: Vec<u8>) -> Self {
        let mut storage_number = ((dif & MBUS_DATA_RECORD_DIF_MASK_STORAGE_NO) >> 6) as u64;
        let mut tariff = 0u32;
        let mut subunit = 0u32;

        for (i, byte) in dife.iter().enumerate() {
            storage_number |=
                ((byte & MBUS_DATA_RECORD_DIFE_MASK_STORAGE_NO) as u64) << (1 + 4 * i);
            tariff |= (((byte & MBUS_DATA_RECORD_DIFE_MASK_TARIFF) >> 4) as u32) << (2 * i);
            subunit |= (((byte & MBUS_DATA_RECORD_DIFE_MASK_DEVICE) >> 6) as u32) << i;
        }

        DataInformationBlock {
            dif,
            coding: DataCoding::from_dif(dif),
            function: RecordFunction::from_dif(dif),
            dife,
            storage_number,
            tariff,
            subunit,
        }
    }

    /// Storage 0, tariff 0, subunit 0, instantaneous: the meter's present value.
    pub fn is_current(&self) -> bool {
        self.storage_number == 0
            && self.tariff == 0
            && self.subunit == 0
            && self.function == RecordFunction::Instantaneous
    }
}

/// Parses a DIF and its DIFE chain.
pub fn parse_dib(input: &[u8]) -> IResult<&[u8], DataInformationBlock> {
    let (mut input, dif) = be_u8(input)?;

    let mut dife = Vec::new();
    let mut more = dif & MBUS_DIB_DIF_EXTENSION_BIT != 0;
    while more {
        if dife.len() == MBUS_DIB_MAX_EXTENSIONS {
            return Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::TooLarge,
            )));
        }
        let (i, byte) = be_u8(input)?;
        input = i;
        dife.push(byte);
        more = byte & MBUS_DIB_DIF_EXTENSION_BIT != 0;
    }

    Ok((input, DataInformationBlock::new(dif, dife)))
}

/// Value of the data field before the VIF is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Empty,
    Integer(i64),
    Bcd(i64),
    Real(f32),
    Text(String),
    Bytes(Vec<u8>),
    /// BCD with a digit outside 0-9; the record is kept but carries no value.
    Invalid(Vec<u8>),
}

impl RawValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Integer(v) | RawValue::Bcd(v) => Some(*v as f64),
            RawValue::Real(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// Value after the VIF has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// Magnitude in the record's base unit.
    Numeric(f64),
    Identifier(u64),
    Text(String),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Bytes(Vec<u8>),
    None,
}

/// One decoded record of the variable data block.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    /// Offset of the DIF within the payload.
    pub offset: usize,
    pub dib: DataInformationBlock,
    /// Absent for manufacturer-specific trailers.
    pub vib: Option<ValueInformationBlock>,
    pub quantity: Quantity,
    pub unit: Unit,
    /// VIFEs the tables could not fold into the scale.
    pub orthogonal_vife: bool,
    pub data: Vec<u8>,
    pub raw: RawValue,
    pub value: RecordValue,
}

impl DataRecord {
    pub fn numeric(&self) -> Option<f64> {
        match self.value {
            RecordValue::Numeric(v) => Some(v),
            _ => None,
        }
    }

    pub fn identifier(&self) -> Option<u64> {
        match self.value {
            RecordValue::Identifier(v) => Some(v),
            _ => None,
        }
    }

    /// True for a present-value record whose meaning is fully known.
    pub fn is_current(&self) -> bool {
        self.dib.is_current() && !self.orthogonal_vife
    }

    pub fn is_manufacturer_specific(&self) -> bool {
        self.quantity == Quantity::ManufacturerSpecific
    }
}

/// Result of walking one payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSet {
    pub records: Vec<DataRecord>,
    /// The meter signalled `0x1F`: another telegram carries more records.
    pub more_records_follow: bool,
}

impl RecordSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DataRecord> {
        self.records.iter()
    }
}

/// Decodes every record in `payload` (the bytes after the fixed data header).
pub fn parse_records(payload: &[u8]) -> Result<RecordSet, MBusError> {
    let mut set = RecordSet::default();
    let mut input = payload;

    while let Some(&dif) = input.first() {
        let offset = payload.len() - input.len();

        match dif {
            MBUS_DIB_DIF_IDLE_FILLER => {
                input = &input[1..];
                continue;
            }
            MBUS_DIB_DIF_MANUFACTURER_SPECIFIC | MBUS_DIB_DIF_MORE_RECORDS_FOLLOW => {
                set.more_records_follow = dif == MBUS_DIB_DIF_MORE_RECORDS_FOLLOW;
                set.records.push(manufacturer_record(offset, dif, &input[1..]));
                break;
            }
            _ if dif & MBUS_DATA_RECORD_DIF_MASK_DATA == 0x0F => {
                return Err(MBusError::malformed(
                    offset,
                    format!("reserved special function DIF 0x{dif:02X}"),
                ));
            }
            _ => {}
        }

        let (rest, record) = parse_data_record(offset, input)?;
        log::trace!(
            "record @{}: {:?} {:?} {}",
            offset,
            record.quantity,
            record.value,
            record.unit
        );
        set.records.push(record);
        input = rest;
    }

    Ok(set)
}

fn manufacturer_record(offset: usize, dif: u8, rest: &[u8]) -> DataRecord {
    DataRecord {
        offset,
        dib: DataInformationBlock::new(dif, Vec::new()),
        vib: None,
        quantity: Quantity::ManufacturerSpecific,
        unit: Unit::None,
        orthogonal_vife: false,
        data: rest.to_vec(),
        raw: RawValue::Bytes(rest.to_vec()),
        value: RecordValue::Bytes(rest.to_vec()),
    }
}

/// How an LVAR byte says the variable data field is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariableCoding {
    Text(usize),
    Bcd { len: usize, negative: bool },
    Binary(usize),
}

fn variable_coding(lvar: u8) -> Option<VariableCoding> {
    match lvar {
        0x00..=0xBF => Some(VariableCoding::Text(lvar as usize)),
        0xC0..=0xCF => Some(VariableCoding::Bcd {
            len: (lvar - 0xC0) as usize,
            negative: false,
        }),
        0xD0..=0xDF => Some(VariableCoding::Bcd {
            len: (lvar - 0xD0) as usize,
            negative: true,
        }),
        0xE0..=0xEF => Some(VariableCoding::Binary((lvar - 0xE0) as usize)),
        0xF0..=0xFA => Some(VariableCoding::Binary(4 * (lvar - 0xEC) as usize)),
        _ => None,
    }
}

fn parse_data_record(offset: usize, input: &[u8]) -> Result<(&[u8], DataRecord), MBusError> {
    let (input, dib) = parse_dib(input)
        .map_err(|_| MBusError::malformed(offset, "truncated data information block"))?;
    let (input, vib) = parse_vib(input)
        .map_err(|_| MBusError::malformed(offset, "truncated value information block"))?;

    let (input, len, variable) = match dib.coding.fixed_len() {
        Some(len) => (input, len, None),
        None => {
            let (input, lvar) = be_u8::<_, nom::error::Error<&[u8]>>(input)
                .map_err(|_| MBusError::malformed(offset, "missing LVAR byte"))?;
            let coding = variable_coding(lvar).ok_or_else(|| {
                MBusError::malformed(offset, format!("reserved LVAR 0x{lvar:02X}"))
            })?;
            let len = match coding {
                VariableCoding::Text(n) | VariableCoding::Binary(n) => n,
                VariableCoding::Bcd { len, .. } => len,
            };
            (input, len, Some(coding))
        }
    };

    if len > input.len() {
        return Err(MBusError::malformed(
            offset,
            format!(
                "declared {} data bytes but only {} remain",
                len,
                input.len()
            ),
        ));
    }
    let (input, data) = take::<_, _, nom::error::Error<&[u8]>>(len)(input)
        .map_err(|_| MBusError::malformed(offset, "truncated data field"))?;

    let raw = match variable {
        Some(coding) => decode_variable(coding, data),
        None => decode_fixed(dib.coding, data),
    };

    let resolution = vib.resolve();
    let descriptor = resolution.descriptor;
    let value = resolve_value(descriptor.kind, descriptor.scale, &raw, data);

    Ok((
        input,
        DataRecord {
            offset,
            dib,
            vib: Some(vib),
            quantity: descriptor.quantity,
            unit: descriptor.unit,
            orthogonal_vife: resolution.orthogonal,
            data: data.to_vec(),
            raw,
            value,
        },
    ))
}

fn decode_fixed(coding: DataCoding, data: &[u8]) -> RawValue {
    match coding {
        DataCoding::Integer(_) => RawValue::Integer(decode_int_le(data)),
        DataCoding::Real => decode_real_le(data)
            .map(RawValue::Real)
            .unwrap_or(RawValue::Invalid(data.to_vec())),
        DataCoding::Bcd(_) => match decode_bcd(data) {
            Ok(v) => RawValue::Bcd(v),
            Err(e) => {
                log::debug!("{e} in {}", hex::encode_upper(data));
                RawValue::Invalid(data.to_vec())
            }
        },
        DataCoding::NoData
        | DataCoding::SelectionForReadout
        | DataCoding::Special
        | DataCoding::Variable => RawValue::Empty,
    }
}

fn decode_variable(coding: VariableCoding, data: &[u8]) -> RawValue {
    match coding {
        VariableCoding::Text(_) => RawValue::Text(decode_ascii_reversed(data)),
        VariableCoding::Bcd { negative, .. } => match decode_bcd(data) {
            Ok(v) if negative => RawValue::Bcd(-v),
            Ok(v) => RawValue::Bcd(v),
            Err(_) => RawValue::Invalid(data.to_vec()),
        },
        VariableCoding::Binary(n) if n <= 8 => RawValue::Integer(decode_int_le(data)),
        VariableCoding::Binary(_) => RawValue::Bytes(data.to_vec()),
    }
}

fn resolve_value(
    kind: ValueKind,
    scale: Scale,
    raw: &RawValue,
    data: &[u8],
) -> RecordValue {
    if let RawValue::Text(text) = raw {
        return RecordValue::Text(text.clone());
    }

    match kind {
        ValueKind::Numeric => raw
            .as_f64()
            .map(|v| RecordValue::Numeric(scale.apply(v)))
            .unwrap_or(RecordValue::None),
        ValueKind::Identifier => match raw {
            RawValue::Integer(_) => RecordValue::Identifier(decode_uint_le(data)),
            RawValue::Bcd(v) if *v >= 0 => RecordValue::Identifier(*v as u64),
            RawValue::Bytes(b) => RecordValue::Bytes(b.clone()),
            _ => RecordValue::None,
        },
        ValueKind::DateTime => match data.len() {
            4 => decode_time_point_f(data)
                .map(RecordValue::DateTime)
                .unwrap_or(RecordValue::None),
            2 => decode_date_g(data)
                .map(RecordValue::Date)
                .unwrap_or(RecordValue::None),
            _ => RecordValue::None,
        },
        ValueKind::Date => decode_date_g(data)
            .map(RecordValue::Date)
            .unwrap_or(RecordValue::None),
        ValueKind::Raw => RecordValue::Bytes(data.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_number_from_dife_chain() {
        // DIF storage LSB = 1, DIFE storage nibble = 0x3, second DIFE nibble = 0x1
        let (_, dib) = parse_dib(&[0xC4, 0x83, 0x01]).unwrap();
        assert_eq!(dib.dife, vec![0x83, 0x01]);
        assert_eq!(dib.storage_number, 1 | (0x3 << 1) | (0x1 << 5));
        assert!(!dib.is_current());
    }

    #[test]
    fn test_tariff_and_subunit() {
        let (_, dib) = parse_dib(&[0x84, 0x50]).unwrap();
        assert_eq!(dib.tariff, 1);
        assert_eq!(dib.subunit, 1);
        assert_eq!(dib.storage_number, 0);
    }

    #[test]
    fn test_function_field() {
        assert_eq!(RecordFunction::from_dif(0x14), RecordFunction::Maximum);
        assert_eq!(RecordFunction::from_dif(0x24), RecordFunction::Minimum);
        assert_eq!(RecordFunction::from_dif(0x34), RecordFunction::DuringError);
    }

    #[test]
    fn test_coding_lengths() {
        assert_eq!(DataCoding::from_dif(0x06).fixed_len(), Some(6));
        assert_eq!(DataCoding::from_dif(0x07).fixed_len(), Some(8));
        assert_eq!(DataCoding::from_dif(0x0E).fixed_len(), Some(6));
        assert_eq!(DataCoding::from_dif(0x05).fixed_len(), Some(4));
        assert_eq!(DataCoding::from_dif(0x0D).fixed_len(), None);
    }

    #[test]
    fn test_lvar_classes() {
        assert_eq!(variable_coding(0x05), Some(VariableCoding::Text(5)));
        assert_eq!(
            variable_coding(0xD2),
            Some(VariableCoding::Bcd {
                len: 2,
                negative: true
            })
        );
        assert_eq!(variable_coding(0xE3), Some(VariableCoding::Binary(3)));
        assert_eq!(variable_coding(0xF0), Some(VariableCoding::Binary(16)));
        assert_eq!(variable_coding(0xFB), None);
    }

    #[test]
    fn test_single_energy_record() {
        let set = parse_records(&[0x04, 0x06, 0x32, 0x2D, 0x00, 0x00]).unwrap();
        assert_eq!(set.len(), 1);
        let record = &set.records[0];
        assert_eq!(record.quantity, Quantity::Energy);
        assert_eq!(record.unit, Unit::KilowattHour);
        assert_eq!(record.numeric(), Some(11570.0));
        assert!(record.is_current());
    }

    #[test]
    fn test_filler_is_skipped() {
        let set = parse_records(&[0x2F, 0x2F, 0x01, 0xFD, 0x0E, 0x08, 0x2F]).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.records[0].offset, 2);
        assert_eq!(set.records[0].identifier(), Some(8));
    }

    #[test]
    fn test_length_overrun_is_malformed() {
        let err = parse_records(&[0x04, 0x06, 0x32, 0x2D]).unwrap_err();
        assert!(matches!(err, MBusError::MalformedRecord { offset: 0, .. }));
    }
}
