//! Tests for walking the variable data block into data records.

use chrono::NaiveDate;
use ultralite_mbus::payload::record::{parse_records, RawValue, RecordFunction, RecordValue};
use ultralite_mbus::{MBusError, Quantity, Unit};

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("numeric value");
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_heat_meter_basics() {
    let payload = [
        0x04, 0x06, 0x32, 0x2D, 0x00, 0x00, // energy 11570 kWh
        0x0C, 0x14, 0x04, 0x55, 0x03, 0x00, // volume 355.04 m³ (BCD)
        0x02, 0x3B, 0x27, 0x01, // flow 0.295 m³/h
    ];
    let set = parse_records(&payload).unwrap();
    assert_eq!(set.len(), 3);
    assert!(!set.more_records_follow);

    let energy = &set.records[0];
    assert_eq!(energy.offset, 0);
    assert_eq!(energy.quantity, Quantity::Energy);
    assert_eq!(energy.unit, Unit::KilowattHour);
    assert_eq!(energy.raw, RawValue::Integer(11570));
    assert_close(energy.numeric(), 11570.0);

    let volume = &set.records[1];
    assert_eq!(volume.offset, 6);
    assert_eq!(volume.raw, RawValue::Bcd(35504));
    assert_close(volume.numeric(), 355.04);

    let flow = &set.records[2];
    assert_eq!(flow.unit, Unit::CubicMetrePerHour);
    assert_close(flow.numeric(), 0.295);
    assert!(set.iter().all(|r| r.is_current()));
}

#[test]
fn test_empty_payload() {
    let set = parse_records(&[]).unwrap();
    assert!(set.is_empty());
}

#[test]
fn test_idle_filler_is_skipped() {
    let payload = [0x2F, 0x2F, 0x02, 0x5A, 0x92, 0x01, 0x2F];
    let set = parse_records(&payload).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.records[0].offset, 2);
    assert_eq!(set.records[0].quantity, Quantity::FlowTemperature);
    assert_close(set.records[0].numeric(), 40.2);
}

#[test]
fn test_manufacturer_specific_trailer() {
    let payload = [0x02, 0x5E, 0x34, 0x01, 0x0F, 0x01, 0x02, 0x03];
    let set = parse_records(&payload).unwrap();
    assert_eq!(set.len(), 2);

    let trailer = &set.records[1];
    assert!(trailer.is_manufacturer_specific());
    assert_eq!(trailer.offset, 4);
    assert_eq!(trailer.data, vec![0x01, 0x02, 0x03]);
    assert_eq!(trailer.value, RecordValue::Bytes(vec![0x01, 0x02, 0x03]));
    assert!(!set.more_records_follow);
}

#[test]
fn test_more_records_follow() {
    let set = parse_records(&[0x1F]).unwrap();
    assert_eq!(set.len(), 1);
    assert!(set.more_records_follow);
    assert!(set.records[0].data.is_empty());
}

#[test]
fn test_reserved_special_dif() {
    let payload = [0x02, 0x5E, 0x34, 0x01, 0x3F, 0x00];
    match parse_records(&payload) {
        Err(MBusError::MalformedRecord { offset, .. }) => assert_eq!(offset, 4),
        other => panic!("expected malformed record, got {other:?}"),
    }
}

#[test]
fn test_record_running_past_payload() {
    let err = parse_records(&[0x04, 0x06, 0x32, 0x2D]).unwrap_err();
    assert!(matches!(err, MBusError::MalformedRecord { offset: 0, .. }));

    // DIF with nothing after it
    let err = parse_records(&[0x02, 0x5A, 0x92, 0x01, 0x04]).unwrap_err();
    assert!(matches!(err, MBusError::MalformedRecord { offset: 4, .. }));
}

#[test]
fn test_too_many_dife() {
    let mut payload = vec![0x84];
    payload.extend(std::iter::repeat(0x80).take(11));
    payload.extend_from_slice(&[0x00, 0x06, 0x00, 0x00, 0x00, 0x00]);
    assert!(matches!(
        parse_records(&payload),
        Err(MBusError::MalformedRecord { offset: 0, .. })
    ));
}

#[test]
fn test_invalid_bcd_keeps_record() {
    let payload = [0x0C, 0x14, 0xAB, 0x00, 0x00, 0x00, 0x02, 0x5A, 0x92, 0x01];
    let set = parse_records(&payload).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.records[0].raw, RawValue::Invalid(vec![0xAB, 0x00, 0x00, 0x00]));
    assert_eq!(set.records[0].value, RecordValue::None);
    assert_eq!(set.records[0].numeric(), None);
    assert_close(set.records[1].numeric(), 40.2);
}

#[test]
fn test_unknown_vif_is_kept() {
    let set = parse_records(&[0x01, 0x7E, 0x05, 0x02, 0x5A, 0x92, 0x01]).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.records[0].quantity, Quantity::Unknown);
    assert_eq!(set.records[1].quantity, Quantity::FlowTemperature);
}

#[test]
fn test_negative_binary_value() {
    let set = parse_records(&[0x02, 0x61, 0xFE, 0xFF]).unwrap();
    assert_eq!(set.records[0].quantity, Quantity::TemperatureDifference);
    assert_close(set.records[0].numeric(), -0.02);
}

#[test]
fn test_real_value() {
    let mut payload = vec![0x05, 0x5B];
    payload.extend_from_slice(&40.5f32.to_le_bytes());
    let set = parse_records(&payload).unwrap();
    assert_eq!(set.records[0].raw, RawValue::Real(40.5));
    assert_close(set.records[0].numeric(), 40.5);
}

#[test]
fn test_operating_time_in_hours() {
    let set = parse_records(&[0x02, 0x26, 0x30, 0x00]).unwrap();
    assert_eq!(set.records[0].quantity, Quantity::OperatingTime);
    assert_eq!(set.records[0].unit, Unit::Day);
    assert_close(set.records[0].numeric(), 2.0);
}

#[test]
fn test_date_record() {
    let set = parse_records(&[0x02, 0x6C, 0x0F, 0x33]).unwrap();
    assert_eq!(set.records[0].quantity, Quantity::Date);
    assert_eq!(
        set.records[0].value,
        RecordValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
    );
}

#[test]
fn test_identifiers_are_not_scaled() {
    let payload = [
        0x0C, 0x78, 0x52, 0x63, 0x10, 0x22, // fabrication number
        0x01, 0xFD, 0x0E, 0x08, // firmware
    ];
    let set = parse_records(&payload).unwrap();
    assert_eq!(set.records[0].identifier(), Some(22106352));
    assert_eq!(set.records[1].quantity, Quantity::FirmwareVersion);
    assert_eq!(set.records[1].identifier(), Some(8));
}

#[test]
fn test_variable_length_text() {
    let set = parse_records(&[0x0D, 0xFD, 0x0C, 0x03, b'C', b'B', b'A']).unwrap();
    assert_eq!(set.records[0].quantity, Quantity::ModelVersion);
    assert_eq!(set.records[0].value, RecordValue::Text("ABC".into()));
}

#[test]
fn test_variable_length_bcd_and_binary() {
    let set = parse_records(&[0x0D, 0x06, 0xD2, 0x34, 0x12]).unwrap();
    assert_eq!(set.records[0].raw, RawValue::Bcd(-1234));

    let mut payload = vec![0x0D, 0xFD, 0x0C, 0xF0];
    payload.extend(0u8..16);
    let set = parse_records(&payload).unwrap();
    assert_eq!(set.records[0].data.len(), 16);
    assert_eq!(set.records[0].value, RecordValue::Bytes((0u8..16).collect()));
}

#[test]
fn test_oversized_variable_length_bcd_is_invalid() {
    // 20 digits do not fit a 64-bit register; the record is kept, the walk goes on
    let mut payload = vec![0x0D, 0x13, 0xCA];
    payload.extend_from_slice(&[0x99; 10]);
    payload.extend_from_slice(&[0x02, 0x5A, 0x92, 0x01]);
    let set = parse_records(&payload).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.records[0].raw, RawValue::Invalid(vec![0x99; 10]));
    assert_eq!(set.records[0].numeric(), None);
    assert_close(set.records[1].numeric(), 40.2);
}

#[test]
fn test_reserved_lvar() {
    let err = parse_records(&[0x0D, 0x06, 0xFB, 0x00]).unwrap_err();
    assert!(matches!(err, MBusError::MalformedRecord { offset: 0, .. }));
}

#[test]
fn test_historic_and_tariff_records_are_not_current() {
    let payload = [
        0x44, 0x06, 0x10, 0x27, 0x00, 0x00, // storage 1
        0x84, 0x10, 0x06, 0x01, 0x00, 0x00, 0x00, // tariff 1
        0x14, 0x3B, 0x00, 0x10, 0x00, 0x00, // maximum
        0x04, 0x06, 0x32, 0x2D, 0x00, 0x00, // present value
    ];
    let set = parse_records(&payload).unwrap();
    assert_eq!(set.len(), 4);
    assert_eq!(set.records[0].dib.storage_number, 1);
    assert_eq!(set.records[1].dib.tariff, 1);
    assert_eq!(set.records[2].dib.function, RecordFunction::Maximum);
    let current: Vec<_> = set.iter().filter(|r| r.is_current()).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].offset, 19);
}

#[test]
fn test_vife_correction_and_orthogonal_extension() {
    let payload = [
        0x02, 0xBB, 0x73, 0x27, 0x01, // flow with 10^-3 correction
        0x04, 0x86, 0x3C, 0x01, 0x00, 0x00, 0x00, // energy with an unmodelled extension
    ];
    let set = parse_records(&payload).unwrap();
    assert_close(set.records[0].numeric(), 0.000295);
    assert!(set.records[0].is_current());
    assert!(set.records[1].orthogonal_vife);
    assert!(!set.records[1].is_current());
}
