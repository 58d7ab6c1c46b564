//! Captured meter responses decoded end to end.

use chrono::{NaiveDate, TimeZone, Utc};
use ultralite_mbus::constants::MBUS_CONTROL_MASK_RSP_UD;
use ultralite_mbus::mbus::device::StatusFlags;
use ultralite_mbus::payload::record::RecordValue;
use ultralite_mbus::{
    decode_hex, decode_long_frame, parse_records, parse_variable_data, MBusError, MBusFrameType,
    Quantity, ReadingKind, ReadingSnapshot, ReadingValue, Unit,
};

/// Heat meter, ITW, ID 22106352, one record of each reading plus date/time.
const ULTRALITE_HEX: &str = "684343680800725263102297261704330000000406322D00000C1404550300023B2701025A9201025E34010261A7030C78526310220227470401FD0E0801FD0F0B046D1E0C0F332F16";

const EXAMPLE_DATA_01_HEX: &str = "6831316808017245585703B40534049E0027B60306F934150315C6004D052E00000000053D00000000055B22F32642055FC7DA0D42FA16";

const APPLICATION_BUSY_HEX: &str = "68040468080170088116";

fn snapshot_of(hex: &str) -> Result<ReadingSnapshot, MBusError> {
    let bytes = decode_hex(hex)?;
    ReadingSnapshot::from_frame_bytes(&bytes, Utc.with_ymd_and_hms(2024, 3, 15, 12, 31, 0).unwrap())
}

fn number(s: &ReadingSnapshot, kind: ReadingKind) -> f64 {
    s.value(kind)
        .unwrap_or_else(|| panic!("{kind} missing from snapshot"))
}

#[test]
fn test_ultralite_frame_structure() {
    let bytes = decode_hex(ULTRALITE_HEX).unwrap();
    assert_eq!(bytes.len(), 73);

    let frame = decode_long_frame(&bytes).unwrap();
    assert_eq!(frame.frame_type, MBusFrameType::Long);
    assert_eq!(frame.control, MBUS_CONTROL_MASK_RSP_UD);
    assert_eq!(frame.control_information, 0x72);
    assert_eq!(frame.checksum, 0x2F);

    let (header, payload) = parse_variable_data(&frame).unwrap();
    assert_eq!(header.identification, Some(22106352));
    assert_eq!(header.manufacturer, "ITW");
    assert_eq!(header.version, 0x17);
    assert_eq!(header.medium_name(), "Heat (outlet)");
    assert_eq!(header.access_number, 0x33);
    assert_eq!(header.status, StatusFlags::empty());

    let records = parse_records(payload).unwrap();
    assert_eq!(records.len(), 11);
    assert!(records.iter().all(|r| r.is_current()));
    let time = records
        .iter()
        .find(|r| r.quantity == Quantity::DateTime)
        .unwrap();
    assert_eq!(
        time.value,
        RecordValue::DateTime(
            NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap()
        )
    );
}

#[test]
fn test_ultralite_snapshot() {
    let s = snapshot_of(ULTRALITE_HEX).unwrap();

    assert_eq!(s.device_id(), "22106352");
    assert_eq!(number(&s, ReadingKind::EnergyTotal), 11570.0);
    assert_eq!(s.get(ReadingKind::EnergyTotal).unwrap().unit, Unit::KilowattHour);
    assert_eq!(number(&s, ReadingKind::VolumeTotal), 355.04);
    assert_eq!(number(&s, ReadingKind::VolumeFlow), 0.295);
    assert_eq!(number(&s, ReadingKind::FlowTemperature), 40.2);
    assert_eq!(number(&s, ReadingKind::ReturnTemperature), 30.8);
    assert_eq!(number(&s, ReadingKind::OperatingTimeDays), 1095.0);

    // the meter's own difference is reported, not flow minus return
    assert_eq!(number(&s, ReadingKind::DeltaTemperature), 9.35);
    let flow_minus_return = number(&s, ReadingKind::FlowTemperature)
        - number(&s, ReadingKind::ReturnTemperature);
    assert!((flow_minus_return - 9.4).abs() < 1e-9);

    let power = number(&s, ReadingKind::ThermalPower);
    assert!((power - 3.2078).abs() < 1e-3, "{power}");

    let text = |kind: ReadingKind| s.get(kind).unwrap().value.clone();
    assert_eq!(text(ReadingKind::SerialNumber), ReadingValue::Text("22106352".into()));
    assert_eq!(text(ReadingKind::FirmwareVersion), ReadingValue::Integer(8));
    assert_eq!(text(ReadingKind::SoftwareVersion), ReadingValue::Integer(11));
    assert_eq!(text(ReadingKind::MeterTime), ReadingValue::Text("2024-03-15 12:30".into()));

    assert_eq!(s.len(), ReadingKind::ALL.len());
}

#[test]
fn test_example_data_01() {
    let s = snapshot_of(EXAMPLE_DATA_01_HEX).unwrap();
    let device = s.device.as_ref().unwrap();
    assert_eq!(device.manufacturer, "AMT");
    assert_eq!(s.device_id(), "03575845");

    assert_eq!(number(&s, ReadingKind::EnergyTotal), 1389817.0);
    assert_eq!(number(&s, ReadingKind::VolumeTotal), 504647.0);
    assert_eq!(number(&s, ReadingKind::VolumeFlow), 0.0);
    assert!((number(&s, ReadingKind::FlowTemperature) - 41.737).abs() < 1e-3);
    assert!((number(&s, ReadingKind::ReturnTemperature) - 35.464).abs() < 1e-3);
    assert_eq!(number(&s, ReadingKind::DeltaTemperature), 6.274);
    assert_eq!(number(&s, ReadingKind::ThermalPower), 0.0);
    assert!(s.get(ReadingKind::MeterTime).is_none());
}

#[test]
fn test_application_busy() {
    let bytes = decode_hex(APPLICATION_BUSY_HEX).unwrap();
    let frame = decode_long_frame(&bytes).unwrap();
    assert_eq!(frame.control_information, 0x70);
    assert_eq!(frame.data, vec![0x08]);

    // only variable data responses carry readings
    assert!(matches!(
        snapshot_of(APPLICATION_BUSY_HEX),
        Err(MBusError::MalformedRecord { .. })
    ));
}

#[test]
fn test_decode_hex_formats() {
    let spaced = ULTRALITE_HEX
        .as_bytes()
        .chunks(2)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join(" ");
    assert_eq!(decode_hex(&spaced).unwrap(), decode_hex(ULTRALITE_HEX).unwrap());
    assert_eq!(decode_hex("0x68:04"), Ok(vec![0x68, 0x04]));
    assert_eq!(decode_hex("6"), Err(MBusError::InvalidHexString));
}
