use ultralite_mbus::payload::vif::{parse_vib, Scale, ValueKind};
use ultralite_mbus::payload::vif_maps::{lookup_primary_vif, lookup_vife_fd};
use ultralite_mbus::{Quantity, Unit};

#[test]
fn test_energy_family() {
    // 10^(n-3) Wh, reported in kWh
    assert_eq!(lookup_primary_vif(0x03).unwrap().scale, Scale::Decimal(-3));
    assert_eq!(lookup_primary_vif(0x06).unwrap().scale, Scale::Decimal(0));
    assert_eq!(lookup_primary_vif(0x07).unwrap().scale, Scale::Decimal(1));
    assert_eq!(lookup_primary_vif(0x07).unwrap().unit, Unit::KilowattHour);
}

#[test]
fn test_volume_and_flow_families() {
    let volume = lookup_primary_vif(0x14).unwrap();
    assert_eq!(volume.quantity, Quantity::Volume);
    assert_eq!(volume.scale, Scale::Decimal(-2));

    let flow = lookup_primary_vif(0x3B).unwrap();
    assert_eq!(flow.quantity, Quantity::VolumeFlow);
    assert_eq!(flow.unit, Unit::CubicMetrePerHour);
    assert_eq!(flow.scale, Scale::Decimal(-3));
}

#[test]
fn test_temperature_families() {
    let cases = [
        (0x5A, Quantity::FlowTemperature, Unit::Celsius, -1),
        (0x5E, Quantity::ReturnTemperature, Unit::Celsius, -1),
        (0x61, Quantity::TemperatureDifference, Unit::Kelvin, -2),
        (0x67, Quantity::ExternalTemperature, Unit::Celsius, 0),
    ];
    for (code, quantity, unit, exponent) in cases {
        let d = lookup_primary_vif(code).unwrap();
        assert_eq!(d.quantity, quantity, "VIF 0x{code:02X}");
        assert_eq!(d.unit, unit);
        assert_eq!(d.scale, Scale::Decimal(exponent));
        assert_eq!(d.kind, ValueKind::Numeric);
    }
}

#[test]
fn test_durations_in_days() {
    assert_eq!(lookup_primary_vif(0x24).unwrap().scale, Scale::Divide(86_400));
    assert_eq!(lookup_primary_vif(0x25).unwrap().scale, Scale::Divide(1_440));
    assert_eq!(lookup_primary_vif(0x26).unwrap().scale, Scale::Divide(24));
    let days = lookup_primary_vif(0x27).unwrap();
    assert_eq!(days.quantity, Quantity::OperatingTime);
    assert_eq!(days.unit, Unit::Day);
    assert_eq!(days.scale, Scale::Decimal(0));
    assert_eq!(lookup_primary_vif(0x22).unwrap().quantity, Quantity::OnTime);
}

#[test]
fn test_identifier_codes() {
    assert_eq!(lookup_primary_vif(0x78).unwrap().kind, ValueKind::Identifier);
    assert_eq!(lookup_primary_vif(0x6D).unwrap().kind, ValueKind::DateTime);
    assert_eq!(lookup_primary_vif(0x6C).unwrap().kind, ValueKind::Date);
    assert_eq!(lookup_vife_fd(0x0F).unwrap().quantity, Quantity::SoftwareVersion);
    assert_eq!(lookup_vife_fd(0x17).unwrap().quantity, Quantity::ErrorFlags);
}

#[test]
fn test_unlisted_codes() {
    assert!(lookup_primary_vif(0x7E).is_none());
    assert!(lookup_vife_fd(0x7F).is_none());
}

#[test]
fn test_fd_with_unknown_code_resolves_unknown() {
    let (_, vib) = parse_vib(&[0xFD, 0x70]).unwrap();
    assert_eq!(vib.resolve().descriptor.quantity, Quantity::Unknown);
}

#[test]
fn test_fb_extension_is_unknown() {
    let (rest, vib) = parse_vib(&[0xFB, 0x1A, 0x99]).unwrap();
    assert_eq!(rest, &[0x99]);
    assert_eq!(vib.vife, vec![0x1A]);
    assert_eq!(vib.resolve().descriptor.quantity, Quantity::Unknown);
}

#[test]
fn test_plain_text_after_extensions() {
    // plain-text VIF with one VIFE: the unit text follows the extension chain
    let (rest, vib) = parse_vib(&[0xFC, 0x74, 0x02, b'h', b'k', 0x01]).unwrap();
    assert_eq!(rest, &[0x01]);
    assert_eq!(vib.vife, vec![0x74]);
    assert_eq!(vib.plain_text.as_deref(), Some("kh"));
    let resolution = vib.resolve();
    assert_eq!(resolution.descriptor.quantity, Quantity::PlainText);
    assert!(!resolution.orthogonal);
}

#[test]
fn test_plain_text_too_long() {
    let mut bytes = vec![0x7C, 17];
    bytes.extend(std::iter::repeat(b'x').take(17));
    assert!(parse_vib(&bytes).is_err());
}

#[test]
fn test_multiplier_vife() {
    let (_, vib) = parse_vib(&[0x86, 0x7D]).unwrap();
    let resolution = vib.resolve();
    assert_eq!(resolution.descriptor.scale, Scale::Decimal(3));
    assert!(!resolution.orthogonal);
}

#[test]
fn test_duration_ignores_decimal_correction() {
    let (_, vib) = parse_vib(&[0xA6, 0x74]).unwrap();
    assert_eq!(vib.resolve().descriptor.scale, Scale::Divide(24));
}
