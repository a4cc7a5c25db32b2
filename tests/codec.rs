//! register codec behavior through the public api

use jbdlink::Error;
use jbdlink::registers::{FUNC_CONFIG_FLAGS, Register, Value};
use jbdlink::tables::Unit;

#[test]
fn scaled_round_trip() {
    let mut covp = Register::scaled("covp", 0x24, Unit::MilliVolt, 1.0);
    covp.set("covp", &Value::Int(4250)).unwrap();
    assert_eq!(covp.encode().unwrap(), [0x10, 0x9A]);
    covp.decode(&[0x10, 0x9A]).unwrap();
    assert_eq!(covp.get("covp").unwrap(), Value::Int(4250));

    // a factor of 10 maps engineering mA onto wire 10 mA steps
    let mut chgoc = Register::scaled("chgoc", 0x28, Unit::MilliAmp, 10.0);
    chgoc.set("chgoc", &Value::Int(50000)).unwrap();
    assert_eq!(chgoc.encode().unwrap(), [0x13, 0x88]);
    chgoc.decode(&[0x13, 0x88]).unwrap();
    assert_eq!(chgoc.get("chgoc").unwrap(), Value::Int(50000));

    // fractional factors keep their float value through the wire
    let mut rate = Register::scaled("dsg_rate", 0x14, Unit::Percent, 0.1);
    rate.set("dsg_rate", &Value::Float(0.3)).unwrap();
    assert_eq!(rate.encode().unwrap(), [0x00, 0x03]);
    rate.decode(&[0x00, 0x03]).unwrap();
    let got = rate.get("dsg_rate").unwrap().as_float().unwrap();
    assert!((got - 0.3).abs() < 1e-9);
}

#[test]
fn scaled_rejects_out_of_range() {
    let mut covp = Register::scaled("covp", 0x24, Unit::MilliVolt, 1.0);
    assert!(matches!(covp.set("covp", &Value::Int(40000)), Err(Error::Domain { .. })));
    assert!(matches!(covp.set("covp", &Value::Text("high".into())), Err(Error::Domain { .. })));
    assert!(matches!(covp.set("other", &Value::Int(1)), Err(Error::UnknownValue(_))));
}

#[test]
fn scaled_bounds_are_exactly_the_wire_word() {
    // values one past the word span must be rejected, never silently clamped
    let mut covp = Register::scaled("covp", 0x24, Unit::MilliVolt, 1.0);
    covp.set("covp", &Value::Int(32767)).unwrap();
    assert_eq!(covp.encode().unwrap(), [0x7F, 0xFF]);
    assert!(matches!(covp.set("covp", &Value::Int(32768)), Err(Error::Domain { .. })));
    covp.set("covp", &Value::Int(-32768)).unwrap();
    assert_eq!(covp.encode().unwrap(), [0x80, 0x00]);
    assert!(matches!(covp.set("covp", &Value::Int(-32769)), Err(Error::Domain { .. })));

    let mut chgoc = Register::scaled("chgoc", 0x28, Unit::MilliAmp, 10.0);
    assert!(matches!(chgoc.set("chgoc", &Value::Int(327680)), Err(Error::Domain { .. })));
}

#[test]
fn temperature_round_trip() {
    let mut chgot = Register::temperature("chgot", 0x18);
    chgot.decode(&[0x0B, 0xA5]).unwrap();
    assert_eq!(chgot.get("chgot").unwrap(), Value::Float(25.0));
    chgot.set("chgot", &Value::Float(25.0)).unwrap();
    assert_eq!(chgot.encode().unwrap(), [0x0B, 0xA5]);
    // negative temperatures stay above the unsigned zero point
    chgot.set("chgot", &Value::Float(-30.0)).unwrap();
    assert_eq!(chgot.encode().unwrap(), 2431u16.to_be_bytes());
    // tenth-degree resolution survives the trip
    chgot.set("chgot", &Value::Float(25.1)).unwrap();
    let payload = chgot.encode().unwrap();
    chgot.decode(&payload).unwrap();
    assert_eq!(chgot.get("chgot").unwrap(), Value::Float(25.1));
}

#[test]
fn read_only_temperature_rejects_writes() {
    let mut ntc = Register::temperature_read_only("ntc0", 0xD0);
    ntc.decode(&[0x0B, 0xA5]).unwrap();
    assert_eq!(ntc.get("ntc0").unwrap(), Value::Float(25.0));
    assert!(matches!(ntc.set("ntc0", &Value::Float(20.0)), Err(Error::ReadOnly(_))));
    assert!(matches!(ntc.encode(), Err(Error::ReadOnly(_))));
}

#[test]
fn delay_pair_codec() {
    let mut delays = Register::delays("cell_v_delays", 0x3D, "cuvp_delay", "covp_delay");
    delays.set("cuvp_delay", &Value::Int(3)).unwrap();
    delays.set("covp_delay", &Value::Int(5)).unwrap();
    assert_eq!(delays.encode().unwrap(), [3, 5]);
    delays.decode(&[7, 9]).unwrap();
    assert_eq!(delays.get("cuvp_delay").unwrap(), Value::Int(7));
    assert_eq!(delays.get("covp_delay").unwrap(), Value::Int(9));
    assert!(matches!(delays.set("cuvp_delay", &Value::Int(300)), Err(Error::Domain { .. })));
}

#[test]
fn bitfield_codec() {
    let mut config = Register::bitfield("func_config", 0x2D, &FUNC_CONFIG_FLAGS);
    config.decode(&[0x00, 0x05]).unwrap();
    assert_eq!(config.get("switch").unwrap(), Value::Bool(true));
    assert_eq!(config.get("scrl").unwrap(), Value::Bool(false));
    assert_eq!(config.get("balance_en").unwrap(), Value::Bool(true));
    config.set("led_en", &Value::Bool(true)).unwrap();
    assert_eq!(config.encode().unwrap(), [0x00, 0x15]);
}

#[test]
fn sc_dsgoc2_codec() {
    let mut reg = Register::sc_dsgoc2("sc_dsgoc2", 0x38);
    reg.decode(&[0x85, 0x1E]).unwrap();
    assert_eq!(reg.get("sc").unwrap(), Value::Int(5));
    assert_eq!(reg.get("sc_delay").unwrap(), Value::Int(0));
    assert_eq!(reg.get("sc_dsgoc_x2").unwrap(), Value::Bool(true));
    assert_eq!(reg.get("dsgoc2").unwrap(), Value::Int(14));
    assert_eq!(reg.get("dsgoc2_delay").unwrap(), Value::Int(1));
    assert_eq!(reg.encode().unwrap(), [0x85, 0x1E]);
    // codes outside the device's enumerated domains are rejected
    assert!(matches!(reg.set("sc", &Value::Int(9)), Err(Error::Domain { .. })));
    assert!(matches!(reg.set("dsgoc2_delay", &Value::Int(8)), Err(Error::Domain { .. })));
}

#[test]
fn cxvp_high_delay_codec() {
    let mut reg = Register::cxvp_high_delay_sc_rel("cxvp_high_delay_sc_rel", 0x39);
    reg.decode(&[0x50, 0x14]).unwrap();
    assert_eq!(reg.get("cuvp_high_delay").unwrap(), Value::Int(1));
    assert_eq!(reg.get("covp_high_delay").unwrap(), Value::Int(1));
    assert_eq!(reg.get("sc_rel").unwrap(), Value::Int(20));
    assert_eq!(reg.encode().unwrap(), [0x50, 0x14]);
}

#[test]
fn string_codec() {
    let mut name = Register::text("mfg_name", 0xA0);
    name.decode(&[3, b'a', b'b', b'c']).unwrap();
    assert_eq!(name.get("mfg_name").unwrap(), Value::Text("abc".into()));
    name.set("mfg_name", &Value::Text("hi".into())).unwrap();
    assert_eq!(name.encode().unwrap(), [2, b'h', b'i']);
    let long = "x".repeat(31);
    assert!(matches!(name.set("mfg_name", &Value::Text(long)), Err(Error::Domain { .. })));
    // a length byte running past the payload is a device defect
    assert!(matches!(name.decode(&[9, b'a']), Err(Error::Protocol(_))));
}

#[test]
fn date_codec() {
    let mut date = Register::date("mfg_date", 0x15);
    date.decode(&0x306Fu16.to_be_bytes()).unwrap();
    assert_eq!(date.get("year").unwrap(), Value::Int(2024));
    assert_eq!(date.get("month").unwrap(), Value::Int(3));
    assert_eq!(date.get("day").unwrap(), Value::Int(15));
    assert_eq!(date.encode().unwrap(), 0x306Fu16.to_be_bytes());
    assert!(matches!(date.set("year", &Value::Int(1999)), Err(Error::Domain { .. })));
    assert!(matches!(date.set("month", &Value::Int(13)), Err(Error::Domain { .. })));
}

#[test]
fn error_counts_read_only() {
    let mut counts = Register::error_counts("error_cnts", 0xAA);
    let mut payload = [0u8; 22];
    payload[1] = 3;
    payload[21] = 7;
    counts.decode(&payload).unwrap();
    assert_eq!(counts.get("sc_err_cnt").unwrap(), Value::Int(3));
    assert_eq!(counts.get("puvp_err_cnt").unwrap(), Value::Int(7));
    assert!(matches!(counts.set("sc_err_cnt", &Value::Int(0)), Err(Error::ReadOnly(_))));
    assert!(matches!(counts.encode(), Err(Error::ReadOnly(_))));
    assert!(matches!(counts.decode(&payload[.. 20]), Err(Error::Protocol(_))));
}

#[test]
fn wrong_payload_length() {
    let mut covp = Register::scaled("covp", 0x24, Unit::MilliVolt, 1.0);
    assert!(matches!(covp.decode(&[1]), Err(Error::Protocol(_))));
    assert!(matches!(covp.decode(&[1, 2, 3]), Err(Error::Protocol(_))));
}

fn basic_info_payload() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&1650u16.to_be_bytes());    // pack voltage, 10 mV
    payload.extend_from_slice(&(-250i16).to_be_bytes());  // pack current, 10 mA
    payload.extend_from_slice(&500u16.to_be_bytes());     // remaining capacity, 10 mAh
    payload.extend_from_slice(&1000u16.to_be_bytes());    // nominal capacity, 10 mAh
    payload.extend_from_slice(&12u16.to_be_bytes());      // cycle count
    payload.extend_from_slice(&0x306Fu16.to_be_bytes());  // manufacture date
    payload.extend_from_slice(&5u32.to_be_bytes());       // balancing cells 0 and 2
    payload.extend_from_slice(&0x0001u16.to_be_bytes());  // cell overvoltage fault
    payload.push(0x23);                                   // version
    payload.push(48);                                     // charge percent
    payload.push(0x03);                                   // both fets enabled
    payload.push(4);                                      // cell count
    payload.push(1);                                      // thermistor count
    payload.extend_from_slice(&2981u16.to_be_bytes());    // ntc0, 25.0 degrees
    payload
}

#[test]
fn basic_info_decode() {
    let mut info = Register::basic_info();
    info.decode(&basic_info_payload()).unwrap();
    assert_eq!(info.get("pack_mv").unwrap(), Value::Int(16500));
    assert_eq!(info.get("pack_ma").unwrap(), Value::Int(-2500));
    assert_eq!(info.get("cap_rem").unwrap(), Value::Int(5000));
    assert_eq!(info.get("cap_nom").unwrap(), Value::Int(10000));
    assert_eq!(info.get("cycle_cnt").unwrap(), Value::Int(12));
    assert_eq!(info.get("year").unwrap(), Value::Int(2024));
    assert_eq!(info.get("bal0").unwrap(), Value::Bool(true));
    assert_eq!(info.get("bal1").unwrap(), Value::Bool(false));
    assert_eq!(info.get("bal2").unwrap(), Value::Bool(true));
    assert_eq!(info.get("covp_err").unwrap(), Value::Bool(true));
    assert_eq!(info.get("sc_err").unwrap(), Value::Bool(false));
    assert_eq!(info.get("version").unwrap(), Value::Int(0x23));
    assert_eq!(info.get("cap_pct").unwrap(), Value::Int(48));
    assert_eq!(info.get("chg_fet_en").unwrap(), Value::Bool(true));
    assert_eq!(info.get("dsg_fet_en").unwrap(), Value::Bool(true));
    assert_eq!(info.get("cell_cnt").unwrap(), Value::Int(4));
    assert_eq!(info.get("ntc_cnt").unwrap(), Value::Int(1));
    assert_eq!(info.get("ntc0").unwrap(), Value::Float(25.0));
    // the single declared thermistor is the only one reported
    assert!(info.get("ntc1").is_err());
}

#[test]
fn basic_info_truncated() {
    let mut info = Register::basic_info();
    assert!(matches!(info.decode(&[0u8; 10]), Err(Error::Protocol(_))));
    // header declares a thermistor the payload does not carry
    let payload = &basic_info_payload()[.. 23];
    assert!(matches!(info.decode(payload), Err(Error::Protocol(_))));
}

#[test]
fn cell_info_decode() {
    let mut cells = Register::cell_info();
    let mut payload = Vec::new();
    payload.extend_from_slice(&3300u16.to_be_bytes());
    payload.extend_from_slice(&3301u16.to_be_bytes());
    cells.decode(&payload).unwrap();
    assert_eq!(cells.get("cell0_mv").unwrap(), Value::Int(3300));
    assert_eq!(cells.get("cell1_mv").unwrap(), Value::Int(3301));
    assert!(cells.get("cell2_mv").is_err());
}

#[test]
fn device_info_decode() {
    let mut device = Register::device_info();
    device.decode(b"JBD-SP04S020").unwrap();
    assert_eq!(device.get("device_name").unwrap(), Value::Text("JBD-SP04S020".into()));
}
