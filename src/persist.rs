/*!
    text snapshot codec for the configuration bank

    the vendor tooling exchanges whole configurations as plain text, one
    `FieldName value` per line. field names and value encodings follow that
    tool, so snapshots saved by it load here unchanged; the value names the
    fields map to are the same ones [crate::session::Session] reads and
    writes through the register bank.
*/

use crate::error::Error;
use crate::registers::{DateReg, FUNC_CONFIG_FLAGS, NTC_CONFIG_FLAGS, Value, Values};

/// text encoding of one snapshot field
#[derive(Copy, Clone, Debug)]
enum Parser {
    /// single integer, scaled into engineering units by a fixed factor
    Int { factor: f64 },
    /// deci-Kelvin integer, exposed in Celsius
    Temp,
    /// packed date word, exposed as year/month/day
    Date,
    /// integer word of flags, one boolean per bit from bit 0
    Bitfield,
    /// packed short-circuit byte: threshold, delay and the doubling flag
    Sc,
    /// packed secondary discharge-overcurrent byte: threshold and delay nibbles
    Dsgoc2,
    /// packed high-protection delay byte, two 2-bit codes in the top nibble
    CxvpDelay,
    /// verbatim text
    Str,
}
impl Parser {
    fn decode(self, text: &str) -> Option<Vec<Value>> {
        let int = || text.parse::<i64>().ok();
        Some(match self {
            Self::Int { factor } => {
                let i = int()?;
                if factor.fract() == 0.0 {
                    vec![Value::Int(i * factor as i64)]
                } else {
                    vec![Value::Float(i as f64 * factor)]
                }
            }
            Self::Temp => vec![Value::Float((int()? - 2731) as f64 / 10.0)],
            Self::Date => {
                let (year, month, day) = DateReg::unpack_date(u16::try_from(int()?).ok()?);
                vec![Value::Int(year.into()), Value::Int(month.into()), Value::Int(day.into())]
            }
            Self::Bitfield => {
                let i = int()?;
                (0 .. 16).map(|bit| Value::Bool(i & (1 << bit) != 0)).collect()
            }
            Self::Sc => {
                let i = int()?;
                vec![
                    Value::Int(i & 0x7),
                    Value::Int((i >> 3) & 0x3),
                    Value::Bool(i & 0x80 != 0),
                ]
            }
            Self::Dsgoc2 => {
                let i = int()?;
                vec![Value::Int(i & 0xF), Value::Int((i >> 4) & 0xF)]
            }
            Self::CxvpDelay => {
                let i = int()?;
                vec![Value::Int((i >> 6) & 0x3), Value::Int((i >> 4) & 0x3)]
            }
            Self::Str => vec![Value::Text(text.into())],
        })
    }

    fn encode(self, values: &[&Value]) -> Option<String> {
        let int = |i: usize| values.get(i)?.as_int();
        Some(match self {
            Self::Int { factor } => {
                let v = values.first()?.as_float()?;
                format!("{}", (v / factor) as i64)
            }
            Self::Temp => {
                let v = values.first()?.as_float()?;
                format!("{}", (v * 10.0).round() as i64 + 2731)
            }
            Self::Date => {
                let (year, month, day) = (int(0)?, int(1)?, int(2)?);
                format!("{}", DateReg::pack_date(year as u16, month as u8, day as u8))
            }
            Self::Bitfield => {
                let mut word = 0u16;
                for (bit, value) in values.iter().enumerate() {
                    if value.as_bool()? {
                        word |= 1 << bit;
                    }
                }
                format!("{word}")
            }
            Self::Sc => {
                let doubled = values.get(2)?.as_bool()?;
                let byte = (int(0)? & 0x7)
                    | (int(1)? & 0x3) << 3
                    | if doubled { 0x80 } else { 0 };
                format!("{byte}")
            }
            Self::Dsgoc2 => format!("{}", (int(0)? & 0xF) | (int(1)? & 0xF) << 4),
            Self::CxvpDelay => format!("{}", (int(0)? & 0x3) << 6 | (int(1)? & 0x3) << 4),
            Self::Str => values.first()?.as_text()?.into(),
        })
    }
}

struct Field {
    name: &'static str,
    values: &'static [&'static str],
    parser: Parser,
}

const X1: Parser = Parser::Int { factor: 1.0 };
const X10: Parser = Parser::Int { factor: 10.0 };
const D10: Parser = Parser::Int { factor: 0.1 };

macro_rules! field {
    ($name:literal, $parser:expr, $($value:literal),+) => {
        Field { name: $name, values: &[$($value),+], parser: $parser }
    };
    ($name:literal, $parser:expr; $values:expr) => {
        Field { name: $name, values: $values, parser: $parser }
    };
}

/// every known snapshot field, in file order
static FIELDS: [Field; 59] = [
    field!("DesignCapacity", X10, "design_cap"),
    field!("CycleCapacity", X10, "cycle_cap"),
    field!("FullChargeVol", X1, "cap_100"),
    field!("ChargeEndVol", X1, "cap_0"),
    field!("DischargingRate", D10, "dsg_rate"),
    field!("ManufactureDate", Parser::Date, "year", "month", "day"),
    field!("SerialNumber", X1, "serial_num"),
    field!("CycleCount", X1, "cycle_cnt"),
    field!("ChgOverTemp", Parser::Temp, "chgot"),
    field!("ChgOTRelease", Parser::Temp, "chgot_rel"),
    field!("ChgLowTemp", Parser::Temp, "chgut"),
    field!("ChgUTRelease", Parser::Temp, "chgut_rel"),
    field!("DisOverTemp", Parser::Temp, "dsgot"),
    field!("DsgOTRelease", Parser::Temp, "dsgot_rel"),
    field!("DisLowTemp", Parser::Temp, "dsgut"),
    field!("DsgUTRelease", Parser::Temp, "dsgut_rel"),
    field!("PackOverVoltage", X10, "povp"),
    field!("PackOVRelease", X10, "povp_rel"),
    field!("PackUnderVoltage", X10, "puvp"),
    field!("PackUVRelease", X10, "puvp_rel"),
    field!("CellOverVoltage", X1, "covp"),
    field!("CellOVRelease", X1, "covp_rel"),
    field!("CellUnderVoltage", X1, "cuvp"),
    field!("CellUVRelease", X1, "cuvp_rel"),
    field!("OverChargeCurrent", X1, "chgoc"),
    field!("OverDisCurrent", X1, "dsgoc"),
    field!("BalanceStartVoltage", X1, "bal_start"),
    field!("BalanceWindow", X1, "bal_window"),
    field!("SenseResistor", X1, "shunt_res"),
    field!("BatteryConfig", Parser::Bitfield; &FUNC_CONFIG_FLAGS),
    field!("NtcConfig", Parser::Bitfield; &NTC_CONFIG_FLAGS),
    field!("PackNum", X1, "cell_cnt"),
    field!("fet_ctrl_time_set", X1, "fet_ctrl"),
    field!("led_disp_time_set", X1, "led_timer"),
    field!("VoltageCap80", X1, "cap_80"),
    field!("VoltageCap60", X1, "cap_60"),
    field!("VoltageCap40", X1, "cap_40"),
    field!("VoltageCap20", X1, "cap_20"),
    field!("HardCellOverVoltage", X1, "covp_high"),
    field!("HardCellUnderVoltage", X1, "cuvp_high"),
    field!("ChgUTDelay", X1, "chgut_delay"),
    field!("ChgOTDelay", X1, "chgot_delay"),
    field!("DsgUTDelay", X1, "dsgut_delay"),
    field!("DsgOTDelay", X1, "dsgot_delay"),
    field!("PackUVDelay", X1, "puvp_delay"),
    field!("PackOVDelay", X1, "povp_delay"),
    field!("CellUVDelay", X1, "cuvp_delay"),
    field!("CellOVDelay", X1, "covp_delay"),
    field!("ChgOCDelay", X1, "chgoc_delay"),
    field!("ChgOCRDelay", X1, "chgoc_rel"),
    field!("DsgOCDelay", X1, "dsgoc_delay"),
    field!("DsgOCRDelay", X1, "dsgoc_rel"),
    field!("ManufacturerName", Parser::Str, "mfg_name"),
    field!("DeviceName", Parser::Str, "device_name"),
    field!("BarCode", Parser::Str, "barcode"),
    field!("HardChgOverCurrent", Parser::Sc, "sc", "sc_delay", "sc_dsgoc_x2"),
    field!("HardDsgOverCurrent", Parser::Dsgoc2, "dsgoc2", "dsgoc2_delay"),
    // the vendor tool reads the two delay codes in this order, keep it
    field!("HardTime", Parser::CxvpDelay, "covp_high_delay", "cuvp_high_delay"),
    field!("SCReleaseTime", X1, "sc_rel"),
];

/// parse a snapshot into named values
///
/// unknown fields are logged and skipped; a field whose value does not
/// parse fails the whole load
pub fn load(text: &str) -> Result<Values, Error> {
    let mut values = Values::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (name, data) = match line.split_once(char::is_whitespace) {
            Some((name, data)) => (name, data.trim_start()),
            None => (line, ""),
        };
        let Some(field) = FIELDS.iter().find(|field| field.name == name) else {
            log::warn!("unknown snapshot field {name}");
            continue;
        };
        let decoded = field.parser.decode(data)
            .ok_or_else(|| Error::Snapshot { field: name.into(), text: data.into() })?;
        // some decoders yield more values than the field declares
        for (&name, value) in field.values.iter().zip(decoded) {
            values.insert(name.into(), value);
        }
    }
    Ok(values)
}

/// render named values as a snapshot
///
/// fields whose values are absent or of the wrong shape are skipped with a
/// warning, so partial maps produce partial snapshots
pub fn save(values: &Values) -> String {
    let mut out = String::new();
    for field in &FIELDS {
        let fetched: Option<Vec<&Value>> = field.values.iter()
            .map(|&name| values.get(name))
            .collect();
        let Some(text) = fetched.and_then(|fetched| field.parser.encode(&fetched)) else {
            log::warn!("snapshot field {} has no complete value, skipping", field.name);
            continue;
        };
        out.push_str(field.name);
        out.push(' ');
        out.push_str(&text);
        out.push('\n');
    }
    out
}


#[test]
fn test_load_basic_fields() {
    let values = load("DesignCapacity 500\nCellOverVoltage 4250\nDischargingRate 2\n").unwrap();
    assert_eq!(values["design_cap"], Value::Int(5000));
    assert_eq!(values["covp"], Value::Int(4250));
    assert_eq!(values["dsg_rate"], Value::Float(0.2));
}

#[test]
fn test_load_packed_fields() {
    let values = load("HardChgOverCurrent 133\nManufactureDate 12399\nHardTime 80\n").unwrap();
    // 133 = 0x85: threshold code 5, delay code 0, doubled thresholds
    assert_eq!(values["sc"], Value::Int(5));
    assert_eq!(values["sc_delay"], Value::Int(0));
    assert_eq!(values["sc_dsgoc_x2"], Value::Bool(true));
    assert_eq!(values["year"], Value::Int(2024));
    assert_eq!(values["month"], Value::Int(3));
    assert_eq!(values["day"], Value::Int(15));
    // 80 = 0b0101_0000: both delay codes 1
    assert_eq!(values["covp_high_delay"], Value::Int(1));
    assert_eq!(values["cuvp_high_delay"], Value::Int(1));
}

#[test]
fn test_load_bitfield_truncates() {
    let values = load("BatteryConfig 5\n").unwrap();
    assert_eq!(values["switch"], Value::Bool(true));
    assert_eq!(values["scrl"], Value::Bool(false));
    assert_eq!(values["balance_en"], Value::Bool(true));
    assert_eq!(values.len(), FUNC_CONFIG_FLAGS.len());
}

#[test]
fn test_load_unknown_field_skipped() {
    let values = load("FileCode 3838\nPackNum 4\n").unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values["cell_cnt"], Value::Int(4));
}

#[test]
fn test_load_bad_value() {
    assert!(matches!(
        load("DesignCapacity many\n"),
        Err(Error::Snapshot { .. }),
    ));
}

#[test]
fn test_save_round_trip() {
    let text = "\
DesignCapacity 500
ManufactureDate 12399
ChgOverTemp 3181
BatteryConfig 5
NtcConfig 3
ManufacturerName acme cells
HardChgOverCurrent 133
HardDsgOverCurrent 30
HardTime 80
SCReleaseTime 20
";
    let values = load(text).unwrap();
    let saved = save(&values);
    // saved output only contains the loaded fields, in table order
    for line in text.lines() {
        assert!(saved.contains(line), "missing line {line:?}");
    }
    assert_eq!(load(&saved).unwrap(), values);
}

#[test]
fn test_save_skips_incomplete() {
    let mut values = Values::new();
    values.insert("year".into(), Value::Int(2024));
    // month and day missing, the date field cannot be rendered
    assert_eq!(save(&values), "");
}
