/*!
    typed codecs for the device's register bank

    each register owns one EEPROM address and one or more named values. the
    closed set of variants in [Register] covers every payload layout the
    device defines; all of them expose the same `{get, set, decode, encode}`
    capability, dispatched by variant.

    [Bank] is the complete ordered register table for one device model,
    with a value-name index built once at construction and a startup
    self-check against duplicate names or addresses.
*/

use core::fmt;
use std::collections::{BTreeMap, HashMap};

use bilge::prelude::*;
use packbytes::{ByteArray, FromBytes};

use crate::error::Error;
use crate::tables::{self, Unit};

/// mapping from value names to engineering values, as returned by bank and telemetry reads
pub type Values = BTreeMap<String, Value>;

/// one engineering value carried by a register
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}
impl Value {
    /// integer content, if the value is integral
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Self::Int(value) => Some(value),
            Self::Float(value) if value.fract() == 0.0 => Some(value as i64),
            _ => None,
        }
    }
    /// numeric content widened to float
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Self::Int(value) => Some(value as f64),
            Self::Float(value) => Some(value),
            _ => None,
        }
    }
    /// boolean content, accepting integers 0 and 1 like the snapshot text format
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(value) => Some(value),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            _ => None,
        }
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self { Self::Int(value) }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self { Self::Float(value) }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self { Self::Bool(value) }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self { Self::Text(value.into()) }
}
impl From<String> for Value {
    fn from(value: String) -> Self { Self::Text(value) }
}


/// manufacture date packed into one word: day in the low 5 bits, then month, then year offset from 2000
#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
struct PackedDate {
    day: u5,
    month: u4,
    year: u7,
}

/// first byte of the SC/DSGOC2 register: threshold code, delay code, doubled-thresholds flag in the top bit
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
struct ScByte {
    sc: u3,
    sc_delay: u2,
    reserved: u2,
    doubled: bool,
}

/// second byte of the SC/DSGOC2 register: threshold code in the low nibble, delay code in the high one
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
struct Dsgoc2Byte {
    dsgoc2: u4,
    dsgoc2_delay: u4,
}

/// first byte of the high-protection delay register: two 2-bit delay codes in the top nibble
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
struct CxvpByte {
    reserved: u4,
    covp_high_delay: u2,
    cuvp_high_delay: u2,
}

/// fixed leading block of the basic-info telemetry payload
#[derive(Copy, Clone, FromBytes, Debug)]
struct BasicInfoHeader {
    pack_mv: u16,
    pack_ma: i16,
    cap_rem: u16,
    cap_nom: u16,
    cycle_cnt: u16,
    mfg_date: u16,
    balance: u32,
    fault: u16,
    version: u8,
    cap_pct: u8,
    fet: u8,
    cell_cnt: u8,
    ntc_cnt: u8,
}

const FAULT_NAMES: [&str; 13] = [
    "covp_err", "cuvp_err", "povp_err", "puvp_err",
    "chgot_err", "chgut_err", "dsgot_err", "dsgut_err",
    "chgoc_err", "dsgoc_err", "sc_err", "afe_err", "software_err",
];
const FET_NAMES: [&str; 2] = ["chg_fet_en", "dsg_fet_en"];
const ERROR_COUNT_NAMES: [&str; 11] = [
    "sc_err_cnt", "chgoc_err_cnt", "dsgoc_err_cnt",
    "covp_err_cnt", "cuvp_err_cnt",
    "chgot_err_cnt", "chgut_err_cnt", "dsgot_err_cnt", "dsgut_err_cnt",
    "povp_err_cnt", "puvp_err_cnt",
];

/// temperatures travel as deci-Kelvin in an unsigned word
pub fn unpack_temp(raw: u16) -> f64 {
    (f64::from(raw) - 2731.0) / 10.0
}
pub fn pack_temp(celsius: f64) -> u16 {
    ((celsius * 10.0).round() as i32 + 2731).clamp(0, 0xFFFF) as u16
}

fn word(payload: &[u8]) -> Result<u16, Error> {
    let bytes: [u8; 2] = payload.try_into()
        .map_err(|_| Error::Protocol("register payload is not 2 bytes"))?;
    Ok(u16::from_be_bytes(bytes))
}


/// one 16-bit big-endian integer, linearly scaled by a fixed factor
#[derive(Clone, Debug)]
pub struct ScaledReg {
    name: &'static str,
    address: u8,
    unit: Unit,
    factor: f64,
    /// allowed engineering-unit span, inclusive
    range: (f64, f64),
    value: f64,
}
impl ScaledReg {
    pub fn new(name: &'static str, address: u8, unit: Unit, factor: f64) -> Self {
        Self {
            name, address, unit, factor,
            // the span an i16 word can carry without saturating
            range: (-32768.0 * factor, 32767.0 * factor),
            value: 0.0,
        }
    }
    pub fn unit(&self) -> Unit {
        self.unit
    }
    fn get(&self) -> Value {
        if self.factor.fract() == 0.0 {
            Value::Int(self.value as i64)
        } else {
            Value::Float(self.value)
        }
    }
    fn set(&mut self, value: &Value) -> Result<(), Error> {
        let v = value.as_float()
            .filter(|v| (self.range.0 ..= self.range.1).contains(v))
            .ok_or(Error::Domain { name: self.name, value: value.clone() })?;
        self.value = v;
        Ok(())
    }
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.value = f64::from(word(payload)? as i16) * self.factor;
        Ok(())
    }
    fn encode(&self) -> Vec<u8> {
        ((self.value / self.factor).round() as i16).to_be_bytes().to_vec()
    }
}

/// one temperature stored as deci-Kelvin on the wire, exposed in Celsius
#[derive(Clone, Debug)]
pub struct TempReg {
    name: &'static str,
    address: u8,
    read_only: bool,
    celsius: f64,
}
impl TempReg {
    /// full unsigned deci-Kelvin span
    const RANGE: (f64, f64) = (-273.15, 6136.4);

    pub fn new(name: &'static str, address: u8) -> Self {
        Self { name, address, read_only: false, celsius: 0.0 }
    }
    pub fn read_only(name: &'static str, address: u8) -> Self {
        Self { read_only: true, ..Self::new(name, address) }
    }
    fn set(&mut self, value: &Value) -> Result<(), Error> {
        let v = value.as_float()
            .filter(|v| (Self::RANGE.0 ..= Self::RANGE.1).contains(v))
            .ok_or(Error::Domain { name: self.name, value: value.clone() })?;
        self.celsius = v;
        Ok(())
    }
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.celsius = unpack_temp(word(payload)?);
        Ok(())
    }
    fn encode(&self) -> Vec<u8> {
        pack_temp(self.celsius).to_be_bytes().to_vec()
    }
}

/// two unscaled 8-bit delays in seconds
#[derive(Clone, Debug)]
pub struct DelayReg {
    name: &'static str,
    address: u8,
    names: [&'static str; 2],
    seconds: [u8; 2],
}
impl DelayReg {
    pub fn new(name: &'static str, address: u8, first: &'static str, second: &'static str) -> Self {
        Self { name, address, names: [first, second], seconds: [0, 0] }
    }
    fn set(&mut self, value_name: &str, value: &Value) -> Result<(), Error> {
        let slot = self.names.iter().position(|&n| n == value_name)
            .ok_or_else(|| Error::UnknownValue(value_name.into()))?;
        let v = value.as_int()
            .filter(|v| (0 ..= 255).contains(v))
            .ok_or(Error::Domain { name: self.names[slot], value: value.clone() })?;
        self.seconds[slot] = v as u8;
        Ok(())
    }
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.seconds = payload.try_into()
            .map_err(|_| Error::Protocol("delay payload is not 2 bytes"))?;
        Ok(())
    }
}

/// one word of booleans, each flag bound to one bit position in declaration order from bit 0
#[derive(Clone, Debug)]
pub struct BitfieldReg {
    name: &'static str,
    address: u8,
    flags: &'static [&'static str],
    bits: u16,
}
impl BitfieldReg {
    pub fn new(name: &'static str, address: u8, flags: &'static [&'static str]) -> Self {
        Self { name, address, flags, bits: 0 }
    }
    fn set(&mut self, value_name: &str, value: &Value) -> Result<(), Error> {
        let bit = self.flags.iter().position(|&n| n == value_name)
            .map(|i| 1 << i)
            .ok_or_else(|| Error::UnknownValue(value_name.into()))?;
        match value.as_bool() {
            Some(true) => self.bits |= bit,
            Some(false) => self.bits &= !bit,
            None => return Err(Error::Domain { name: self.name, value: value.clone() }),
        }
        Ok(())
    }
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.bits = word(payload)?;
        Ok(())
    }
}

/// composite short-circuit / secondary discharge-overcurrent register
///
/// all four codes index the [tables] enum domains; `sc_dsgoc_x2` doubles
/// both current thresholds when set
#[derive(Clone, Debug)]
pub struct ScDsgoc2Reg {
    name: &'static str,
    address: u8,
    sc: u8,
    sc_delay: u8,
    dsgoc2: u8,
    dsgoc2_delay: u8,
    doubled: bool,
}
impl ScDsgoc2Reg {
    pub const VALUE_NAMES: [&'static str; 5] = ["sc", "sc_delay", "dsgoc2", "dsgoc2_delay", "sc_dsgoc_x2"];

    pub fn new(name: &'static str, address: u8) -> Self {
        Self { name, address, sc: 0, sc_delay: 0, dsgoc2: 0, dsgoc2_delay: 0, doubled: false }
    }
    fn get(&self, value_name: &str) -> Result<Value, Error> {
        Ok(match value_name {
            "sc" => Value::Int(self.sc.into()),
            "sc_delay" => Value::Int(self.sc_delay.into()),
            "dsgoc2" => Value::Int(self.dsgoc2.into()),
            "dsgoc2_delay" => Value::Int(self.dsgoc2_delay.into()),
            "sc_dsgoc_x2" => Value::Bool(self.doubled),
            _ => return Err(Error::UnknownValue(value_name.into())),
        })
    }
    fn set(&mut self, value_name: &str, value: &Value) -> Result<(), Error> {
        let code = |table: &tables::EnumTable, name: &'static str| {
            value.as_int()
                .filter(|&code| table.contains(code))
                .map(|code| code as u8)
                .ok_or(Error::Domain { name, value: value.clone() })
        };
        match value_name {
            "sc" => self.sc = code(&tables::SC, "sc")?,
            "sc_delay" => self.sc_delay = code(&tables::SC_DELAY, "sc_delay")?,
            "dsgoc2" => self.dsgoc2 = code(&tables::DSGOC2, "dsgoc2")?,
            "dsgoc2_delay" => self.dsgoc2_delay = code(&tables::DSGOC2_DELAY, "dsgoc2_delay")?,
            "sc_dsgoc_x2" => self.doubled = value.as_bool()
                .ok_or(Error::Domain { name: "sc_dsgoc_x2", value: value.clone() })?,
            _ => return Err(Error::UnknownValue(value_name.into())),
        }
        Ok(())
    }
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        let [b1, b2]: [u8; 2] = payload.try_into()
            .map_err(|_| Error::Protocol("sc/dsgoc2 payload is not 2 bytes"))?;
        let b1 = ScByte::from(b1);
        let b2 = Dsgoc2Byte::from(b2);
        self.sc = b1.sc().value();
        self.sc_delay = b1.sc_delay().value();
        self.doubled = b1.doubled();
        self.dsgoc2 = b2.dsgoc2().value();
        self.dsgoc2_delay = b2.dsgoc2_delay().value();
        Ok(())
    }
    fn encode(&self) -> Vec<u8> {
        let mut b1 = ScByte::from(0);
        b1.set_sc(u3::new(self.sc));
        b1.set_sc_delay(u2::new(self.sc_delay));
        b1.set_doubled(self.doubled);
        let mut b2 = Dsgoc2Byte::from(0);
        b2.set_dsgoc2(u4::new(self.dsgoc2));
        b2.set_dsgoc2_delay(u4::new(self.dsgoc2_delay));
        vec![u8::from(b1), u8::from(b2)]
    }
}

/// composite high-protection delay / short-circuit release register
#[derive(Clone, Debug)]
pub struct CxvpHighDelayScRelReg {
    name: &'static str,
    address: u8,
    cuvp_high_delay: u8,
    covp_high_delay: u8,
    sc_rel: u8,
}
impl CxvpHighDelayScRelReg {
    pub const VALUE_NAMES: [&'static str; 3] = ["cuvp_high_delay", "covp_high_delay", "sc_rel"];

    pub fn new(name: &'static str, address: u8) -> Self {
        Self { name, address, cuvp_high_delay: 0, covp_high_delay: 0, sc_rel: 0 }
    }
    fn get(&self, value_name: &str) -> Result<Value, Error> {
        Ok(match value_name {
            "cuvp_high_delay" => Value::Int(self.cuvp_high_delay.into()),
            "covp_high_delay" => Value::Int(self.covp_high_delay.into()),
            "sc_rel" => Value::Int(self.sc_rel.into()),
            _ => return Err(Error::UnknownValue(value_name.into())),
        })
    }
    fn set(&mut self, value_name: &str, value: &Value) -> Result<(), Error> {
        let int = value.as_int();
        match value_name {
            "cuvp_high_delay" => self.cuvp_high_delay = int
                .filter(|&code| tables::CUVP_HIGH_DELAY.contains(code))
                .ok_or(Error::Domain { name: "cuvp_high_delay", value: value.clone() })? as u8,
            "covp_high_delay" => self.covp_high_delay = int
                .filter(|&code| tables::COVP_HIGH_DELAY.contains(code))
                .ok_or(Error::Domain { name: "covp_high_delay", value: value.clone() })? as u8,
            "sc_rel" => self.sc_rel = int
                .filter(|v| (0 ..= 255).contains(v))
                .ok_or(Error::Domain { name: "sc_rel", value: value.clone() })? as u8,
            _ => return Err(Error::UnknownValue(value_name.into())),
        }
        Ok(())
    }
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        let [b1, sc_rel]: [u8; 2] = payload.try_into()
            .map_err(|_| Error::Protocol("high-delay payload is not 2 bytes"))?;
        let b1 = CxvpByte::from(b1);
        self.cuvp_high_delay = b1.cuvp_high_delay().value();
        self.covp_high_delay = b1.covp_high_delay().value();
        self.sc_rel = sc_rel;
        Ok(())
    }
    fn encode(&self) -> Vec<u8> {
        let mut b1 = CxvpByte::from(0);
        b1.set_covp_high_delay(u2::new(self.covp_high_delay));
        b1.set_cuvp_high_delay(u2::new(self.cuvp_high_delay));
        vec![u8::from(b1), self.sc_rel]
    }
}

/// length-prefixed text, at most 30 bytes of content
#[derive(Clone, Debug)]
pub struct StringReg {
    name: &'static str,
    address: u8,
    value: String,
}
impl StringReg {
    pub const MAX_LEN: usize = 30;

    pub fn new(name: &'static str, address: u8) -> Self {
        Self { name, address, value: String::new() }
    }
    fn set(&mut self, value: &Value) -> Result<(), Error> {
        let text = value.as_text()
            .filter(|text| text.len() <= Self::MAX_LEN)
            .ok_or(Error::Domain { name: self.name, value: value.clone() })?;
        self.value = text.into();
        Ok(())
    }
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        let len = usize::from(*payload.first()
            .ok_or(Error::Protocol("empty string payload"))?);
        let text = payload.get(1 .. 1 + len)
            .ok_or(Error::Protocol("string payload shorter than its length byte"))?;
        self.value = String::from_utf8_lossy(text).into_owned();
        Ok(())
    }
    fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(1 + self.value.len());
        payload.push(self.value.len() as u8);
        payload.extend_from_slice(self.value.as_bytes());
        payload
    }
}

/// manufacture date, one packed word
#[derive(Clone, Debug)]
pub struct DateReg {
    name: &'static str,
    address: u8,
    year: u16,
    month: u8,
    day: u8,
}
impl DateReg {
    pub const VALUE_NAMES: [&'static str; 3] = ["year", "month", "day"];

    pub fn new(name: &'static str, address: u8) -> Self {
        Self { name, address, year: 2000, month: 1, day: 1 }
    }
    /// split a packed date word into (year, month, day)
    pub fn unpack_date(raw: u16) -> (u16, u8, u8) {
        let date = PackedDate::from(raw);
        (
            u16::from(date.year().value()) + 2000,
            date.month().value(),
            date.day().value(),
        )
    }
    /// pack (year, month, day) into the wire word
    pub fn pack_date(year: u16, month: u8, day: u8) -> u16 {
        let mut date = PackedDate::from(0);
        date.set_day(u5::new(day & 0x1F));
        date.set_month(u4::new(month & 0xF));
        date.set_year(u7::new((year.wrapping_sub(2000) & 0x7F) as u8));
        u16::from(date)
    }
    fn get(&self, value_name: &str) -> Result<Value, Error> {
        Ok(match value_name {
            "year" => Value::Int(self.year.into()),
            "month" => Value::Int(self.month.into()),
            "day" => Value::Int(self.day.into()),
            _ => return Err(Error::UnknownValue(value_name.into())),
        })
    }
    fn set(&mut self, value_name: &str, value: &Value) -> Result<(), Error> {
        let int = |name, range: core::ops::RangeInclusive<i64>| {
            value.as_int()
                .filter(|v| range.contains(v))
                .ok_or(Error::Domain { name, value: value.clone() })
        };
        match value_name {
            "year" => self.year = int("year", 2000 ..= 2127)? as u16,
            "month" => self.month = int("month", 1 ..= 12)? as u8,
            "day" => self.day = int("day", 1 ..= 31)? as u8,
            _ => return Err(Error::UnknownValue(value_name.into())),
        }
        Ok(())
    }
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        (self.year, self.month, self.day) = Self::unpack_date(word(payload)?);
        Ok(())
    }
    fn encode(&self) -> Vec<u8> {
        Self::pack_date(self.year, self.month, self.day).to_be_bytes().to_vec()
    }
}

/// eleven consecutive fault counters, read-only
#[derive(Clone, Debug)]
pub struct ErrorCountReg {
    name: &'static str,
    address: u8,
    counts: [u16; 11],
}
impl ErrorCountReg {
    pub fn new(name: &'static str, address: u8) -> Self {
        Self { name, address, counts: [0; 11] }
    }
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() != 22 {
            return Err(Error::Protocol("error-count payload is not 22 bytes"));
        }
        for (count, bytes) in self.counts.iter_mut().zip(payload.chunks_exact(2)) {
            *count = u16::from_be_bytes([bytes[0], bytes[1]]);
        }
        Ok(())
    }
}

/// live pack telemetry, read-only
#[derive(Clone, Debug, Default)]
pub struct BasicInfoReg {
    values: Vec<(String, Value)>,
}
impl BasicInfoReg {
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        const HEADER: usize = <<BasicInfoHeader as FromBytes>::Bytes as ByteArray>::SIZE;
        let header: [u8; HEADER] = payload.get(.. HEADER)
            .and_then(|block| block.try_into().ok())
            .ok_or(Error::Protocol("basic-info payload shorter than its fixed header"))?;
        let header = BasicInfoHeader::from_be_bytes(header);

        let mut values = Vec::with_capacity(64);
        // voltages, currents and capacities are stored divided by ten
        values.push(("pack_mv".into(), Value::Int(i64::from(header.pack_mv) * 10)));
        values.push(("pack_ma".into(), Value::Int(i64::from(header.pack_ma) * 10)));
        values.push(("cap_rem".into(), Value::Int(i64::from(header.cap_rem) * 10)));
        values.push(("cap_nom".into(), Value::Int(i64::from(header.cap_nom) * 10)));
        values.push(("cycle_cnt".into(), Value::Int(header.cycle_cnt.into())));
        let (year, month, day) = DateReg::unpack_date(header.mfg_date);
        values.push(("year".into(), Value::Int(year.into())));
        values.push(("month".into(), Value::Int(month.into())));
        values.push(("day".into(), Value::Int(day.into())));
        for bit in 0 .. 32 {
            values.push((format!("bal{bit}"), Value::Bool(header.balance & (1 << bit) != 0)));
        }
        for (bit, name) in FAULT_NAMES.iter().enumerate() {
            values.push(((*name).into(), Value::Bool(header.fault & (1 << bit) != 0)));
        }
        values.push(("version".into(), Value::Int(header.version.into())));
        values.push(("cap_pct".into(), Value::Int(header.cap_pct.into())));
        for (bit, name) in FET_NAMES.iter().enumerate() {
            values.push(((*name).into(), Value::Bool(header.fet & (1 << bit) != 0)));
        }
        values.push(("cell_cnt".into(), Value::Int(header.cell_cnt.into())));
        values.push(("ntc_cnt".into(), Value::Int(header.ntc_cnt.into())));
        // only the first ntc_cnt thermistor slots carry a reading, absent ones are omitted
        let ntc_cnt = usize::from(header.ntc_cnt).min(8);
        if payload.len() < HEADER + 2 * ntc_cnt {
            return Err(Error::Protocol("basic-info payload truncates its thermistor block"));
        }
        for i in 0 .. ntc_cnt {
            let offset = HEADER + 2 * i;
            let raw = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
            values.push((format!("ntc{i}"), Value::Float(unpack_temp(raw))));
        }

        self.values = values;
        Ok(())
    }
}

/// per-cell voltage table, read-only
#[derive(Clone, Debug, Default)]
pub struct CellInfoReg {
    millivolts: Vec<u16>,
}
impl CellInfoReg {
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.millivolts = payload.chunks_exact(2)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
            .collect();
        Ok(())
    }
    fn values(&self) -> Vec<(String, Value)> {
        self.millivolts.iter().enumerate()
            .map(|(i, &mv)| (format!("cell{i}_mv"), Value::Int(mv.into())))
            .collect()
    }
}

/// device model name, read-only
#[derive(Clone, Debug, Default)]
pub struct DeviceInfoReg {
    device_name: String,
}
impl DeviceInfoReg {
    fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.device_name = String::from_utf8_lossy(payload).into_owned();
        Ok(())
    }
}


/// the closed set of register payload layouts
#[derive(Clone, Debug)]
pub enum Register {
    Scaled(ScaledReg),
    Temp(TempReg),
    Delays(DelayReg),
    Bitfield(BitfieldReg),
    ScDsgoc2(ScDsgoc2Reg),
    CxvpHighDelayScRel(CxvpHighDelayScRelReg),
    Text(StringReg),
    Date(DateReg),
    ErrorCounts(ErrorCountReg),
    BasicInfo(BasicInfoReg),
    CellInfo(CellInfoReg),
    DeviceInfo(DeviceInfoReg),
}
impl Register {
    pub fn scaled(name: &'static str, address: u8, unit: Unit, factor: f64) -> Self {
        Self::Scaled(ScaledReg::new(name, address, unit, factor))
    }
    pub fn temperature(name: &'static str, address: u8) -> Self {
        Self::Temp(TempReg::new(name, address))
    }
    pub fn temperature_read_only(name: &'static str, address: u8) -> Self {
        Self::Temp(TempReg::read_only(name, address))
    }
    pub fn delays(name: &'static str, address: u8, first: &'static str, second: &'static str) -> Self {
        Self::Delays(DelayReg::new(name, address, first, second))
    }
    pub fn bitfield(name: &'static str, address: u8, flags: &'static [&'static str]) -> Self {
        Self::Bitfield(BitfieldReg::new(name, address, flags))
    }
    pub fn text(name: &'static str, address: u8) -> Self {
        Self::Text(StringReg::new(name, address))
    }
    pub fn date(name: &'static str, address: u8) -> Self {
        Self::Date(DateReg::new(name, address))
    }
    pub fn sc_dsgoc2(name: &'static str, address: u8) -> Self {
        Self::ScDsgoc2(ScDsgoc2Reg::new(name, address))
    }
    pub fn cxvp_high_delay_sc_rel(name: &'static str, address: u8) -> Self {
        Self::CxvpHighDelayScRel(CxvpHighDelayScRelReg::new(name, address))
    }
    pub fn error_counts(name: &'static str, address: u8) -> Self {
        Self::ErrorCounts(ErrorCountReg::new(name, address))
    }
    pub fn basic_info() -> Self {
        Self::BasicInfo(BasicInfoReg::default())
    }
    pub fn cell_info() -> Self {
        Self::CellInfo(CellInfoReg::default())
    }
    pub fn device_info() -> Self {
        Self::DeviceInfo(DeviceInfoReg::default())
    }

    /// register name, for diagnostics and the bank self-check
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scaled(reg) => reg.name,
            Self::Temp(reg) => reg.name,
            Self::Delays(reg) => reg.name,
            Self::Bitfield(reg) => reg.name,
            Self::ScDsgoc2(reg) => reg.name,
            Self::CxvpHighDelayScRel(reg) => reg.name,
            Self::Text(reg) => reg.name,
            Self::Date(reg) => reg.name,
            Self::ErrorCounts(reg) => reg.name,
            Self::BasicInfo(_) => "basic_info",
            Self::CellInfo(_) => "cell_info",
            Self::DeviceInfo(_) => "device_info",
        }
    }

    /// device memory address
    pub fn address(&self) -> u8 {
        match self {
            Self::Scaled(reg) => reg.address,
            Self::Temp(reg) => reg.address,
            Self::Delays(reg) => reg.address,
            Self::Bitfield(reg) => reg.address,
            Self::ScDsgoc2(reg) => reg.address,
            Self::CxvpHighDelayScRel(reg) => reg.address,
            Self::Text(reg) => reg.address,
            Self::Date(reg) => reg.address,
            Self::ErrorCounts(reg) => reg.address,
            Self::BasicInfo(_) => 0x03,
            Self::CellInfo(_) => 0x04,
            Self::DeviceInfo(_) => 0x05,
        }
    }

    /// whether writes and [Self::encode] are forbidden
    pub fn read_only(&self) -> bool {
        match self {
            Self::Temp(reg) => reg.read_only,
            Self::ErrorCounts(_) | Self::BasicInfo(_) | Self::CellInfo(_) | Self::DeviceInfo(_) => true,
            _ => false,
        }
    }

    /**
        statically declared value names, used for the bank index

        telemetry registers name their values only once decoded (the cell
        count is not known up front), so they report none here
    */
    pub fn value_names(&self) -> Vec<&'static str> {
        match self {
            Self::Scaled(reg) => vec![reg.name],
            Self::Temp(reg) => vec![reg.name],
            Self::Delays(reg) => reg.names.to_vec(),
            Self::Bitfield(reg) => reg.flags.to_vec(),
            Self::ScDsgoc2(_) => ScDsgoc2Reg::VALUE_NAMES.to_vec(),
            Self::CxvpHighDelayScRel(_) => CxvpHighDelayScRelReg::VALUE_NAMES.to_vec(),
            Self::Text(reg) => vec![reg.name],
            Self::Date(_) => DateReg::VALUE_NAMES.to_vec(),
            Self::ErrorCounts(_) => ERROR_COUNT_NAMES.to_vec(),
            Self::BasicInfo(_) | Self::CellInfo(_) | Self::DeviceInfo(_) => Vec::new(),
        }
    }

    /// current content as (value name, value) pairs
    pub fn values(&self) -> Vec<(String, Value)> {
        match self {
            Self::Scaled(reg) => vec![(reg.name.into(), reg.get())],
            Self::Temp(reg) => vec![(reg.name.into(), Value::Float(reg.celsius))],
            Self::Delays(reg) => reg.names.iter().zip(reg.seconds)
                .map(|(&name, secs)| (name.into(), Value::Int(secs.into())))
                .collect(),
            Self::Bitfield(reg) => reg.flags.iter().enumerate()
                .map(|(i, &name)| (name.into(), Value::Bool(reg.bits & (1 << i) != 0)))
                .collect(),
            Self::ScDsgoc2(reg) => ScDsgoc2Reg::VALUE_NAMES.iter()
                .filter_map(|&name| Some((name.into(), reg.get(name).ok()?)))
                .collect(),
            Self::CxvpHighDelayScRel(reg) => CxvpHighDelayScRelReg::VALUE_NAMES.iter()
                .filter_map(|&name| Some((name.into(), reg.get(name).ok()?)))
                .collect(),
            Self::Text(reg) => vec![(reg.name.into(), Value::Text(reg.value.clone()))],
            Self::Date(reg) => DateReg::VALUE_NAMES.iter()
                .filter_map(|&name| Some((name.into(), reg.get(name).ok()?)))
                .collect(),
            Self::ErrorCounts(reg) => ERROR_COUNT_NAMES.iter().zip(reg.counts)
                .map(|(&name, count)| (name.into(), Value::Int(count.into())))
                .collect(),
            Self::BasicInfo(reg) => reg.values.clone(),
            Self::CellInfo(reg) => reg.values(),
            Self::DeviceInfo(reg) => vec![("device_name".into(), Value::Text(reg.device_name.clone()))],
        }
    }

    /// read one named value
    pub fn get(&self, value_name: &str) -> Result<Value, Error> {
        self.values().into_iter()
            .find(|(name, _)| name == value_name)
            .map(|(_, value)| value)
            .ok_or_else(|| Error::UnknownValue(value_name.into()))
    }

    /// set one named value, validating its range or domain first
    pub fn set(&mut self, value_name: &str, value: &Value) -> Result<(), Error> {
        if self.read_only() {
            return Err(Error::ReadOnly(self.name()));
        }
        let known = |name: &'static str| -> Result<(), Error> {
            if name == value_name { Ok(()) }
            else { Err(Error::UnknownValue(value_name.into())) }
        };
        match self {
            Self::Scaled(reg) => { known(reg.name)?; reg.set(value) }
            Self::Temp(reg) => { known(reg.name)?; reg.set(value) }
            Self::Delays(reg) => reg.set(value_name, value),
            Self::Bitfield(reg) => reg.set(value_name, value),
            Self::ScDsgoc2(reg) => reg.set(value_name, value),
            Self::CxvpHighDelayScRel(reg) => reg.set(value_name, value),
            Self::Text(reg) => { known(reg.name)?; reg.set(value) }
            Self::Date(reg) => reg.set(value_name, value),
            Self::ErrorCounts(_) | Self::BasicInfo(_) | Self::CellInfo(_) | Self::DeviceInfo(_) =>
                Err(Error::ReadOnly(self.name())),
        }
    }

    /// replace internal state from a raw payload
    pub fn decode(&mut self, payload: &[u8]) -> Result<(), Error> {
        match self {
            Self::Scaled(reg) => reg.decode(payload),
            Self::Temp(reg) => reg.decode(payload),
            Self::Delays(reg) => reg.decode(payload),
            Self::Bitfield(reg) => reg.decode(payload),
            Self::ScDsgoc2(reg) => reg.decode(payload),
            Self::CxvpHighDelayScRel(reg) => reg.decode(payload),
            Self::Text(reg) => reg.decode(payload),
            Self::Date(reg) => reg.decode(payload),
            Self::ErrorCounts(reg) => reg.decode(payload),
            Self::BasicInfo(reg) => reg.decode(payload),
            Self::CellInfo(reg) => reg.decode(payload),
            Self::DeviceInfo(reg) => reg.decode(payload),
        }
    }

    /// produce the wire payload for the current state
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        if self.read_only() {
            return Err(Error::ReadOnly(self.name()));
        }
        Ok(match self {
            Self::Scaled(reg) => reg.encode(),
            Self::Temp(reg) => reg.encode(),
            Self::Delays(reg) => reg.seconds.to_vec(),
            Self::Bitfield(reg) => reg.bits.to_be_bytes().to_vec(),
            Self::ScDsgoc2(reg) => reg.encode(),
            Self::CxvpHighDelayScRel(reg) => reg.encode(),
            Self::Text(reg) => reg.encode(),
            Self::Date(reg) => reg.encode(),
            Self::ErrorCounts(_) | Self::BasicInfo(_) | Self::CellInfo(_) | Self::DeviceInfo(_) =>
                return Err(Error::ReadOnly(self.name())),
        })
    }
}


/// flag names of the function-configuration bitfield
pub static FUNC_CONFIG_FLAGS: [&str; 6] = ["switch", "scrl", "balance_en", "chg_balance_en", "led_en", "led_num"];
/// flag names of the thermistor-configuration bitfield
pub static NTC_CONFIG_FLAGS: [&str; 8] = ["ntc1", "ntc2", "ntc3", "ntc4", "ntc5", "ntc6", "ntc7", "ntc8"];

/**
    the complete ordered configuration register table of one device model

    built once per session. the index mapping every value name to its owning
    register is derived at construction, and duplicate register names,
    addresses or value names are rejected there as configuration defects.
*/
pub struct Bank {
    registers: Vec<Register>,
    index: HashMap<&'static str, usize>,
}
impl Bank {
    /// the standard JBD EEPROM register table
    pub fn standard() -> Result<Self, Error> {
        use Unit::*;
        Self::new(vec![
            // cell and pack voltage protection
            Register::scaled("covp", 0x24, MilliVolt, 1.0),
            Register::scaled("covp_rel", 0x25, MilliVolt, 1.0),
            Register::scaled("cuvp", 0x26, MilliVolt, 1.0),
            Register::scaled("cuvp_rel", 0x27, MilliVolt, 1.0),
            Register::scaled("povp", 0x20, MilliVolt, 10.0),
            Register::scaled("povp_rel", 0x21, MilliVolt, 10.0),
            Register::scaled("puvp", 0x22, MilliVolt, 10.0),
            Register::scaled("puvp_rel", 0x23, MilliVolt, 10.0),
            // temperature protection
            Register::temperature("chgot", 0x18),
            Register::temperature("chgot_rel", 0x19),
            Register::temperature("chgut", 0x1A),
            Register::temperature("chgut_rel", 0x1B),
            Register::temperature("dsgot", 0x1C),
            Register::temperature("dsgot_rel", 0x1D),
            Register::temperature("dsgut", 0x1E),
            Register::temperature("dsgut_rel", 0x1F),
            // current protection
            Register::scaled("chgoc", 0x28, MilliAmp, 10.0),
            Register::scaled("dsgoc", 0x29, MilliAmp, 10.0),
            // protection delays
            Register::delays("cell_v_delays", 0x3D, "cuvp_delay", "covp_delay"),
            Register::delays("pack_v_delays", 0x3C, "puvp_delay", "povp_delay"),
            Register::delays("chg_t_delays", 0x3A, "chgut_delay", "chgot_delay"),
            Register::delays("dsg_t_delays", 0x3B, "dsgut_delay", "dsgot_delay"),
            Register::delays("chgoc_delays", 0x3E, "chgoc_delay", "chgoc_rel"),
            Register::delays("dsgoc_delays", 0x3F, "dsgoc_delay", "dsgoc_rel"),
            // secondary hardware protection
            Register::scaled("covp_high", 0x36, MilliVolt, 1.0),
            Register::scaled("cuvp_high", 0x37, MilliVolt, 1.0),
            Register::sc_dsgoc2("sc_dsgoc2", 0x38),
            Register::cxvp_high_delay_sc_rel("cxvp_high_delay_sc_rel", 0x39),
            // function and thermistor switches
            Register::bitfield("func_config", 0x2D, &FUNC_CONFIG_FLAGS),
            Register::bitfield("ntc_config", 0x2E, &NTC_CONFIG_FLAGS),
            // balancing
            Register::scaled("bal_start", 0x2A, MilliVolt, 1.0),
            Register::scaled("bal_window", 0x2B, MilliVolt, 1.0),
            // hardware description
            Register::scaled("shunt_res", 0x2C, MilliOhm, 0.1),
            Register::scaled("cell_cnt", 0x2F, Integer, 1.0),
            Register::scaled("cycle_cnt", 0x17, Integer, 1.0),
            Register::scaled("serial_num", 0x16, Integer, 1.0),
            Register::text("mfg_name", 0xA0),
            Register::text("device_name", 0xA1),
            Register::text("barcode", 0xA2),
            Register::date("mfg_date", 0x15),
            // capacity model
            Register::scaled("design_cap", 0x10, MilliAmpHour, 10.0),
            Register::scaled("cycle_cap", 0x11, MilliAmpHour, 10.0),
            Register::scaled("dsg_rate", 0x14, Percent, 0.1),
            Register::scaled("cap_100", 0x12, MilliVolt, 1.0),
            Register::scaled("cap_80", 0x32, MilliVolt, 1.0),
            Register::scaled("cap_60", 0x33, MilliVolt, 1.0),
            Register::scaled("cap_40", 0x34, MilliVolt, 1.0),
            Register::scaled("cap_20", 0x35, MilliVolt, 1.0),
            Register::scaled("cap_0", 0x13, MilliVolt, 1.0),
            // timers
            Register::scaled("fet_ctrl", 0x30, Second, 1.0),
            Register::scaled("led_timer", 0x31, Second, 1.0),
            // fault counters
            Register::error_counts("error_cnts", 0xAA),
        ])
    }

    /// build a bank from an ordered register table, running the startup self-check
    pub fn new(registers: Vec<Register>) -> Result<Self, Error> {
        let mut index = HashMap::new();
        let mut names = HashMap::new();
        let mut addresses = HashMap::new();
        for (i, register) in registers.iter().enumerate() {
            if names.insert(register.name(), i).is_some() {
                return Err(Error::Config(format!(
                    "register name {} declared twice", register.name())));
            }
            if let Some(other) = addresses.insert(register.address(), i) {
                return Err(Error::Config(format!(
                    "registers {} and {} share address {:#04x}",
                    registers[other].name(), register.name(), register.address())));
            }
            for value_name in register.value_names() {
                if let Some(other) = index.insert(value_name, i) {
                    return Err(Error::Config(format!(
                        "value name {} declared by both {} and {}",
                        value_name, registers[other].name(), register.name())));
                }
            }
        }
        Ok(Self { registers, index })
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }
    pub fn register(&self, i: usize) -> &Register {
        &self.registers[i]
    }
    pub fn register_mut(&mut self, i: usize) -> &mut Register {
        &mut self.registers[i]
    }
    /// index of the register owning a value name
    pub fn owner(&self, value_name: &str) -> Option<usize> {
        self.index.get(value_name).copied()
    }
    /// every statically declared value name in the bank
    pub fn value_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.registers.iter().flat_map(|register| register.value_names())
    }
}


#[test]
fn test_bank_self_check() {
    let bank = Bank::standard().unwrap();
    assert_eq!(bank.len(), 52);
    assert_eq!(bank.owner("covp_delay"), bank.owner("cuvp_delay"));
    assert!(bank.owner("no_such_value").is_none());

    let address_clash = Bank::new(vec![
        Register::scaled("covp", 0x24, Unit::MilliVolt, 1.0),
        Register::scaled("covp2", 0x24, Unit::MilliVolt, 1.0),
    ]);
    assert!(matches!(address_clash, Err(Error::Config(_))));

    let value_name_clash = Bank::new(vec![
        Register::scaled("covp", 0x24, Unit::MilliVolt, 1.0),
        Register::delays("delays", 0x3D, "covp", "cuvp"),
    ]);
    assert!(matches!(value_name_clash, Err(Error::Config(_))));
}

#[test]
fn test_date_packing() {
    assert_eq!(DateReg::pack_date(2024, 3, 15), 0x306F);
    assert_eq!(DateReg::unpack_date(0x306F), (2024, 3, 15));
    // full round-trip across the representable span
    assert_eq!(DateReg::unpack_date(DateReg::pack_date(2000, 1, 1)), (2000, 1, 1));
    assert_eq!(DateReg::unpack_date(DateReg::pack_date(2127, 12, 31)), (2127, 12, 31));
}
