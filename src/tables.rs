/*!
    static lookup tables shared by the register codecs

    the device encodes a few protection thresholds and delays as small
    integer codes into fixed tables; the tables here map each code to its
    engineering label. all tables are immutable data built into the binary.
*/

/// semantic unit of a named register value
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Unit {
    MilliVolt,
    Volt,
    Celsius,
    Second,
    Kelvin,
    MilliAmp,
    MilliAmpHour,
    Amp,
    AmpHour,
    Percent,
    MilliOhm,
    /// dimensionless integer
    Integer,
}
impl Unit {
    pub fn long_name(&self) -> &'static str {
        match self {
            Self::MilliVolt => "millivolt",
            Self::Volt => "volt",
            Self::Celsius => "Celsius",
            Self::Second => "second",
            Self::Kelvin => "Kelvin",
            Self::MilliAmp => "milliampere",
            Self::MilliAmpHour => "milliampere hour",
            Self::Amp => "ampere",
            Self::AmpHour => "ampere hour",
            Self::Percent => "percent",
            Self::MilliOhm => "milliohm",
            Self::Integer => "integer",
        }
    }
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::MilliVolt => "mV",
            Self::Volt => "V",
            Self::Celsius => "°C",
            Self::Second => "s",
            Self::Kelvin => "K",
            Self::MilliAmp => "mA",
            Self::MilliAmpHour => "mAh",
            Self::Amp => "A",
            Self::AmpHour => "Ah",
            Self::Percent => "%",
            Self::MilliOhm => "mΩ",
            Self::Integer => "",
        }
    }
}

/// one enumerated value domain: device code is the index, label is the engineering quantity
pub struct EnumTable {
    /// unit symbol of the labels, for display only
    pub unit: &'static str,
    labels: &'static [u16],
}
impl EnumTable {
    /// number of valid codes, codes run `0 .. len()`
    pub const fn len(&self) -> usize {
        self.labels.len()
    }
    pub const fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
    /// whether `code` is a valid device code for this domain
    pub fn contains(&self, code: i64) -> bool {
        (0 .. self.labels.len() as i64).contains(&code)
    }
    /// engineering label for a device code
    pub fn label(&self, code: u8) -> Option<u16> {
        self.labels.get(usize::from(code)).copied()
    }
    /// device code for an engineering label
    pub fn code(&self, label: u16) -> Option<u8> {
        self.labels.iter().position(|&l| l == label).map(|i| i as u8)
    }
}

/// short-circuit detection threshold, as mV across the shunt
pub static SC: EnumTable = EnumTable {
    unit: "mV",
    labels: &[22, 33, 44, 56, 67, 78, 89, 100],
};

/// short-circuit detection delay
pub static SC_DELAY: EnumTable = EnumTable {
    unit: "µs",
    labels: &[70, 100, 200, 400],
};

/// secondary discharge-overcurrent threshold, as mV across the shunt
pub static DSGOC2: EnumTable = EnumTable {
    unit: "mV",
    labels: &[8, 11, 14, 17, 19, 22, 25, 28, 31, 33, 36, 39, 42, 44, 47, 50],
};

/// secondary discharge-overcurrent delay
pub static DSGOC2_DELAY: EnumTable = EnumTable {
    unit: "ms",
    labels: &[8, 20, 40, 80, 160, 320, 640, 1280],
};

/// cell-undervoltage high-protection delay
pub static CUVP_HIGH_DELAY: EnumTable = EnumTable {
    unit: "s",
    labels: &[1, 4, 8, 16],
};

/// cell-overvoltage high-protection delay
pub static COVP_HIGH_DELAY: EnumTable = EnumTable {
    unit: "s",
    labels: &[1, 2, 4, 8],
};

#[test]
fn test_enum_table_lookup() {
    assert_eq!(SC.label(5), Some(78));
    assert_eq!(SC.code(78), Some(5));
    assert_eq!(SC.label(8), None);
    assert!(SC.contains(7));
    assert!(!SC.contains(8));
    assert!(!SC.contains(-1));
    assert_eq!(DSGOC2.len(), 16);
    assert_eq!(DSGOC2_DELAY.label(7), Some(1280));
}
