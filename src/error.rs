use thiserror::Error;

/// error regarding BMS communication or register manipulation
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem with the serial link")]
    Bus(#[from] std::io::Error),
    #[error("no complete frame arrived in the expected time")]
    Timeout,
    #[error("device reported failure status {0:#04x}")]
    Device(u8),
    #[error("malformed data from device: {0}")]
    Protocol(&'static str),
    #[error("register {0} is read-only")]
    ReadOnly(&'static str),
    #[error("unknown value name {0}")]
    UnknownValue(String),
    #[error("value {value} is not valid for {name}")]
    Domain {
        name: &'static str,
        value: crate::registers::Value,
    },
    #[error("bad register table: {0}")]
    Config(String),
    #[error("cannot parse {text:?} for snapshot field {field}")]
    Snapshot { field: String, text: String },
}
