/*!
    host-side link to JBD battery management systems

    this crate talks the framed request/response protocol JBD controllers
    expose on their UART: reading and writing the EEPROM configuration
    register bank, reading live telemetry, calibrating, and exchanging
    configurations with the vendor tooling's text snapshot format.

    the entry point is [session::Session], generic over any byte link
    implementing [session::Duplex]; the `serial` feature provides one over
    a local serial port.
*/

pub mod error;
pub mod frame;
pub mod persist;
pub mod registers;
pub mod session;
pub mod tables;
#[cfg(feature = "serial")]
pub mod serial;

pub use error::Error;
pub use registers::{Bank, Register, Value, Values};
pub use session::{Duplex, Session, SessionConfig};
#[cfg(feature = "serial")]
pub use serial::SerialLink;
