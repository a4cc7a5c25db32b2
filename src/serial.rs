/*!
    serial port backend for [Duplex]

    JBD controllers ship with a 9600 baud 8N1 UART behind their comm
    connector; [SerialLink::open] configures the port that way.
*/

use std::io;
use std::path::Path;

use serial2_tokio::{CharSize, Parity, SerialPort, StopBits};

use crate::session::Duplex;

/// byte link over a local serial port
pub struct SerialLink {
    port: SerialPort,
}
impl SerialLink {
    pub const DEFAULT_BAUD_RATE: u32 = 9600;

    /// open and configure the given serial port file
    pub fn open(path: impl AsRef<Path>, rate: u32) -> io::Result<Self> {
        let port = SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
            settings.set_raw();
            settings.set_baud_rate(rate)?;
            settings.set_char_size(CharSize::Bits8);
            settings.set_stop_bits(StopBits::One);
            settings.set_parity(Parity::None);
            Ok(settings)
        })?;
        Ok(Self { port })
    }
}
impl Duplex for SerialLink {
    /// the port stays open for the whole link lifetime, a logical open only
    /// drops whatever stale bytes a previous exchange left behind
    async fn open(&mut self) -> io::Result<()> {
        self.port.discard_buffers()
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        let n = self.port.read(&mut byte).await?;
        Ok((n != 0).then_some(byte[0]))
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await
    }
}
