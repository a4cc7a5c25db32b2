/*!
    wire framing for the JBD request/response protocol

    every exchange is one frame in each direction:

    ```text
    START(1) OP(1) ADDRESS(1) LENGTH(1) DATA(LENGTH) CHECKSUM(2) END(1)
    ```

    the checksum covers ADDRESS, LENGTH and DATA only. responses reuse the
    same shape with a status byte at offset 2 (0 meaning success).
*/

pub const START: u8 = 0xDD;
pub const END: u8 = 0x77;

/// bytes surrounding the payload: start, op, address, length, checksum, end
pub const OVERHEAD: usize = 7;
/// the length field is a single byte
pub const MAX_DATA: usize = 255;

/// direction of a register access
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Read = 0xA5,
    Write = 0x5A,
}

/// additive checksum over the address, length and data bytes, `0x10000 - sum` modulo 65536
pub fn checksum(payload: &[u8]) -> u16 {
    payload.iter()
        .fold(0u16, |sum, &byte| sum.wrapping_add(u16::from(byte)))
        .wrapping_neg()
}

/// build a complete command frame for one register access
pub fn command(op: Op, address: u8, data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= MAX_DATA);
    let mut frame = Vec::with_capacity(OVERHEAD + data.len());
    frame.push(START);
    frame.push(op as u8);
    frame.push(address);
    frame.push(data.len() as u8);
    frame.extend_from_slice(data);
    let sum = checksum(&frame[2..]);
    frame.extend_from_slice(&sum.to_be_bytes());
    frame.push(END);
    frame
}

/// one received frame, reduced to what callers act on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// device status byte, 0 is success
    pub status: u8,
    pub payload: Vec<u8>,
}
impl Response {
    pub fn ok(&self) -> bool {
        self.status == 0
    }
}

/**
    incremental frame scanner fed one byte at a time

    the expected total length is known once the 4th byte (LENGTH) has
    arrived; a frame is complete only when a byte equal to [END] lands
    exactly at position `7 + LENGTH`. a stream that stops before that is an
    incomplete read, not partial data.
*/
#[derive(Default)]
pub struct Scanner {
    buffer: Vec<u8>,
}
impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// feed one byte, returning the finished frame if this byte completed it
    pub fn push(&mut self, byte: u8) -> Option<Response> {
        self.buffer.push(byte);
        if self.buffer.len() < 4 {
            return None;
        }
        let expected = OVERHEAD + usize::from(self.buffer[3]);
        if byte != END || self.buffer.len() != expected {
            return None;
        }
        Some(Response {
            status: self.buffer[2],
            payload: self.buffer[4..expected - 3].to_vec(),
        })
    }

    /// number of bytes accumulated so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[test]
fn test_checksum() {
    // ADDRESS=0x24, LENGTH=2, DATA=[0x01, 0x02]: 0x10000 - 0x29
    assert_eq!(checksum(&[0x24, 0x02, 0x01, 0x02]), 0xFFD7);
    assert_eq!(checksum(&[]), 0);
    assert_eq!(checksum(&[0xFF; 256]), 0x0100);
}

#[test]
fn test_command() {
    assert_eq!(command(Op::Read, 0x24, &[]), [0xDD, 0xA5, 0x24, 0x00, 0xFF, 0xDC, 0x77]);
    assert_eq!(
        command(Op::Write, 0x00, &[0x56, 0x78]),
        [0xDD, 0x5A, 0x00, 0x02, 0x56, 0x78, 0xFF, 0x30, 0x77],
    );
}

#[test]
fn test_scanner_complete() {
    let mut scanner = Scanner::new();
    let frame = [0xDD, 0xA5, 0x00, 0x02, 0x12, 0x34, 0xFF, 0xB8, 0x77];
    let mut result = None;
    for byte in frame {
        assert!(result.is_none());
        result = scanner.push(byte);
    }
    assert_eq!(result, Some(Response { status: 0, payload: vec![0x12, 0x34] }));
}

#[test]
fn test_scanner_end_byte_inside_payload() {
    // a 0x77 inside the data section must not terminate the frame early
    let mut scanner = Scanner::new();
    let frame = [0xDD, 0xA5, 0x00, 0x02, 0x77, 0x77, 0xFF, 0x10, 0x77];
    let mut result = None;
    for byte in frame {
        result = scanner.push(byte);
    }
    let result = result.expect("frame should complete on the final byte");
    assert_eq!(result.payload, vec![0x77, 0x77]);
}

#[test]
fn test_scanner_incomplete() {
    let mut scanner = Scanner::new();
    for byte in [0xDD, 0xA5, 0x00, 0x02, 0x12] {
        assert!(scanner.push(byte).is_none());
    }
    assert_eq!(scanner.len(), 5);
}
