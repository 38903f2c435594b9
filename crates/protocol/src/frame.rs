//! Length-prefixed framing over a raw duplex byte pipe.
//!
//! A frame is a ten byte ASCII decimal header followed by exactly that many
//! payload bytes. A header of all zeros marks end-of-stream and carries no
//! payload. Headers are written zero-padded; leading spaces are accepted on
//! read so space-padded peers interoperate.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Width of the decimal length header.
pub const HEADER_LEN: usize = 10;

/// Largest payload a ten digit header can describe.
pub const MAX_PAYLOAD: u64 = 9_999_999_999;

/// Framed payload that asks the dispatcher to stop.
pub const STOP_SENTINEL: &[u8] = b"BYE";

/// Raw two byte acknowledgement written on dispatcher start and stop.
pub const ACK: &[u8; 2] = b"OK";

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A message payload
    Message(Vec<u8>),
    /// The all-zeros header: no more frames follow
    End,
}

impl Frame {
    /// Payload bytes; empty for [`Frame::End`].
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Self::Message(bytes) => bytes,
            Self::End => Vec::new(),
        }
    }

    /// Whether this frame ends the exchange (end-of-stream or `BYE`).
    pub fn is_stop(&self) -> bool {
        match self {
            Self::Message(bytes) => bytes == STOP_SENTINEL,
            Self::End => true,
        }
    }
}

/// Render the fixed-width header for a payload length.
pub fn encode_header(len: u64) -> Result<[u8; HEADER_LEN]> {
    if len > MAX_PAYLOAD {
        return Err(Error::TooLarge(len));
    }
    let text = format!("{len:010}");
    let mut header = [b'0'; HEADER_LEN];
    header.copy_from_slice(text.as_bytes());
    Ok(header)
}

/// Parse a header. `Ok(0)` means end-of-stream.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<u64> {
    let digits: &[u8] = {
        let start = header.iter().position(|b| *b != b' ').unwrap_or(HEADER_LEN);
        &header[start..]
    };

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::BadHeader(
            String::from_utf8_lossy(header).into_owned(),
        ));
    }

    Ok(digits
        .iter()
        .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0')))
}

/// Write one frame and flush. An empty payload is written as end-of-stream.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let header = encode_header(payload.len() as u64)?;
    writer.write_all(&header)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Write the end-of-stream header and flush.
pub fn write_end<W: Write + ?Sized>(writer: &mut W) -> Result<()> {
    write_frame(writer, &[])
}

/// Read exactly one frame, blocking until all promised bytes have arrived.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN];
    let got = read_until_full(reader, &mut header)?;
    if got == 0 {
        return Err(Error::Closed);
    }
    if got < HEADER_LEN {
        return Err(Error::Truncated {
            expected: HEADER_LEN as u64,
            got: got as u64,
        });
    }

    let len = decode_header(&header)?;
    if len == 0 {
        return Ok(Frame::End);
    }

    let mut payload = Vec::new();
    let got = Read::take(&mut *reader, len).read_to_end(&mut payload)? as u64;
    if got < len {
        return Err(Error::Truncated { expected: len, got });
    }
    Ok(Frame::Message(payload))
}

/// Write the raw acknowledgement and flush.
pub fn write_ack<W: Write + ?Sized>(writer: &mut W) -> Result<()> {
    writer.write_all(ACK)?;
    writer.flush()?;
    Ok(())
}

/// Block until two acknowledgement bytes arrive and check them.
pub fn read_ack<R: Read + ?Sized>(reader: &mut R) -> Result<()> {
    let mut buf = [0u8; 2];
    let got = read_until_full(reader, &mut buf)?;
    if got == 0 {
        return Err(Error::Closed);
    }
    if &buf[..got] != ACK {
        return Err(Error::BadAck(String::from_utf8_lossy(&buf[..got]).into_owned()));
    }
    Ok(())
}

// Fill `buf` unless EOF comes first; returns how many bytes landed.
fn read_until_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
