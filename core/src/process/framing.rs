//! Stream framing for child output.
//!
//! Streams start in line mode. A line whose first byte is the control byte
//! [`BINARY_SWITCH`] moves the stream to binary framing: a 4-byte big-endian
//! length followed by that many payload bytes. A zero-length frame returns
//! the stream to line mode.
//!
//! Frames are bounded by a byte limit. A longer line is split into
//! limit-sized pieces; a binary frame announcing more than the limit is an
//! error.

use std::io::{self, BufRead, Read};

pub const BINARY_SWITCH: u8 = 0x1e;

/// Frame limit used when none is configured.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Text form of the frame for event payloads.
    pub fn into_text(self) -> String {
        match self {
            Frame::Line(s) => s,
            Frame::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Line,
    Binary,
}

/// What a decoder produced from the next chunk of input.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    Switch(Mode),
    Eof,
}

pub trait FrameDecoder: Send {
    fn mode(&self) -> Mode;
    fn decode(&mut self, input: &mut dyn BufRead) -> io::Result<Decoded>;
}

pub struct LineDecoder {
    limit: usize,
}

impl FrameDecoder for LineDecoder {
    fn mode(&self) -> Mode {
        Mode::Line
    }

    fn decode(&mut self, input: &mut dyn BufRead) -> io::Result<Decoded> {
        let mut buf = Vec::new();
        if (&mut *input).take(self.limit as u64).read_until(b'\n', &mut buf)? == 0 {
            return Ok(Decoded::Eof);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        } else if buf.len() == self.limit && input.fill_buf()?.first() == Some(&b'\n') {
            // The line fit exactly; its newline is not the start of a piece.
            input.consume(1);
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        if buf.first() == Some(&BINARY_SWITCH) {
            return Ok(Decoded::Switch(Mode::Binary));
        }
        Ok(Decoded::Frame(Frame::Line(
            String::from_utf8_lossy(&buf).into_owned(),
        )))
    }
}

pub struct BinaryDecoder {
    limit: usize,
}

impl FrameDecoder for BinaryDecoder {
    fn mode(&self) -> Mode {
        Mode::Binary
    }

    fn decode(&mut self, input: &mut dyn BufRead) -> io::Result<Decoded> {
        let mut len = [0u8; 4];
        match input.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Decoded::Eof),
            Err(e) => return Err(e),
        }
        let len = u32::from_be_bytes(len) as usize;
        if len == 0 {
            return Ok(Decoded::Switch(Mode::Line));
        }
        if len > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("binary frame of {} bytes exceeds limit of {}", len, self.limit),
            ));
        }
        let mut payload = vec![0u8; len];
        input.read_exact(&mut payload)?;
        Ok(Decoded::Frame(Frame::Binary(payload)))
    }
}

fn decoder_for(mode: Mode, limit: usize) -> Box<dyn FrameDecoder> {
    match mode {
        Mode::Line => Box::new(LineDecoder { limit }),
        Mode::Binary => Box::new(BinaryDecoder { limit }),
    }
}

/// Iterator of frames over a byte stream, swapping decoders on demand.
pub struct FrameReader<R> {
    input: R,
    decoder: Box<dyn FrameDecoder>,
    limit: usize,
    done: bool,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(input: R) -> Self {
        Self::with_limit(input, DEFAULT_MAX_FRAME)
    }

    /// Reader whose frames never exceed `limit` bytes.
    pub fn with_limit(input: R, limit: usize) -> Self {
        let limit = limit.max(1);
        FrameReader {
            input,
            decoder: decoder_for(Mode::Line, limit),
            limit,
            done: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.decoder.mode()
    }

    pub fn into_inner(self) -> R {
        self.input
    }
}

impl<R: BufRead> Iterator for FrameReader<R> {
    type Item = io::Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.decoder.decode(&mut self.input) {
                Ok(Decoded::Frame(f)) => return Some(Ok(f)),
                Ok(Decoded::Switch(mode)) => self.decoder = decoder_for(mode, self.limit),
                Ok(Decoded::Eof) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
