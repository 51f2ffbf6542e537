use std::fmt;

use crate::wire::codec::MAX_REQUEST_FRAME_BYTES;

pub const FRAME_HEADER_SIZE_BYTES: usize = 4;
/// Smallest limit that still admits every valid request; also the default.
pub const DEFAULT_MAX_FRAME_SIZE_BYTES: usize = MAX_REQUEST_FRAME_BYTES;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramingMode {
    SingleRead,
    LengthPrefixed,
}

impl FramingMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "single_read" => Some(Self::SingleRead),
            "length_prefixed" => Some(Self::LengthPrefixed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleRead => "single_read",
            Self::LengthPrefixed => "length_prefixed",
        }
    }

    pub fn wrap(self, payload: Vec<u8>, max_frame_size: usize) -> Result<Vec<u8>, FrameError> {
        match self {
            Self::SingleRead => Ok(payload),
            Self::LengthPrefixed => {
                validate_length(payload.len(), max_frame_size)?;
                let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE_BYTES + payload.len());
                frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                frame.extend_from_slice(&payload);
                Ok(frame)
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    ZeroLength,
    TooLarge { length: usize, limit: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroLength => write!(f, "protocol error: frame length cannot be zero"),
            Self::TooLarge { length, limit } => {
                write!(f, "protocol error: frame length {length} exceeds max {limit}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

fn validate_length(length: usize, limit: usize) -> Result<(), FrameError> {
    if length == 0 {
        return Err(FrameError::ZeroLength);
    }
    if length > limit {
        return Err(FrameError::TooLarge { length, limit });
    }
    Ok(())
}

#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl FrameAssembler {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if self.buffer.len() < FRAME_HEADER_SIZE_BYTES {
            return Ok(None);
        }

        let declared =
            u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                as usize;
        validate_length(declared, self.max_frame_size)?;

        let total = FRAME_HEADER_SIZE_BYTES + declared;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let payload = self.buffer[FRAME_HEADER_SIZE_BYTES..total].to_vec();
        self.buffer.drain(..total);
        Ok(Some(payload))
    }
}
