mod modified_utf8;

use std::fmt;

use crate::wire::message::{ErrorKind, Request, RequestType, Response};

pub use modified_utf8::{ModifiedUtf8Error, MAX_ENCODED_LEN as MAX_STRING_BYTES};

/// requestId, type, senderId, receiverId, queueId.
pub const REQUEST_HEADER_SIZE_BYTES: usize = 5 * 4;
/// errorKind, requestId, requestType, messageId.
pub const RESPONSE_HEADER_SIZE_BYTES: usize = 4 * 4;
pub const STRING_LENGTH_SIZE_BYTES: usize = 2;
/// A SendMessage carrying the longest encodable body.
pub const MAX_REQUEST_FRAME_BYTES: usize =
    REQUEST_HEADER_SIZE_BYTES + STRING_LENGTH_SIZE_BYTES + MAX_STRING_BYTES;

#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },
    StringOverrun {
        declared: usize,
        available: usize,
    },
    InvalidString(ModifiedUtf8Error),
    UnknownRequestType {
        code: i32,
    },
    UnknownErrorKind {
        code: i32,
    },
    StringTooLong {
        encoded_len: usize,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated {
                field,
                needed,
                available,
            } => write!(
                f,
                "malformed frame: field '{field}' needs {needed} bytes, only {available} available"
            ),
            Self::StringOverrun {
                declared,
                available,
            } => write!(
                f,
                "malformed frame: string declares {declared} bytes, only {available} available"
            ),
            Self::InvalidString(source) => {
                write!(f, "malformed frame: invalid modified UTF-8 string: {source:?}")
            }
            Self::UnknownRequestType { code } => {
                write!(f, "malformed frame: unknown request type {code}")
            }
            Self::UnknownErrorKind { code } => {
                write!(f, "malformed frame: unknown error kind {code}")
            }
            Self::StringTooLong { encoded_len } => write!(
                f,
                "string of {encoded_len} encoded bytes exceeds the {MAX_STRING_BYTES}-byte limit"
            ),
        }
    }
}

impl std::error::Error for CodecError {}

pub fn encode_request(request: &Request) -> Result<Vec<u8>, CodecError> {
    let mut frame = Vec::with_capacity(REQUEST_HEADER_SIZE_BYTES + STRING_LENGTH_SIZE_BYTES);
    put_i32(&mut frame, request.request_id);
    put_i32(&mut frame, request.request_type.code());
    put_i32(&mut frame, request.sender_id);
    put_i32(&mut frame, request.receiver_id);
    put_i32(&mut frame, request.queue_id);
    if request.request_type.carries_message() {
        put_string(&mut frame, request.message_body())?;
    }
    Ok(frame)
}

/// Trailing bytes after a complete frame are ignored.
pub fn decode_request(frame: &[u8]) -> Result<Request, CodecError> {
    let mut reader = FrameReader::new(frame);
    let request_id = reader.read_i32("request_id")?;
    let type_code = reader.read_i32("type")?;
    let request_type =
        RequestType::from_code(type_code).ok_or(CodecError::UnknownRequestType { code: type_code })?;
    let sender_id = reader.read_i32("sender_id")?;
    let receiver_id = reader.read_i32("receiver_id")?;
    let queue_id = reader.read_i32("queue_id")?;
    let message = if request_type.carries_message() {
        Some(reader.read_string()?)
    } else {
        None
    };

    Ok(Request {
        request_id,
        request_type,
        sender_id,
        receiver_id,
        queue_id,
        message,
    })
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, CodecError> {
    let mut frame = Vec::with_capacity(
        RESPONSE_HEADER_SIZE_BYTES + STRING_LENGTH_SIZE_BYTES + response.retrieved_message.len(),
    );
    put_i32(&mut frame, response.error_kind.code());
    put_i32(&mut frame, response.request_id);
    put_i32(&mut frame, response.request_type.code());
    put_i32(&mut frame, response.message_id);
    put_string(&mut frame, &response.retrieved_message)?;
    Ok(frame)
}

pub fn decode_response(frame: &[u8]) -> Result<Response, CodecError> {
    let mut reader = FrameReader::new(frame);
    let error_code = reader.read_i32("error_kind")?;
    let error_kind =
        ErrorKind::from_code(error_code).ok_or(CodecError::UnknownErrorKind { code: error_code })?;
    let request_id = reader.read_i32("request_id")?;
    let type_code = reader.read_i32("request_type")?;
    let request_type =
        RequestType::from_code(type_code).ok_or(CodecError::UnknownRequestType { code: type_code })?;
    let message_id = reader.read_i32("message_id")?;
    let retrieved_message = reader.read_string()?;

    Ok(Response {
        error_kind,
        request_id,
        request_type,
        message_id,
        retrieved_message,
        store_execution_time_millis: 0.0,
    })
}

pub fn response_frame_len(frame: &[u8]) -> Option<usize> {
    let length_at = RESPONSE_HEADER_SIZE_BYTES;
    let length_bytes = frame.get(length_at..length_at + STRING_LENGTH_SIZE_BYTES)?;
    let declared = u16::from_be_bytes([length_bytes[0], length_bytes[1]]) as usize;
    Some(length_at + STRING_LENGTH_SIZE_BYTES + declared)
}

fn put_i32(frame: &mut Vec<u8>, value: i32) {
    frame.extend_from_slice(&value.to_be_bytes());
}

fn put_string(frame: &mut Vec<u8>, value: &str) -> Result<(), CodecError> {
    modified_utf8::write_string(frame, value).map_err(|error| match error {
        ModifiedUtf8Error::TooLong { encoded_len } => CodecError::StringTooLong { encoded_len },
        other => CodecError::InvalidString(other),
    })
}

struct FrameReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> FrameReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < needed {
            return Err(CodecError::Truncated {
                field,
                needed,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    fn read_i32(&mut self, field: &'static str) -> Result<i32, CodecError> {
        let raw = self.take(field, 4)?;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let raw = self.take("string_length", STRING_LENGTH_SIZE_BYTES)?;
        let declared = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        if self.remaining() < declared {
            return Err(CodecError::StringOverrun {
                declared,
                available: self.remaining(),
            });
        }
        let body = self.take("string_body", declared)?;
        modified_utf8::decode_body(body).map_err(CodecError::InvalidString)
    }
}
