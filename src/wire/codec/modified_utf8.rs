//! Length-prefixed "modified UTF-8" strings: a 2-byte big-endian byte count
//! followed by CESU-8 style bytes where U+0000 is written as `C0 80` and
//! supplementary characters are written as two 3-byte surrogate halves.

pub const MAX_ENCODED_LEN: usize = u16::MAX as usize;

#[derive(Debug, PartialEq, Eq)]
pub enum ModifiedUtf8Error {
    TooLong { encoded_len: usize },
    MalformedSequence { offset: usize },
    TruncatedSequence { offset: usize },
    UnpairedSurrogate,
}

pub fn encoded_len(value: &str) -> usize {
    value.encode_utf16().map(unit_len).sum()
}

fn unit_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

pub fn write_string(out: &mut Vec<u8>, value: &str) -> Result<(), ModifiedUtf8Error> {
    let encoded_len = encoded_len(value);
    if encoded_len > MAX_ENCODED_LEN {
        return Err(ModifiedUtf8Error::TooLong { encoded_len });
    }

    out.reserve(2 + encoded_len);
    out.extend_from_slice(&(encoded_len as u16).to_be_bytes());
    for unit in value.encode_utf16() {
        match unit_len(unit) {
            1 => out.push(unit as u8),
            2 => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    Ok(())
}

pub fn decode_body(bytes: &[u8]) -> Result<String, ModifiedUtf8Error> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut offset = 0;

    while offset < bytes.len() {
        let lead = bytes[offset];
        match lead >> 4 {
            0..=7 => {
                units.push(u16::from(lead));
                offset += 1;
            }
            12 | 13 => {
                let second = continuation(bytes, offset, 1)?;
                units.push((u16::from(lead & 0x1F) << 6) | u16::from(second & 0x3F));
                offset += 2;
            }
            14 => {
                let second = continuation(bytes, offset, 1)?;
                let third = continuation(bytes, offset, 2)?;
                units.push(
                    (u16::from(lead & 0x0F) << 12)
                        | (u16::from(second & 0x3F) << 6)
                        | u16::from(third & 0x3F),
                );
                offset += 3;
            }
            _ => return Err(ModifiedUtf8Error::MalformedSequence { offset }),
        }
    }

    String::from_utf16(&units).map_err(|_| ModifiedUtf8Error::UnpairedSurrogate)
}

fn continuation(bytes: &[u8], lead_offset: usize, index: usize) -> Result<u8, ModifiedUtf8Error> {
    let byte = *bytes
        .get(lead_offset + index)
        .ok_or(ModifiedUtf8Error::TruncatedSequence { offset: lead_offset })?;
    if byte & 0xC0 != 0x80 {
        return Err(ModifiedUtf8Error::MalformedSequence {
            offset: lead_offset + index,
        });
    }
    Ok(byte)
}
