//! Wire format of aggregated split blobs.
//!
//! Blob layout:
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ version: u8                 = 2                        │
//! │ flags: u8                   bit 0 = payload compressed │
//! ├────────────────────────────────────────────────────────┤
//! │ PAYLOAD: body, LZ4-framed when the flag is set         │
//! │   count: varint                                        │
//! │   count × bucket offset: varint  (ts - key) / sampling │
//! │   count × run length: i8         (writer always emits 1)│
//! │   count × value: f64 LE                                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Offsets are strictly increasing and stay inside the split window, so a
//! full split decodes to exactly `points_per_split` entries. The LZ4 frame
//! carries no wall clock and the compression level is pinned, which keeps
//! re-serialisation byte-identical across replays.

use std::io::{Read, Write};

use thiserror::Error;

use crate::time::{SplitKey, Timestamp};

const SPLIT_VERSION: u8 = 2;
const FLAG_COMPRESSED: u8 = 0b0000_0001;
const LZ4_LEVEL: u32 = 4;

/// A stored blob that cannot be decoded. Never surfaced to callers: the
/// processing and read paths treat the blob as absent and rebuild.
#[derive(Debug, Clone, Error)]
#[error("invalid data: {0}")]
pub struct InvalidData(pub String);

pub(crate) fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

pub(crate) fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64, InvalidData> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| InvalidData("truncated varint".to_string()))?;
        *pos += 1;
        if shift >= 64 {
            return Err(InvalidData("varint overflow".to_string()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// True when the blob's payload is LZ4-compressed. Looks at the flag byte
/// only and never touches the payload.
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 2 && data[1] & FLAG_COMPRESSED != 0
}

/// Serialises the points of one split. `points` must be sorted, unique and
/// inside the window of `key`.
pub fn serialize_split(
    key: SplitKey,
    points: &[(Timestamp, f64)],
    compress: bool,
) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(2 + points.len() * 12);
    write_varint(&mut body, points.len() as u64);
    for (ts, _) in points {
        write_varint(&mut body, ((ts - key.timestamp) / key.sampling) as u64);
    }
    body.resize(body.len() + points.len(), 1u8);
    for (_, value) in points {
        body.extend_from_slice(&value.to_le_bytes());
    }

    let mut out = vec![SPLIT_VERSION, if compress { FLAG_COMPRESSED } else { 0 }];
    if compress {
        let mut encoder = lz4::EncoderBuilder::new().level(LZ4_LEVEL).build(&mut out)?;
        encoder.write_all(&body)?;
        let (_, result) = encoder.finish();
        result?;
    } else {
        out.extend_from_slice(&body);
    }
    Ok(out)
}

/// Decodes a split blob back into `(timestamp, value)` points.
pub fn unserialize_split(
    data: &[u8],
    key: SplitKey,
    points_per_split: u32,
) -> Result<Vec<(Timestamp, f64)>, InvalidData> {
    if data.len() < 2 {
        return Err(InvalidData(format!("split blob of {} bytes", data.len())));
    }
    if data[0] != SPLIT_VERSION {
        return Err(InvalidData(format!("unsupported split version {}", data[0])));
    }

    let body: Vec<u8> = if data[1] & FLAG_COMPRESSED != 0 {
        let mut decoded = Vec::new();
        lz4::Decoder::new(&data[2..])
            .and_then(|mut decoder| decoder.read_to_end(&mut decoded))
            .map_err(|e| InvalidData(format!("lz4 payload: {e}")))?;
        decoded
    } else {
        data[2..].to_vec()
    };

    let mut pos = 0usize;
    let count = read_varint(&body, &mut pos)? as usize;

    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(read_varint(&body, &mut pos)?);
    }

    if body.len() < pos + count {
        return Err(InvalidData("truncated run lengths".to_string()));
    }
    let runs = &body[pos..pos + count];
    pos += count;

    if body.len() != pos + count * 8 {
        return Err(InvalidData(format!(
            "body length {} does not match {} points",
            body.len(),
            count
        )));
    }

    let mut points = Vec::with_capacity(count);
    let mut previous_end: Option<u64> = None;
    for i in 0..count {
        let run = runs[i] as i8;
        if run < 1 {
            return Err(InvalidData(format!("run length {run}")));
        }
        let offset = offsets[i];
        if previous_end.is_some_and(|end| offset < end) {
            return Err(InvalidData("bucket offsets not increasing".to_string()));
        }
        if offset + run as u64 > points_per_split as u64 {
            return Err(InvalidData(format!(
                "bucket offset {offset} outside split window"
            )));
        }
        let value = f64::from_le_bytes(body[pos + i * 8..pos + i * 8 + 8].try_into().unwrap());
        for step in 0..run as u64 {
            points.push((
                key.timestamp + (offset + step) as i64 * key.sampling,
                value,
            ));
        }
        previous_end = Some(offset + run as u64);
    }
    Ok(points)
}
