//! Piece addressing.
//!
//! Version 0 objects keep the legacy layout `{object}_s{segment}` and
//! `{object}_s{segment}_p{redundancy}`. Objects rewritten by an update carry
//! a `_v{version}` suffix so pieces of different versions never collide.

use crate::PieceKeyError;

/// Redundancy index of the primary SP's full segment pieces.
pub const PRIMARY_REDUNDANCY_INDEX: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPieceKey {
    pub object_id: u64,
    pub segment_idx: u32,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcPieceKey {
    pub object_id: u64,
    pub segment_idx: u32,
    pub redundancy_idx: u32,
    pub version: i64,
}

pub fn segment_piece_key(object_id: u64, segment_idx: u32, version: i64) -> String {
    if version == 0 {
        format!("{}_s{}", object_id, segment_idx)
    } else {
        format!("{}_s{}_v{}", object_id, segment_idx, version)
    }
}

pub fn ec_piece_key(object_id: u64, segment_idx: u32, redundancy_idx: u32, version: i64) -> String {
    if version == 0 {
        format!("{}_s{}_p{}", object_id, segment_idx, redundancy_idx)
    } else {
        format!("{}_s{}_p{}_v{}", object_id, segment_idx, redundancy_idx, version)
    }
}

/// Key of the piece stored for `redundancy_idx`. Primaries and secondaries of
/// replicated objects hold full segments; EC secondaries hold shards.
pub fn piece_key(
    object_id: u64,
    segment_idx: u32,
    redundancy_idx: i32,
    version: i64,
    erasure_coded: bool,
) -> String {
    if redundancy_idx < 0 || !erasure_coded {
        segment_piece_key(object_id, segment_idx, version)
    } else {
        ec_piece_key(object_id, segment_idx, redundancy_idx as u32, version)
    }
}

pub fn decode_segment_piece_key(key: &str) -> Result<SegmentPieceKey, PieceKeyError> {
    let invalid = || PieceKeyError::InvalidSegmentKey(key.to_string());
    let parts: Vec<&str> = key.split('_').collect();
    let (object, segment, version) = match parts.as_slice() {
        [object, segment] => (*object, *segment, None),
        [object, segment, version] => (*object, *segment, Some(*version)),
        _ => return Err(invalid()),
    };
    Ok(SegmentPieceKey {
        object_id: object.parse().map_err(|_| invalid())?,
        segment_idx: parse_tagged(segment, 's').ok_or_else(invalid)?,
        version: decode_version(version).ok_or_else(invalid)?,
    })
}

pub fn decode_ec_piece_key(key: &str) -> Result<EcPieceKey, PieceKeyError> {
    let invalid = || PieceKeyError::InvalidEcKey(key.to_string());
    let parts: Vec<&str> = key.split('_').collect();
    let (object, segment, redundancy, version) = match parts.as_slice() {
        [object, segment, redundancy] => (*object, *segment, *redundancy, None),
        [object, segment, redundancy, version] => (*object, *segment, *redundancy, Some(*version)),
        _ => return Err(invalid()),
    };
    Ok(EcPieceKey {
        object_id: object.parse().map_err(|_| invalid())?,
        segment_idx: parse_tagged(segment, 's').ok_or_else(invalid)?,
        redundancy_idx: parse_tagged(redundancy, 'p').ok_or_else(invalid)?,
        version: decode_version(version).ok_or_else(invalid)?,
    })
}

fn parse_tagged<T: std::str::FromStr>(part: &str, tag: char) -> Option<T> {
    part.strip_prefix(tag)?.parse().ok()
}

// An explicit `_v0` never appears in a valid key.
fn decode_version(part: Option<&str>) -> Option<i64> {
    match part {
        None => Some(0),
        Some(part) => parse_tagged::<i64>(part, 'v').filter(|v| *v > 0),
    }
}

/// Number of segments of a payload: `ceil(payload_size / max_segment_size)`.
pub fn segment_count(payload_size: u64, max_segment_size: u64) -> u32 {
    if max_segment_size == 0 {
        return 0;
    }
    payload_size.div_ceil(max_segment_size) as u32
}

/// Byte length of segment `segment_idx`; the last one carries the remainder.
pub fn segment_size(payload_size: u64, segment_idx: u32, max_segment_size: u64) -> u64 {
    let count = segment_count(payload_size, max_segment_size);
    if segment_idx >= count {
        return 0;
    }
    if segment_idx + 1 < count {
        max_segment_size
    } else {
        payload_size - (count as u64 - 1) * max_segment_size
    }
}

pub fn ec_piece_size(segment_len: u64, data_chunks: u32) -> u64 {
    if data_chunks == 0 {
        return 0;
    }
    segment_len.div_ceil(data_chunks as u64)
}
