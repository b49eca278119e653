//! Native over-the-air frame encoding
//!
//! Fixed 222-byte little-endian record:
//!
//! ```text
//! offset size field
//! 0      4    source_id
//! 4      4    destination_id (0xFFFFFFFF = broadcast)
//! 8      4    sequence
//! 12     1    message_kind
//! 13     1    priority
//! 14     1    hop_count
//! 15     1    ttl
//! 16     2    payload_size (0..=200)
//! 18    200   payload (only payload_size bytes meaningful)
//! 218    4    origin_timestamp_ms
//! ```

use bytes::{Buf, BufMut, Bytes};
use sims_core::{MeshError, MeshFrame, MessageKind, Priority, Result, MAX_PAYLOAD};

/// Encoded size of every native frame
pub const NATIVE_FRAME_LEN: usize = 18 + MAX_PAYLOAD + 4;

const PAYLOAD_OFFSET: usize = 18;

/// Encode a frame into its fixed on-air form
pub fn encode_frame(frame: &MeshFrame) -> Result<[u8; NATIVE_FRAME_LEN]> {
    if frame.payload.len() > MAX_PAYLOAD {
        return Err(MeshError::PayloadTooLarge {
            size: frame.payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let mut out = [0u8; NATIVE_FRAME_LEN];
    {
        let mut header = &mut out[..PAYLOAD_OFFSET];
        header.put_u32_le(frame.source);
        header.put_u32_le(frame.destination);
        header.put_u32_le(frame.sequence);
        header.put_u8(frame.kind.into());
        header.put_u8(frame.priority as u8);
        header.put_u8(frame.hop_count);
        header.put_u8(frame.ttl);
        header.put_u16_le(frame.payload_size());
    }
    out[PAYLOAD_OFFSET..PAYLOAD_OFFSET + frame.payload.len()].copy_from_slice(&frame.payload);
    out[PAYLOAD_OFFSET + MAX_PAYLOAD..].copy_from_slice(&frame.origin_timestamp_ms.to_le_bytes());

    Ok(out)
}

/// Decode a native frame, ignoring bytes past the fixed record
pub fn decode_frame(data: &[u8]) -> Result<MeshFrame> {
    if data.len() < NATIVE_FRAME_LEN {
        return Err(MeshError::MalformedFrame(format!(
            "truncated frame: {} of {} bytes",
            data.len(),
            NATIVE_FRAME_LEN
        )));
    }

    let mut buf = &data[..PAYLOAD_OFFSET];
    let source = buf.get_u32_le();
    let destination = buf.get_u32_le();
    let sequence = buf.get_u32_le();
    let kind = MessageKind::try_from(buf.get_u8())?;
    let priority = Priority::try_from(buf.get_u8())?;
    let hop_count = buf.get_u8();
    let ttl = buf.get_u8();
    let payload_size = buf.get_u16_le() as usize;

    if payload_size > MAX_PAYLOAD {
        return Err(MeshError::MalformedFrame(format!(
            "payload_size {} exceeds {}",
            payload_size, MAX_PAYLOAD
        )));
    }

    let payload = Bytes::copy_from_slice(&data[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload_size]);
    let mut tail = &data[PAYLOAD_OFFSET + MAX_PAYLOAD..NATIVE_FRAME_LEN];
    let origin_timestamp_ms = tail.get_u32_le();

    Ok(MeshFrame {
        source,
        destination,
        sequence,
        kind,
        priority,
        hop_count,
        ttl,
        payload,
        origin_timestamp_ms,
    })
}
