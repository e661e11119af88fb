use super::{
    check_layout, color_channel, finish, is_color, is_position, read_value, scalar_buffer, AttributeBuffer,
    DecodeError, DecodeRequest, DecodedPoints,
};
use byteorder::{ByteOrder, LittleEndian};
use glam::Vec3;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::trace;

const POSITION_BYTES: usize = 16;
const COLOR_BYTES: usize = 8;

/// Decodes a brotli payload: one block per attribute, positions and colors
/// stored as morton codes.
pub(crate) fn decode(request: DecodeRequest) -> Result<DecodedPoints, DecodeError> {
    let attributes = &request.attributes;
    check_layout(attributes)?;
    let num_points = request.num_points as usize;

    let decompressed = if request.buffer.is_empty() {
        Vec::new()
    } else {
        let mut input = brotli_decompressor::Decompressor::new(Cursor::new(&request.buffer), 4096);
        let mut decompressed = Vec::new();
        input
            .read_to_end(&mut decompressed)
            .map_err(|error| DecodeError::Decompression(Arc::new(error)))?;
        decompressed
    };

    let bytes_per_point: usize = attributes
        .attributes
        .iter()
        .map(|attribute| {
            if is_position(attribute) {
                POSITION_BYTES
            } else if is_color(attribute) {
                COLOR_BYTES
            } else {
                attribute.byte_size as usize
            }
        })
        .sum();
    request.check_length(decompressed.len(), bytes_per_point)?;

    let mut buffers = BTreeMap::new();
    let mut byte_offset: usize = 0;

    for attribute in &attributes.attributes {
        let decoded = if is_position(attribute) {
            let positions = decompressed[byte_offset..byte_offset + num_points * POSITION_BYTES]
                .chunks_exact(POSITION_BYTES)
                .map(|bytes| {
                    let (x, y, z) = read_morton_128(bytes);
                    let position = [x, y, z];
                    let mut decoded = Vec3::ZERO;
                    for k in 0..3 {
                        decoded[k] = (position[k] as f64 * request.scale[k] + request.offset[k]
                            - request.min[k]) as f32;
                    }
                    decoded
                })
                .collect();
            byte_offset += num_points * POSITION_BYTES;
            AttributeBuffer::Position(positions)
        } else if is_color(attribute) {
            let colors = decompressed[byte_offset..byte_offset + num_points * COLOR_BYTES]
                .chunks_exact(COLOR_BYTES)
                .map(|bytes| {
                    let (r, g, b) = read_morton_64(bytes);
                    [
                        color_channel(r as u32),
                        color_channel(g as u32),
                        color_channel(b as u32),
                        255,
                    ]
                })
                .collect();
            byte_offset += num_points * COLOR_BYTES;
            AttributeBuffer::Color(colors)
        } else {
            let size = attribute.byte_size as usize;
            let element_size = attribute.r#type.size as usize;
            let precise = decompressed[byte_offset..byte_offset + num_points * size]
                .chunks_exact(element_size)
                .map(|bytes| read_value(attribute.r#type, bytes))
                .collect();
            byte_offset += num_points * size;
            AttributeBuffer::Scalar(scalar_buffer(attribute, precise))
        };

        buffers.insert(attribute.name.clone(), decoded);
    }

    trace!(
        num_points,
        compressed = request.buffer.len(),
        decompressed = decompressed.len(),
        "decoded brotli payload"
    );

    finish(&request, buffers)
}

fn read_morton_64(bytes: &[u8]) -> (u16, u16, u16) {
    let mc_0 = LittleEndian::read_u32(&bytes[4..8]);
    let mc_1 = LittleEndian::read_u32(&bytes[0..4]);

    decode_morton_64(mc_0, mc_1)
}

fn read_morton_128(bytes: &[u8]) -> (u32, u32, u32) {
    let mc_0 = LittleEndian::read_u32(&bytes[4..8]);
    let mc_1 = LittleEndian::read_u32(&bytes[0..4]);
    let mc_2 = LittleEndian::read_u32(&bytes[12..16]);
    let mc_3 = LittleEndian::read_u32(&bytes[8..12]);

    decode_morton_128(mc_0, mc_1, mc_2, mc_3)
}

/// Keeps every third bit of a 24-bit morton word, packed into 8 bits.
fn dealign_24b(mut morton: u32) -> u32 {
    morton &= 0x09249249;

    morton = (morton | (morton >> 2)) & 0x030c30c3;
    morton = (morton | (morton >> 4)) & 0x0300f00f;
    morton = (morton | (morton >> 8)) & 0x030000ff;
    morton = (morton | (morton >> 16)) & 0x000003ff;

    morton
}

/// Axis `axis` (0..3) of the 48 bits spread over `low` and `high`.
fn dealign_48b(low: u32, high: u32, axis: u32) -> u32 {
    dealign_24b((low & 0x00FFFFFF) >> axis) | (dealign_24b(((low >> 24) | (high << 8)) >> axis) << 8)
}

fn decode_morton_64(mc_0: u32, mc_1: u32) -> (u16, u16, u16) {
    let r = dealign_48b(mc_1, mc_0, 0);
    let g = dealign_48b(mc_1, mc_0, 1);
    let b = dealign_48b(mc_1, mc_0, 2);

    (r as u16, g as u16, b as u16)
}

fn decode_morton_128(mc_0: u32, mc_1: u32, mc_2: u32, mc_3: u32) -> (u32, u32, u32) {
    // lower 16 bits of each coordinate
    let mut x = dealign_48b(mc_3, mc_2, 0);
    let mut y = dealign_48b(mc_3, mc_2, 1);
    let mut z = dealign_48b(mc_3, mc_2, 2);

    if mc_1 != 0 || mc_2 != 0 {
        x |= dealign_48b(mc_1, mc_0, 0) << 16;
        y |= dealign_48b(mc_1, mc_0, 1) << 16;
        z |= dealign_48b(mc_1, mc_0, 2) << 16;
    }

    (x, y, z)
}
