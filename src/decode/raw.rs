use super::{
    check_layout, color_channel, finish, is_color, is_position, read_value, scalar_buffer, AttributeBuffer,
    DecodeError, DecodeRequest, DecodedPoints,
};
use glam::Vec3;
use std::collections::BTreeMap;
use tracing::trace;

/// Decodes interleaved, uncompressed point records.
pub(crate) fn decode(request: DecodeRequest) -> Result<DecodedPoints, DecodeError> {
    let attributes = &request.attributes;
    let stride = attributes.byte_size as usize;
    check_layout(attributes)?;
    let num_points = request.num_points as usize;
    request.check_length(request.buffer.len(), stride)?;

    let buffer = &request.buffer;
    let mut buffers = BTreeMap::new();
    let mut attribute_offset = 0usize;

    for attribute in &attributes.attributes {
        let element_size = attribute.r#type.size as usize;
        let element = |point: usize, index: usize| {
            let start = point * stride + attribute_offset + index * element_size;
            read_value(attribute.r#type, &buffer[start..start + element_size])
        };

        let decoded = if is_position(attribute) {
            let positions = (0..num_points)
                .map(|j| {
                    let mut position = Vec3::ZERO;
                    for k in 0..3 {
                        position[k] = (element(j, k) * request.scale[k] + request.offset[k]
                            - request.min[k]) as f32;
                    }
                    position
                })
                .collect();
            AttributeBuffer::Position(positions)
        } else if is_color(attribute) {
            let colors = (0..num_points)
                .map(|j| {
                    let mut color = [255u8; 4];
                    for (k, channel) in color.iter_mut().take(3).enumerate() {
                        *channel = color_channel(element(j, k) as u32);
                    }
                    color
                })
                .collect();
            AttributeBuffer::Color(colors)
        } else {
            let elements = attribute.num_elements as usize;
            let precise = (0..num_points)
                .flat_map(|j| (0..elements).map(move |k| (j, k)))
                .map(|(j, k)| element(j, k))
                .collect();
            AttributeBuffer::Scalar(scalar_buffer(attribute, precise))
        };

        buffers.insert(attribute.name.clone(), decoded);
        attribute_offset += attribute.byte_size as usize;
    }

    trace!(num_points, stride, "decoded raw payload");

    finish(&request, buffers)
}
