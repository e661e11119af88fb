//! Conversion of point-data payloads into typed per-attribute buffers.
//!
//! Payloads are decoded on dedicated worker threads owned by a [`DecodePool`];
//! the raw buffer is moved into the request so no copy crosses the thread
//! boundary.

mod compressed;
mod pool;
mod raw;
mod worker;

pub use pool::{DecodePool, WorkerLease};
pub use worker::DecodeWorker;

use crate::octree::point_attributes::{
    AttributeRange, PointAttribute, PointAttributeType, PointAttributes, COLOR_NAMES,
    POSITION_NAMES,
};
use byteorder::{ByteOrder, LittleEndian};
use glam::{DVec3, Vec3};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Interleaved records, `byte_size` bytes per point.
    Raw,
    /// Brotli-compressed, one block per attribute, morton-coded positions and colors.
    Brotli,
}

impl FromStr for Encoding {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEFAULT" | "RAW" => Ok(Self::Raw),
            "BROTLI" => Ok(Self::Brotli),
            other => Err(ConfigurationError::UnknownEncoding(other.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("RAW"),
            Self::Brotli => f.write_str("BROTLI"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Encoding not implemented: {0}")]
    UnknownEncoding(String),
}

#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    #[error("Expected {expected} bytes for the declared points, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Decompression failed: {0}")]
    Decompression(Arc<std::io::Error>),

    #[error("Attribute {0} does not fit the point record layout")]
    InvalidLayout(String),

    #[error("Vector {vector} needs missing attribute {attribute}")]
    MissingVectorSource { vector: String, attribute: String },

    #[error("Unable to start decode worker: {0}")]
    WorkerSpawn(Arc<std::io::Error>),

    #[error("Decode worker stopped before answering")]
    WorkerLost,
}

/// Everything a worker needs to decode one node.
#[derive(Debug)]
pub struct DecodeRequest {
    pub buffer: Vec<u8>,
    pub attributes: Arc<PointAttributes>,
    pub scale: DVec3,
    pub offset: DVec3,
    pub min: DVec3,
    pub max: DVec3,
    pub num_points: u32,
}

impl DecodeRequest {
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    fn check_length(&self, actual: usize, bytes_per_point: usize) -> Result<(), DecodeError> {
        let expected = self.num_points as usize * bytes_per_point;
        if actual != expected {
            return Err(DecodeError::LengthMismatch { expected, actual });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScalarBuffer {
    /// `(value - offset) * scale`, packed into 32 bits.
    pub values: Vec<f32>,
    pub precise: Vec<f64>,
    pub num_elements: u16,
    pub offset: f64,
    pub scale: f64,
    pub range: AttributeRange,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeBuffer {
    /// Relative to the node's box min.
    Position(Vec<Vec3>),
    Color(Vec<[u8; 4]>),
    Vector(Vec<Vec3>),
    Scalar(ScalarBuffer),
}

impl AttributeBuffer {
    pub fn num_points(&self) -> usize {
        match self {
            Self::Position(values) | Self::Vector(values) => values.len(),
            Self::Color(values) => values.len(),
            Self::Scalar(buffer) => buffer.precise.len() / buffer.num_elements.max(1) as usize,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedPoints {
    pub num_points: u32,
    pub buffers: BTreeMap<String, AttributeBuffer>,
    /// Average number of points per occupied cell of a 32³ grid over the node.
    pub density: u32,
}

impl DecodedPoints {
    pub fn positions(&self) -> Option<&[Vec3]> {
        self.buffers.values().find_map(|buffer| match buffer {
            AttributeBuffer::Position(positions) => Some(positions.as_slice()),
            _ => None,
        })
    }

    pub fn get(&self, name: &str) -> Option<&AttributeBuffer> {
        self.buffers.get(name)
    }
}

/// Decodes on the calling thread.
pub fn decode_points(encoding: Encoding, request: DecodeRequest) -> Result<DecodedPoints, DecodeError> {
    match encoding {
        Encoding::Raw => raw::decode(request),
        Encoding::Brotli => compressed::decode(request),
    }
}

pub(crate) fn is_position(attribute: &PointAttribute) -> bool {
    POSITION_NAMES.contains(&attribute.name.as_str())
}

pub(crate) fn is_color(attribute: &PointAttribute) -> bool {
    COLOR_NAMES.contains(&attribute.name.as_str())
}

/// Rejects layouts the decoders would read out of bounds, e.g. a hand-built
/// schema with a two-element position.
pub(crate) fn check_layout(attributes: &PointAttributes) -> Result<(), DecodeError> {
    let mut stride = 0usize;

    for attribute in &attributes.attributes {
        let expected = attribute.num_elements as usize * attribute.r#type.size as usize;
        let triple = is_position(attribute) || is_color(attribute);
        if attribute.byte_size as usize != expected || (triple && attribute.num_elements < 3) {
            return Err(DecodeError::InvalidLayout(attribute.name.clone()));
        }
        stride += expected;
    }

    if stride != attributes.byte_size as usize {
        return Err(DecodeError::InvalidLayout("<record>".to_string()));
    }
    Ok(())
}

pub(crate) fn read_value(data_type: &PointAttributeType, bytes: &[u8]) -> f64 {
    match data_type.name {
        "double" => LittleEndian::read_f64(bytes),
        "float" => LittleEndian::read_f32(bytes) as f64,
        "int8" => bytes[0] as i8 as f64,
        "uint8" => bytes[0] as f64,
        "int16" => LittleEndian::read_i16(bytes) as f64,
        "uint16" => LittleEndian::read_u16(bytes) as f64,
        "int32" => LittleEndian::read_i32(bytes) as f64,
        "uint32" => LittleEndian::read_u32(bytes) as f64,
        "int64" => LittleEndian::read_i64(bytes) as f64,
        "uint64" => LittleEndian::read_u64(bytes) as f64,
        _ => 0.0,
    }
}

/// Quantized color channel to 8 bits; 16-bit inputs are scaled down.
pub(crate) fn color_channel(value: u32) -> u8 {
    (if value > 255 { value / 256 } else { value }) as u8
}

/// Builds the scalar buffer of a generic attribute from its decoded values.
pub(crate) fn scalar_buffer(attribute: &PointAttribute, precise: Vec<f64>) -> ScalarBuffer {
    let (mut offset, mut scale) = (0.0, 1.0);

    // pack types wider than 32 bits relative to their range
    if attribute.r#type.size > 4 {
        let (min, max) = attribute.range.bounds();
        if max > min {
            offset = min;
            scale = 1.0 / (max - min);
        }
    }

    ScalarBuffer {
        values: precise
            .iter()
            .map(|value| ((value - offset) * scale) as f32)
            .collect(),
        precise,
        num_elements: attribute.num_elements,
        offset,
        scale,
        range: attribute.range.clone(),
    }
}

/// Adds the composite vectors (e.g. `NORMAL`) assembled from decoded scalars.
pub(crate) fn add_vectors(
    attributes: &PointAttributes,
    num_points: usize,
    buffers: &mut BTreeMap<String, AttributeBuffer>,
) -> Result<(), DecodeError> {
    for vector in &attributes.vectors {
        let mut values = vec![Vec3::ZERO; num_points];

        for (element, source) in vector.attributes.iter().enumerate().take(3) {
            let Some(AttributeBuffer::Scalar(scalar)) = buffers.get(source) else {
                return Err(DecodeError::MissingVectorSource {
                    vector: vector.name.clone(),
                    attribute: source.clone(),
                });
            };
            for (value, precise) in values.iter_mut().zip(&scalar.precise) {
                value[element] = *precise as f32;
            }
        }

        buffers.insert(vector.name.clone(), AttributeBuffer::Vector(values));
    }

    Ok(())
}

/// Adds the vectors and the density estimate to per-attribute buffers.
pub(crate) fn finish(
    request: &DecodeRequest,
    mut buffers: BTreeMap<String, AttributeBuffer>,
) -> Result<DecodedPoints, DecodeError> {
    add_vectors(&request.attributes, request.num_points as usize, &mut buffers)?;

    let density = buffers
        .values()
        .find_map(|buffer| match buffer {
            AttributeBuffer::Position(positions) => Some(estimate_density(positions, request.size())),
            _ => None,
        })
        .unwrap_or(0);

    Ok(DecodedPoints {
        num_points: request.num_points,
        buffers,
        density,
    })
}

const DENSITY_GRID_SIZE: usize = 32;

/// Average points per occupied cell, positions being relative to the box min.
pub(crate) fn estimate_density(positions: &[Vec3], size: DVec3) -> u32 {
    if positions.is_empty() {
        return 0;
    }

    let grid = DENSITY_GRID_SIZE;
    let cell = |value: f32, extent: f64| -> usize {
        if extent <= 0.0 {
            return 0;
        }
        let index = (grid as f64 * value as f64 / extent).max(0.0) as usize;
        index.min(grid - 1)
    };

    let mut occupancy = vec![0u32; grid * grid * grid];
    let mut occupied = 0u32;
    for position in positions {
        let index = cell(position.x, size.x)
            + cell(position.y, size.y) * grid
            + cell(position.z, size.z) * grid * grid;
        if occupancy[index] == 0 {
            occupied += 1;
        }
        occupancy[index] += 1;
    }

    positions.len() as u32 / occupied
}
