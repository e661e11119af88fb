use crate::metadata::AttributeMetadata;
use thiserror::Error;

#[derive(Debug, PartialEq, Eq)]
pub struct PointAttributeType {
    pub ordinal: usize,
    pub name: &'static str,
    pub size: u16,
}

macro_rules! create_data_type {
    ($const_name:ident, $ord:expr, $name:expr, $size:expr) => {
        pub static $const_name: PointAttributeType = PointAttributeType {
            ordinal: $ord,
            name: $name,
            size: $size,
        };
    };
}

create_data_type!(DATA_TYPE_DOUBLE, 0, "double", 8);
create_data_type!(DATA_TYPE_FLOAT, 1, "float", 4);
create_data_type!(DATA_TYPE_INT8, 2, "int8", 1);
create_data_type!(DATA_TYPE_UINT8, 3, "uint8", 1);
create_data_type!(DATA_TYPE_INT16, 4, "int16", 2);
create_data_type!(DATA_TYPE_UINT16, 5, "uint16", 2);
create_data_type!(DATA_TYPE_INT32, 6, "int32", 4);
create_data_type!(DATA_TYPE_UINT32, 7, "uint32", 4);
create_data_type!(DATA_TYPE_INT64, 8, "int64", 8);
create_data_type!(DATA_TYPE_UINT64, 9, "uint64", 8);

pub const POINT_ATTRIBUTE_TYPES: &[&PointAttributeType] = &[
    &DATA_TYPE_DOUBLE,
    &DATA_TYPE_FLOAT,
    &DATA_TYPE_INT8,
    &DATA_TYPE_UINT8,
    &DATA_TYPE_INT16,
    &DATA_TYPE_UINT16,
    &DATA_TYPE_INT32,
    &DATA_TYPE_UINT32,
    &DATA_TYPE_INT64,
    &DATA_TYPE_UINT64,
];

impl PointAttributeType {
    pub fn from_name(name: &str) -> Option<&'static PointAttributeType> {
        POINT_ATTRIBUTE_TYPES
            .iter()
            .copied()
            .find(|data_type| data_type.name == name)
    }
}

/// Attribute names the converter writes differently from what decoders expect.
const NAME_REPLACEMENTS: &[(&str, &str)] = &[("rgb", "rgba")];

pub const NORMAL_VECTOR: &str = "NORMAL";
const NORMAL_SOURCES: [&str; 3] = ["NormalX", "NormalY", "NormalZ"];

pub const POSITION_NAMES: &[&str] = &["position", "POSITION_CARTESIAN"];
pub const COLOR_NAMES: &[&str] = &["rgba", "RGBA", "RGB"];

fn is_triple(name: &str) -> bool {
    POSITION_NAMES.contains(&name) || COLOR_NAMES.contains(&name)
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Unknown type {type_name:?} for attribute {attribute:?}")]
    UnknownType { attribute: String, type_name: String },

    #[error("Attribute {0:?} has no min/max values")]
    MissingRange(String),

    #[error("Attribute {attribute:?} needs {expected} elements, got {actual}")]
    ElementCount {
        attribute: String,
        expected: u16,
        actual: u16,
    },

    #[error("Point record size overflows at attribute {0:?}")]
    SizeOverflow(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeRange {
    Scalar(f64, f64),
    Vector(Vec<f64>, Vec<f64>),
}

impl AttributeRange {
    /// Smallest and largest bound over every element.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            Self::Scalar(min, max) => (*min, *max),
            Self::Vector(min, max) => (
                min.iter().copied().fold(f64::INFINITY, f64::min),
                max.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointAttribute {
    pub name: String,
    pub r#type: &'static PointAttributeType,
    pub num_elements: u16,
    pub byte_size: u16,
    pub description: String,
    pub range: AttributeRange,
    pub initial_range: AttributeRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointVector {
    pub name: String,
    pub attributes: Vec<String>,
}

/// Ordered layout of a point record plus the composite vectors derived from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointAttributes {
    pub attributes: Vec<PointAttribute>,
    pub byte_size: u16,
    pub size: u16,
    pub vectors: Vec<PointVector>,
}

impl PointAttributes {
    pub fn build(descriptors: &[AttributeMetadata]) -> Result<Self, SchemaError> {
        let mut attributes = PointAttributes::default();

        for descriptor in descriptors {
            attributes.add(PointAttribute::from_metadata(descriptor)?)?;
        }

        if NORMAL_SOURCES.iter().all(|name| attributes.get(name).is_some()) {
            attributes.add_vector(PointVector {
                name: NORMAL_VECTOR.to_string(),
                attributes: NORMAL_SOURCES.iter().map(|name| name.to_string()).collect(),
            });
        }

        Ok(attributes)
    }

    pub fn add(&mut self, attribute: PointAttribute) -> Result<(), SchemaError> {
        let (Some(byte_size), Some(size)) = (
            self.byte_size.checked_add(attribute.byte_size),
            self.size.checked_add(attribute.num_elements),
        ) else {
            return Err(SchemaError::SizeOverflow(attribute.name));
        };

        self.byte_size = byte_size;
        self.size = size;
        self.attributes.push(attribute);
        Ok(())
    }

    pub fn add_vector(&mut self, vector: PointVector) {
        self.vectors.push(vector);
    }

    pub fn get(&self, name: &str) -> Option<&PointAttribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }
}

impl PointAttribute {
    pub fn from_metadata(descriptor: &AttributeMetadata) -> Result<Self, SchemaError> {
        let data_type = PointAttributeType::from_name(&descriptor.r#type).ok_or_else(|| {
            SchemaError::UnknownType {
                attribute: descriptor.name.clone(),
                type_name: descriptor.r#type.clone(),
            }
        })?;

        let name = NAME_REPLACEMENTS
            .iter()
            .find(|(from, _)| *from == descriptor.name)
            .map(|(_, to)| to.to_string())
            .unwrap_or_else(|| descriptor.name.clone());

        // positions and colors are always decoded as three components
        if is_triple(&name) && descriptor.num_elements < 3 {
            return Err(SchemaError::ElementCount {
                attribute: name,
                expected: 3,
                actual: descriptor.num_elements,
            });
        }

        let byte_size = descriptor
            .num_elements
            .checked_mul(data_type.size)
            .ok_or_else(|| SchemaError::SizeOverflow(name.clone()))?;

        let mut range = if descriptor.num_elements == 1 {
            match (descriptor.min.first(), descriptor.max.first()) {
                (Some(min), Some(max)) => AttributeRange::Scalar(*min, *max),
                _ => return Err(SchemaError::MissingRange(descriptor.name.clone())),
            }
        } else {
            AttributeRange::Vector(descriptor.min.clone(), descriptor.max.clone())
        };

        // potree/potree#909: some files carry a degenerate gps-time range
        if descriptor.name == "gps-time" {
            if let AttributeRange::Scalar(min, max) = &mut range {
                if min == max {
                    *max += 1.0;
                }
            }
        }

        Ok(Self {
            name,
            r#type: data_type,
            num_elements: descriptor.num_elements,
            byte_size,
            description: descriptor.description.clone(),
            initial_range: range.clone(),
            range,
        })
    }
}
