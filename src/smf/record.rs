//! Decoded box records

use super::format::{BOX_HEADER_SIZE, Tag};
use crate::types::Transform;

/// A single decoded primitive value.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    F64(f64),
    U32Pair([u32; 2]),
    Ascii(String),
}

impl Primitive {
    /// Encoded payload width in bytes.
    pub fn width(&self) -> usize {
        match self {
            Primitive::U8(_) => 1,
            Primitive::U16(_) => 2,
            Primitive::U32(_) | Primitive::F32(_) => 4,
            Primitive::F64(_) | Primitive::U32Pair(_) => 8,
            Primitive::Ascii(s) => s.len(),
        }
    }
}

/// Decoded payload of one box.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Primitive(Primitive),
    /// Fixed tuple of named sub-values
    Composite(Transform),
    /// Nested boxes of a recursive container
    Records {
        /// Promoted children, in arrival order
        attributes: Vec<Attribute>,
        /// Remaining children
        children: Vec<FieldRecord>,
    },
    /// Payload of a box name the table does not know
    Opaque(Vec<u8>),
}

/// A promoted child hoisted into its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub tag: Tag,
    pub value: FieldValue,
}

/// One decoded box.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRecord {
    pub tag: Tag,
    /// Declared payload length
    pub length: u32,
    pub value: FieldValue,
}

impl FieldRecord {
    /// Bytes this record occupies on the wire, header included.
    pub fn encoded_len(&self) -> usize {
        BOX_HEADER_SIZE + self.length as usize
    }

    /// Promoted attribute by name. Repeated names resolve to the last one.
    pub fn attribute(&self, tag: Tag) -> Option<&FieldValue> {
        match &self.value {
            FieldValue::Records { attributes, .. } => {
                attributes.iter().rev().find(|a| a.tag == tag).map(|a| &a.value)
            }
            _ => None,
        }
    }

    /// Nested, non-promoted children. Empty for leaf boxes.
    pub fn children(&self) -> &[FieldRecord] {
        match &self.value {
            FieldValue::Records { children, .. } => children,
            _ => &[],
        }
    }

    /// First nested child with the given name.
    pub fn child(&self, tag: Tag) -> Option<&FieldRecord> {
        self.children().iter().find(|c| c.tag == tag)
    }
}

impl FieldValue {
    pub fn as_u8(&self) -> Option<u8> {
        match self {
            FieldValue::Primitive(Primitive::U8(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            FieldValue::Primitive(Primitive::U16(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            FieldValue::Primitive(Primitive::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            FieldValue::Primitive(Primitive::F32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Primitive(Primitive::F64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Primitive(Primitive::Ascii(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_transform(&self) -> Option<Transform> {
        match self {
            FieldValue::Composite(t) => Some(*t),
            _ => None,
        }
    }
}
