//! SMF box format structures
//!
//! An SMF datagram is a flat sequence of boxes with no framing between them:
//!
//! ```text
//! +----------------+----------------+--------------------------+
//! | length (u32 LE)| name (4 ASCII) | payload (`length` bytes) |
//! +----------------+----------------+--------------------------+
//! ```
//!
//! `length` counts the payload only, never the 8 header bytes. What the payload
//! holds depends on the box name alone, so the decoder is driven by the static
//! [`BOX_TABLE`] below rather than by anything carried on the wire:
//!
//! - **Recursive** boxes hold further boxes.
//! - **Primitive** boxes hold a single value with a fixed [`Layout`].
//! - Boxes flagged **promoted** are hoisted into their parent's attribute set.
//! - Any name not in the table is kept as opaque bytes.

use std::fmt;

/// Size of a box header: 4 length bytes plus 4 name bytes.
pub const BOX_HEADER_SIZE: usize = 8;

/// Deepest box nesting accepted before a datagram is rejected.
pub const MAX_NESTING_DEPTH: usize = 16;

/// Parent id marking the root bone of a skeleton.
pub const ROOT_PARENT_ID: u16 = 0xFFFF;

/// Four-character box name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    /// Create a tag from its four ASCII bytes.
    pub const fn new(name: &[u8; 4]) -> Self {
        Self(*name)
    }

    /// Raw name bytes as they appear on the wire.
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

/// Known box names.
pub mod tags {
    use super::Tag;

    pub const HEAD: Tag = Tag::new(b"head");
    pub const FTYP: Tag = Tag::new(b"ftyp");
    pub const VRSN: Tag = Tag::new(b"vrsn");
    pub const SNDF: Tag = Tag::new(b"sndf");
    pub const IPAD: Tag = Tag::new(b"ipad");
    pub const RCVP: Tag = Tag::new(b"rcvp");
    pub const SKDF: Tag = Tag::new(b"skdf");
    pub const BONS: Tag = Tag::new(b"bons");
    pub const BNDT: Tag = Tag::new(b"bndt");
    pub const BNID: Tag = Tag::new(b"bnid");
    pub const PBID: Tag = Tag::new(b"pbid");
    pub const TRAN: Tag = Tag::new(b"tran");
    pub const FRAM: Tag = Tag::new(b"fram");
    pub const FNUM: Tag = Tag::new(b"fnum");
    pub const TIME: Tag = Tag::new(b"time");
    pub const UTTM: Tag = Tag::new(b"uttm");
    pub const BTRS: Tag = Tag::new(b"btrs");
    pub const BTDT: Tag = Tag::new(b"btdt");
}

/// Byte layout of a primitive box payload. All numbers are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    U8,
    U16,
    U32,
    F32,
    F64,
    /// Two consecutive u32 values
    U32Pair,
    /// Free-length ASCII text
    Ascii,
    /// 7 x f32: rotation x, y, z, w then translation x, y, z
    Transform,
}

impl Layout {
    /// Exact payload width in bytes, or `None` for variable-length layouts.
    pub const fn width(self) -> Option<usize> {
        match self {
            Layout::U8 => Some(1),
            Layout::U16 => Some(2),
            Layout::U32 => Some(4),
            Layout::F32 => Some(4),
            Layout::F64 => Some(8),
            Layout::U32Pair => Some(8),
            Layout::Ascii => None,
            Layout::Transform => Some(28),
        }
    }
}

/// How the payload of a box is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxKind {
    Recursive,
    Primitive(Layout),
}

/// One row of the box table.
#[derive(Debug, Clone, Copy)]
pub struct BoxSpec {
    pub tag: Tag,
    pub kind: BoxKind,
    /// Hoist this box into the parent's attributes instead of keeping it as a child
    pub promoted: bool,
}

const fn spec(tag: Tag, kind: BoxKind, promoted: bool) -> BoxSpec {
    BoxSpec { tag, kind, promoted }
}

/// Static name -> behavior table for every box the decoder understands.
pub const BOX_TABLE: &[BoxSpec] = &[
    // header section
    spec(tags::HEAD, BoxKind::Recursive, false),
    spec(tags::FTYP, BoxKind::Primitive(Layout::Ascii), true),
    spec(tags::VRSN, BoxKind::Primitive(Layout::U8), true),
    spec(tags::SNDF, BoxKind::Recursive, false),
    spec(tags::IPAD, BoxKind::Primitive(Layout::U32Pair), true),
    spec(tags::RCVP, BoxKind::Primitive(Layout::U16), true),
    // skeleton definition
    spec(tags::SKDF, BoxKind::Recursive, false),
    spec(tags::BONS, BoxKind::Recursive, false),
    spec(tags::BNDT, BoxKind::Recursive, false),
    spec(tags::BNID, BoxKind::Primitive(Layout::U16), true),
    spec(tags::PBID, BoxKind::Primitive(Layout::U16), true),
    spec(tags::TRAN, BoxKind::Primitive(Layout::Transform), true),
    // pose frame
    spec(tags::FRAM, BoxKind::Recursive, false),
    spec(tags::FNUM, BoxKind::Primitive(Layout::U32), true),
    spec(tags::TIME, BoxKind::Primitive(Layout::F32), true),
    spec(tags::UTTM, BoxKind::Primitive(Layout::F64), true),
    spec(tags::BTRS, BoxKind::Recursive, false),
    spec(tags::BTDT, BoxKind::Recursive, false),
];

/// Look up how a box name is decoded. Unknown names return `None`.
pub fn lookup(tag: Tag) -> Option<&'static BoxSpec> {
    BOX_TABLE.iter().find(|spec| spec.tag == tag)
}

/// Whether a box with this name is hoisted into its parent.
pub fn is_promoted(tag: Tag) -> bool {
    lookup(tag).is_some_and(|spec| spec.promoted)
}

pub(crate) fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
