//! SMF wire format support
//!
//! Decoding, classification, and encoding of the box format carried in each
//! UDP datagram.

pub mod classifier;
pub mod decoder;
pub mod encoder;
pub mod format;
pub mod preamble;
pub mod record;

pub use classifier::{classify, parse_datagram};
pub use decoder::decode;
pub use encoder::{encode, encode_frame_packet, encode_skeleton_packet};
pub use format::{Layout, Tag};
pub use preamble::{Preamble, validate_preamble};
pub use record::{Attribute, FieldRecord, FieldValue, Primitive};
