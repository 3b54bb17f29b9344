//! Box encoder and datagram builders
//!
//! [`encode`] is the inverse of [`decode`](super::decode) for canonical
//! packets: promoted attributes are written first, in the order they were
//! received, followed by the nested children. Lengths are recomputed from the
//! values, so hand-built records need not carry a correct `length`.
//!
//! The `encode_*_packet` builders produce complete datagrams shaped like the
//! ones a mocopi sender emits (`head`, `sndf`, then `skdf` or `fram`).

use super::format::{BOX_HEADER_SIZE, Tag, tags};
use super::record::{Attribute, FieldRecord, FieldValue, Primitive};
use crate::types::{Bone, PoseSample, Transform};

/// File type string carried in the `head` box.
pub const SMF_FILE_TYPE: &str = "sony motion format";

/// Format version written into the `vrsn` box.
pub const SMF_VERSION: u8 = 1;

/// Serialize records back into wire bytes.
pub fn encode(records: &[FieldRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.iter().map(FieldRecord::encoded_len).sum());
    for record in records {
        write_box(&mut out, record.tag, &record.value);
    }
    out
}

/// Payload length a value encodes to.
pub fn payload_len(value: &FieldValue) -> usize {
    match value {
        FieldValue::Primitive(p) => p.width(),
        FieldValue::Composite(_) => 28,
        FieldValue::Records { attributes, children } => {
            attributes.iter().map(|a| BOX_HEADER_SIZE + payload_len(&a.value)).sum::<usize>()
                + children.iter().map(|c| BOX_HEADER_SIZE + payload_len(&c.value)).sum::<usize>()
        }
        FieldValue::Opaque(bytes) => bytes.len(),
    }
}

fn write_box(out: &mut Vec<u8>, tag: Tag, value: &FieldValue) {
    out.extend_from_slice(&(payload_len(value) as u32).to_le_bytes());
    out.extend_from_slice(tag.as_bytes());

    match value {
        FieldValue::Primitive(p) => write_primitive(out, p),
        FieldValue::Composite(t) => {
            for component in t.components() {
                out.extend_from_slice(&component.to_le_bytes());
            }
        }
        FieldValue::Records { attributes, children } => {
            for attribute in attributes {
                write_box(out, attribute.tag, &attribute.value);
            }
            for child in children {
                write_box(out, child.tag, &child.value);
            }
        }
        FieldValue::Opaque(bytes) => out.extend_from_slice(bytes),
    }
}

fn write_primitive(out: &mut Vec<u8>, primitive: &Primitive) {
    match primitive {
        Primitive::U8(v) => out.push(*v),
        Primitive::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Primitive::U32Pair([a, b]) => {
            out.extend_from_slice(&a.to_le_bytes());
            out.extend_from_slice(&b.to_le_bytes());
        }
        Primitive::Ascii(s) => out.extend_from_slice(s.as_bytes()),
    }
}

/// Build a record, computing its declared length from the value.
pub fn record(tag: Tag, value: FieldValue) -> FieldRecord {
    FieldRecord { tag, length: payload_len(&value) as u32, value }
}

/// Build a container record from promoted attributes and nested children.
pub fn container(tag: Tag, attributes: Vec<(Tag, FieldValue)>, children: Vec<FieldRecord>) -> FieldRecord {
    let attributes = attributes.into_iter().map(|(tag, value)| Attribute { tag, value }).collect();
    record(tag, FieldValue::Records { attributes, children })
}

fn header_records(port: u16) -> [FieldRecord; 2] {
    let head = container(
        tags::HEAD,
        vec![
            (tags::FTYP, FieldValue::Primitive(Primitive::Ascii(SMF_FILE_TYPE.to_string()))),
            (tags::VRSN, FieldValue::Primitive(Primitive::U8(SMF_VERSION))),
        ],
        Vec::new(),
    );
    let sndf = container(
        tags::SNDF,
        vec![
            (tags::IPAD, FieldValue::Primitive(Primitive::U32Pair([0, 0]))),
            (tags::RCVP, FieldValue::Primitive(Primitive::U16(port))),
        ],
        Vec::new(),
    );
    [head, sndf]
}

fn transform(t: Transform) -> FieldValue {
    FieldValue::Composite(t)
}

/// Records of a skeleton definition datagram.
pub fn skeleton_packet_records(bones: &[Bone], port: u16) -> Vec<FieldRecord> {
    let bndts = bones
        .iter()
        .map(|bone| {
            container(
                tags::BNDT,
                vec![
                    (tags::BNID, FieldValue::Primitive(Primitive::U16(bone.id))),
                    (tags::PBID, FieldValue::Primitive(Primitive::U16(bone.parent))),
                    (tags::TRAN, transform(bone.rest)),
                ],
                Vec::new(),
            )
        })
        .collect();

    let skdf = container(tags::SKDF, Vec::new(), vec![container(tags::BONS, Vec::new(), bndts)]);
    let [head, sndf] = header_records(port);
    vec![head, sndf, skdf]
}

/// Records of a pose frame datagram.
pub fn frame_packet_records(sample: &PoseSample, port: u16) -> Vec<FieldRecord> {
    let btdts = sample
        .bones
        .iter()
        .map(|(id, t)| {
            container(
                tags::BTDT,
                vec![(tags::BNID, FieldValue::Primitive(Primitive::U16(*id))), (tags::TRAN, transform(*t))],
                Vec::new(),
            )
        })
        .collect();

    let fram = container(
        tags::FRAM,
        vec![
            (tags::FNUM, FieldValue::Primitive(Primitive::U32(sample.frame))),
            (tags::TIME, FieldValue::Primitive(Primitive::F32(sample.time))),
            (tags::UTTM, FieldValue::Primitive(Primitive::F64(sample.utc))),
        ],
        vec![container(tags::BTRS, Vec::new(), btdts)],
    );
    let [head, sndf] = header_records(port);
    vec![head, sndf, fram]
}

/// Complete skeleton definition datagram.
pub fn encode_skeleton_packet(bones: &[Bone], port: u16) -> Vec<u8> {
    encode(&skeleton_packet_records(bones, port))
}

/// Complete pose frame datagram.
pub fn encode_frame_packet(sample: &PoseSample, port: u16) -> Vec<u8> {
    encode(&frame_packet_records(sample, port))
}
