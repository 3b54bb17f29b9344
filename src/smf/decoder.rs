//! Recursive box decoder
//!
//! [`decode`] is a pure function from datagram bytes to records. It never reads
//! past a box's declared length: a header or payload that runs beyond the
//! buffer rejects the whole datagram, and a primitive whose payload width does
//! not match its layout is rejected too. There is no partial result.

use tracing::trace;

use super::format::{BOX_HEADER_SIZE, BoxKind, Layout, MAX_NESTING_DEPTH, Tag, lookup, read_u32_le};
use super::record::{Attribute, FieldRecord, FieldValue, Primitive};
use crate::types::Transform;
use crate::{CaptureError, Result};

/// Decode every top-level box in `bytes`.
///
/// Returns the records and the number of bytes consumed, which for accepted
/// input is always `bytes.len()`.
pub fn decode(bytes: &[u8]) -> Result<(Vec<FieldRecord>, usize)> {
    let records = decode_boxes(bytes, 0, 0)?;
    trace!("Decoded {} top-level boxes from {} bytes", records.len(), bytes.len());
    Ok((records, bytes.len()))
}

/// Decode a run of back-to-back boxes. `base` is the absolute offset of `data`
/// within the datagram and only feeds error messages.
fn decode_boxes(data: &[u8], base: usize, depth: usize) -> Result<Vec<FieldRecord>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(CaptureError::malformed(
            base,
            format!("box nesting deeper than {MAX_NESTING_DEPTH} levels"),
        ));
    }

    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let remaining = data.len() - offset;
        if remaining < BOX_HEADER_SIZE {
            return Err(CaptureError::malformed(
                base + offset,
                format!("{remaining} trailing bytes cannot hold a box header"),
            ));
        }

        let length = read_u32_le(data, offset)
            .ok_or_else(|| CaptureError::malformed(base + offset, "unreadable box length"))?;
        let tag = Tag([data[offset + 4], data[offset + 5], data[offset + 6], data[offset + 7]]);

        let payload_start = offset + BOX_HEADER_SIZE;
        let payload_end = payload_start
            .checked_add(length as usize)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                CaptureError::malformed(
                    base + offset,
                    format!(
                        "box '{tag}' declares {length} payload bytes but only {} remain",
                        data.len() - payload_start
                    ),
                )
            })?;

        let payload = &data[payload_start..payload_end];
        let value = decode_payload(tag, payload, base + payload_start, depth)?;
        records.push(FieldRecord { tag, length, value });

        offset = payload_end;
    }

    Ok(records)
}

fn decode_payload(tag: Tag, payload: &[u8], base: usize, depth: usize) -> Result<FieldValue> {
    match lookup(tag).map(|spec| spec.kind) {
        Some(BoxKind::Recursive) => {
            let mut attributes = Vec::new();
            let mut children = Vec::new();
            for child in decode_boxes(payload, base, depth + 1)? {
                if super::format::is_promoted(child.tag) {
                    attributes.push(Attribute { tag: child.tag, value: child.value });
                } else {
                    children.push(child);
                }
            }
            Ok(FieldValue::Records { attributes, children })
        }
        Some(BoxKind::Primitive(layout)) => decode_primitive(tag, layout, payload, base),
        None => Ok(FieldValue::Opaque(payload.to_vec())),
    }
}

fn decode_primitive(tag: Tag, layout: Layout, payload: &[u8], base: usize) -> Result<FieldValue> {
    if let Some(width) = layout.width() {
        if payload.len() != width {
            return Err(CaptureError::malformed(
                base,
                format!("box '{tag}' expects {width} payload bytes, found {}", payload.len()),
            ));
        }
    }

    let value = match layout {
        Layout::U8 => FieldValue::Primitive(Primitive::U8(payload[0])),
        Layout::U16 => FieldValue::Primitive(Primitive::U16(u16::from_le_bytes([payload[0], payload[1]]))),
        Layout::U32 => FieldValue::Primitive(Primitive::U32(le_u32(payload, 0))),
        Layout::F32 => FieldValue::Primitive(Primitive::F32(f32::from_bits(le_u32(payload, 0)))),
        Layout::F64 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(payload);
            FieldValue::Primitive(Primitive::F64(f64::from_le_bytes(bytes)))
        }
        Layout::U32Pair => {
            FieldValue::Primitive(Primitive::U32Pair([le_u32(payload, 0), le_u32(payload, 4)]))
        }
        Layout::Ascii => {
            if !payload.is_ascii() {
                return Err(CaptureError::malformed(base, format!("box '{tag}' is not ASCII text")));
            }
            let text = String::from_utf8_lossy(payload).into_owned();
            FieldValue::Primitive(Primitive::Ascii(text))
        }
        Layout::Transform => {
            let mut components = [0f32; 7];
            for (i, component) in components.iter_mut().enumerate() {
                *component = f32::from_bits(le_u32(payload, i * 4));
            }
            FieldValue::Composite(Transform::from_components(components))
        }
    };

    Ok(value)
}

/// Caller has already checked the payload width.
fn le_u32(payload: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([payload[offset], payload[offset + 1], payload[offset + 2], payload[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smf::encoder::{encode, encode_frame_packet, encode_skeleton_packet};
    use crate::smf::format::tags;
    use crate::test_utils::{mocopi_skeleton_bones, sample_pose};

    fn raw_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(name);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn decodes_back_to_back_top_level_boxes() {
        let mut bytes = raw_box(b"fnum", &42u32.to_le_bytes());
        bytes.extend(raw_box(b"time", &1.5f32.to_le_bytes()));

        let (records, consumed) = decode(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value.as_u32(), Some(42));
        assert_eq!(records[1].value.as_f32(), Some(1.5));
        assert_eq!(records.iter().map(FieldRecord::encoded_len).sum::<usize>(), bytes.len());
    }

    #[test]
    fn promotes_into_parent_and_nests_the_rest() {
        let mut bone = raw_box(b"bnid", &7u16.to_le_bytes());
        bone.extend(raw_box(b"pbid", &3u16.to_le_bytes()));
        let floats: Vec<u8> =
            [0.0f32, 0.0, 0.0, 1.0, 0.1, 0.2, 0.3].iter().flat_map(|f| f.to_le_bytes()).collect();
        bone.extend(raw_box(b"tran", &floats));
        bone.extend(raw_box(b"xtra", b"??"));
        let bytes = raw_box(b"bndt", &bone);

        let (records, _) = decode(&bytes).unwrap();
        let bndt = &records[0];

        assert_eq!(bndt.tag, tags::BNDT);
        assert_eq!(bndt.attribute(tags::BNID).and_then(FieldValue::as_u16), Some(7));
        assert_eq!(bndt.attribute(tags::PBID).and_then(FieldValue::as_u16), Some(3));
        let tran = bndt.attribute(tags::TRAN).and_then(FieldValue::as_transform).unwrap();
        assert_eq!(tran.rotation, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(tran.translation, [0.1, 0.2, 0.3]);
        assert_eq!(bndt.children().len(), 1);
        assert_eq!(bndt.children()[0].value, FieldValue::Opaque(b"??".to_vec()));
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let mut bytes = raw_box(b"fnum", &1u32.to_le_bytes());
        bytes.truncate(bytes.len() - 1);

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, CaptureError::MalformedPacket { offset: 0, .. }));
    }

    #[test]
    fn truncated_nested_box_rejects_whole_datagram() {
        let mut inner = raw_box(b"fnum", &1u32.to_le_bytes());
        inner.extend(raw_box(b"time", &0.5f32.to_le_bytes()));
        // inner box claims more than its container holds
        inner[0] = 0xff;
        let bytes = raw_box(b"fram", &inner);

        let err = decode(&bytes).unwrap_err();
        match err {
            CaptureError::MalformedPacket { offset, .. } => assert_eq!(offset, 8),
            other => panic!("expected MalformedPacket, got {other:?}"),
        }
    }

    #[test]
    fn trailing_partial_header_is_malformed() {
        let mut bytes = raw_box(b"vrsn", &[1]);
        bytes.extend_from_slice(&[1, 0, 0]);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn primitive_width_mismatch_is_malformed() {
        let bytes = raw_box(b"bnid", &[1, 0, 0]);
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("expects 2 payload bytes"));
    }

    #[test]
    fn non_ascii_text_is_malformed() {
        let bytes = raw_box(b"ftyp", &[0xC3, 0xA9]);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn excessive_nesting_is_malformed() {
        let mut bytes = raw_box(b"vrsn", &[1]);
        for _ in 0..=MAX_NESTING_DEPTH + 1 {
            bytes = raw_box(b"head", &bytes);
        }
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn empty_datagram_decodes_to_nothing() {
        let (records, consumed) = decode(&[]).unwrap();
        assert!(records.is_empty());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn skeleton_packet_round_trips_byte_exact() {
        let bytes = encode_skeleton_packet(&mocopi_skeleton_bones(), 12351);
        let (records, _) = decode(&bytes).unwrap();
        assert_eq!(encode(&records), bytes);
    }

    #[test]
    fn frame_packet_round_trips_byte_exact() {
        let bytes = encode_frame_packet(&sample_pose(1234, 27), 12351);
        let (records, _) = decode(&bytes).unwrap();
        assert_eq!(encode(&records), bytes);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_leaf() -> impl Strategy<Value = Vec<u8>> {
            prop_oneof![
                any::<u32>().prop_map(|v| raw_box(b"fnum", &v.to_le_bytes())),
                any::<u16>().prop_map(|v| raw_box(b"bnid", &v.to_le_bytes())),
                any::<u8>().prop_map(|v| raw_box(b"vrsn", &[v])),
                prop::collection::vec(any::<u8>(), 0..32).prop_map(|v| raw_box(b"blob", &v)),
            ]
        }

        fn arb_boxes() -> impl Strategy<Value = Vec<Vec<u8>>> {
            prop::collection::vec(
                prop_oneof![
                    arb_leaf(),
                    prop::collection::vec(arb_leaf(), 0..6).prop_map(|kids| raw_box(b"bndt", &kids.concat())),
                ],
                0..8,
            )
        }

        proptest! {
            #[test]
            fn top_level_records_consume_header_plus_length(boxes in arb_boxes()) {
                let bytes = boxes.concat();
                let (records, consumed) = decode(&bytes).unwrap();

                prop_assert_eq!(consumed, bytes.len());
                prop_assert_eq!(records.len(), boxes.len());
                for (record, raw) in records.iter().zip(&boxes) {
                    prop_assert_eq!(record.encoded_len(), 8 + record.length as usize);
                    prop_assert_eq!(record.encoded_len(), raw.len());
                }
            }

            #[test]
            fn truncation_is_always_malformed(boxes in arb_boxes(), cut in 1usize..64) {
                let bytes = boxes.concat();
                prop_assume!(!bytes.is_empty());
                let keep = bytes.len().saturating_sub(cut);
                // any proper prefix that splits a top-level box must fail
                let boundaries: Vec<usize> = boxes
                    .iter()
                    .scan(0usize, |acc, b| { *acc += b.len(); Some(*acc) })
                    .collect();
                prop_assume!(keep > 0 && !boundaries.contains(&keep));

                let result = decode(&bytes[..keep]);
                let is_malformed = matches!(result, Err(CaptureError::MalformedPacket { .. }));
                prop_assert!(is_malformed);
            }

            #[test]
            fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
                let _ = decode(&bytes);
            }
        }
    }
}
