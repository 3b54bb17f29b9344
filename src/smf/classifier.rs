//! Packet classification
//!
//! Interprets a decoded record tree as a skeleton definition or a pose frame
//! based on which top-level boxes are present. A datagram carrying both is
//! treated as a skeleton; one carrying neither is [`Packet::Unrecognized`].

use super::format::{Tag, tags};
use super::record::{FieldRecord, FieldValue};
use crate::types::{Bone, Packet, PoseSample, Skeleton, Transform};
use crate::{CaptureError, Result};

/// Classify a decoded datagram.
///
/// Shape errors inside a recognized packet (a bone without an id, a frame
/// without a number) are [`CaptureError::MalformedPacket`]; an invalid bone
/// tree surfaces the skeleton's own error.
pub fn classify(records: &[FieldRecord]) -> Result<Packet> {
    if let Some(skdf) = records.iter().find(|r| r.tag == tags::SKDF) {
        return skeleton_from(skdf).map(Packet::Skeleton);
    }
    if let Some(fram) = records.iter().find(|r| r.tag == tags::FRAM) {
        return pose_from(fram).map(Packet::Pose);
    }
    Ok(Packet::Unrecognized)
}

/// Decode and classify one datagram.
pub fn parse_datagram(bytes: &[u8]) -> Result<Packet> {
    let (records, _) = super::decode(bytes)?;
    classify(&records)
}

fn skeleton_from(skdf: &FieldRecord) -> Result<Skeleton> {
    let bons = skdf.child(tags::BONS).ok_or_else(|| missing(tags::SKDF, tags::BONS))?;

    let bones = bons
        .children()
        .iter()
        .filter(|r| r.tag == tags::BNDT)
        .map(|bndt| -> Result<Bone> {
            Ok(Bone {
                id: required(bndt, tags::BNID, FieldValue::as_u16)?,
                parent: required(bndt, tags::PBID, FieldValue::as_u16)?,
                rest: required(bndt, tags::TRAN, FieldValue::as_transform)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Skeleton::new(bones)
}

fn pose_from(fram: &FieldRecord) -> Result<PoseSample> {
    let frame = required(fram, tags::FNUM, FieldValue::as_u32)?;
    let time = required(fram, tags::TIME, FieldValue::as_f32)?;
    let utc = required(fram, tags::UTTM, FieldValue::as_f64)?;

    let btrs = fram.child(tags::BTRS).ok_or_else(|| missing(tags::FRAM, tags::BTRS))?;
    let bones = btrs
        .children()
        .iter()
        .filter(|r| r.tag == tags::BTDT)
        .map(|btdt| -> Result<(u16, Transform)> {
            let id = required(btdt, tags::BNID, FieldValue::as_u16)?;
            let transform = required(btdt, tags::TRAN, FieldValue::as_transform)?;
            Ok((id, transform))
        })
        .collect::<Result<_>>()?;

    Ok(PoseSample { frame, time, utc, bones })
}

fn required<T>(record: &FieldRecord, tag: Tag, read: impl Fn(&FieldValue) -> Option<T>) -> Result<T> {
    record.attribute(tag).and_then(read).ok_or_else(|| missing(record.tag, tag))
}

fn missing(parent: Tag, tag: Tag) -> CaptureError {
    CaptureError::malformed(0, format!("'{parent}' box is missing a well-formed '{tag}' field"))
}
