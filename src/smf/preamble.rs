//! Strict-mode preamble validation
//!
//! Every capture from a mocopi sender starts with a fixed `head` box:
//!
//! ```text
//! 23 00 00 00 'head'
//!     12 00 00 00 'ftyp' "sony motion format"
//!     01 00 00 00 'vrsn' <version byte>
//! ```
//!
//! The regular decoder does not need it. The listener only checks it when
//! strict mode is enabled, to refuse sessions from unrelated traffic.

use super::encoder::SMF_FILE_TYPE;
use super::format::{BOX_HEADER_SIZE, tags};
use super::record::FieldValue;
use crate::{CaptureError, Result};

/// Declared payload length of the `head` box, also its leading marker bytes.
pub const HEAD_BOX_LENGTH: u32 = 0x23;

/// Header values of a validated preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    pub file_type: String,
    pub version: u8,
}

/// Check that `bytes` opens with the SMF `head` preamble.
pub fn validate_preamble(bytes: &[u8]) -> Result<Preamble> {
    let head_len = BOX_HEADER_SIZE + HEAD_BOX_LENGTH as usize;
    if bytes.len() < head_len {
        return Err(CaptureError::malformed(0, "datagram too short for SMF preamble"));
    }
    if bytes[0..4] != HEAD_BOX_LENGTH.to_le_bytes() {
        return Err(CaptureError::malformed(0, "missing 0x23000000 preamble marker"));
    }
    if &bytes[4..8] != tags::HEAD.as_bytes() {
        return Err(CaptureError::malformed(4, "first box is not 'head'"));
    }

    let (records, _) = super::decode(&bytes[..head_len])?;
    let head = &records[0];

    let file_type = head
        .attribute(tags::FTYP)
        .and_then(FieldValue::as_str)
        .ok_or_else(|| CaptureError::malformed(BOX_HEADER_SIZE, "'head' has no 'ftyp'"))?;
    if file_type != SMF_FILE_TYPE {
        return Err(CaptureError::malformed(
            BOX_HEADER_SIZE,
            format!("unexpected file type '{file_type}'"),
        ));
    }

    let version = head
        .attribute(tags::VRSN)
        .and_then(FieldValue::as_u8)
        .ok_or_else(|| CaptureError::malformed(BOX_HEADER_SIZE, "'head' has no 'vrsn'"))?;

    Ok(Preamble { file_type: file_type.to_string(), version })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smf::encoder::{SMF_VERSION, encode_frame_packet};
    use crate::test_utils::sample_pose;

    #[test]
    fn accepts_sender_datagrams() {
        let bytes = encode_frame_packet(&sample_pose(0, 3), 12351);
        let preamble = validate_preamble(&bytes).unwrap();
        assert_eq!(preamble.file_type, SMF_FILE_TYPE);
        assert_eq!(preamble.version, SMF_VERSION);
    }

    #[test]
    fn rejects_missing_marker() {
        let mut bytes = encode_frame_packet(&sample_pose(0, 3), 12351);
        bytes[0] = 0x24;
        assert!(validate_preamble(&bytes).is_err());
        assert!(validate_preamble(b"\x23\x00\x00\x00head").is_err());
    }

    #[test]
    fn rejects_foreign_file_type() {
        let mut bytes = encode_frame_packet(&sample_pose(0, 3), 12351);
        bytes[16..20].copy_from_slice(b"SONY");
        let err = validate_preamble(&bytes).unwrap_err();
        assert!(err.to_string().contains("unexpected file type"));
    }
}
