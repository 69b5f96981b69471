use crc32fast::Hasher;

use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::component::Version;

/// Trailer of every non-marker component:
/// `[magic: u32][version: u16][crc32: u32]`, all little-endian, with the
/// checksum computed over the file body.
pub const FOOTER_MAGIC: u32 = 0x0053_4149;
pub const FOOTER_LEN: usize = 10;

pub fn append_footer(buf: &mut Vec<u8>, version: Version) {
    let mut hasher = Hasher::new();
    hasher.update(buf);
    let crc = hasher.finalize();

    buf.extend_from_slice(&FOOTER_MAGIC.to_le_bytes());
    buf.extend_from_slice(&version.code().to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// Validate magic and checksum; returns the format version and the body
/// length. Any mismatch is a corruption error.
pub fn validate_footer(data: &[u8]) -> Result<(Version, usize)> {
    if data.len() < FOOTER_LEN {
        return Err(Error::corruption(format!(
            "component too short for footer: {} bytes",
            data.len()
        )));
    }
    let body_len = data.len() - FOOTER_LEN;
    let footer = &data[body_len..];

    let magic = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    if magic != FOOTER_MAGIC {
        return Err(Error::corruption("bad footer magic"));
    }
    let version = Version::from_code(u16::from_le_bytes([footer[4], footer[5]]))?;
    let stored_crc = u32::from_le_bytes([footer[6], footer[7], footer[8], footer[9]]);

    let mut hasher = Hasher::new();
    hasher.update(&data[..body_len]);
    let actual_crc = hasher.finalize();
    if actual_crc != stored_crc {
        return Err(Error::new(
            ErrorKind::Corruption,
            format!("checksum mismatch: stored {:08x}, actual {:08x}", stored_crc, actual_crc),
        ));
    }

    Ok((version, body_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn footer_round_trips() {
        let mut buf = b"component body".to_vec();
        append_footer(&mut buf, Version::Ca);
        let (version, body_len) = validate_footer(&buf).unwrap();
        assert_eq!(version, Version::Ca);
        assert_eq!(&buf[..body_len], b"component body");
    }

    #[test]
    fn bit_flip_is_detected() {
        let mut buf = b"component body".to_vec();
        append_footer(&mut buf, Version::Ca);
        buf[3] ^= 0x01;
        let err = validate_footer(&buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Corruption);
    }

    #[test]
    fn truncation_is_detected() {
        let mut buf = b"body".to_vec();
        append_footer(&mut buf, Version::Ca);
        buf.truncate(buf.len() - 1);
        assert!(validate_footer(&buf).is_err());
    }

    #[test]
    fn zero_bytes_are_detected() {
        assert!(validate_footer(&[]).is_err());
        assert!(validate_footer(&[0u8; 32]).is_err());
    }

    #[test]
    fn empty_body_is_valid() {
        let mut buf = Vec::new();
        append_footer(&mut buf, Version::Aa);
        let (version, body_len) = validate_footer(&buf).unwrap();
        assert_eq!(version, Version::Aa);
        assert_eq!(body_len, 0);
    }
}
