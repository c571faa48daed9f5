//! Just enough ISO-BMFF walking to find protection system boxes in an initialization segment.

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

pub const WIDEVINE_SYSTEM_ID: [u8; 16] = [
    0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21, 0xed,
];
pub const PLAYREADY_SYSTEM_ID: [u8; 16] = [
    0x9a, 0x04, 0xf0, 0x79, 0x98, 0x40, 0x42, 0x86, 0xab, 0x92, 0xe6, 0x5b, 0xe0, 0x88, 0x5f, 0x95,
];
/// W3C common PSSH box format, used by ClearKey
pub const COMMON_SYSTEM_ID: [u8; 16] = [
    0x10, 0x77, 0xef, 0xec, 0xc0, 0xb2, 0x4d, 0x02, 0xac, 0xe3, 0x3c, 0x1e, 0x52, 0xe2, 0xfb, 0x4b,
];

const MOOV: [u8; 4] = *b"moov";
const PSSH: [u8; 4] = *b"pssh";

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Splits `input` into consecutive boxes, returning `(type, whole box, header length)`.
fn read_boxes(input: &[u8]) -> io::Result<Vec<([u8; 4], &[u8], usize)>> {
    let mut boxes = Vec::new();
    let mut buf = Cursor::new(input);

    while (buf.position() as usize) < input.len() {
        let start = buf.position() as usize;
        let size = buf.read_u32::<BigEndian>()? as u64;
        let mut box_type = [0u8; 4];
        buf.read_exact(&mut box_type)?;

        let (size, header) = match size {
            // extends to the end of the input
            0 => ((input.len() - start) as u64, 8),
            1 => (buf.read_u64::<BigEndian>()?, 16),
            size => (size, 8),
        };
        if size < header as u64 || size > (input.len() - start) as u64 {
            return Err(invalid("box size out of bounds"));
        }

        let end = start + size as usize;
        boxes.push((box_type, &input[start..end], header));
        buf.set_position(end as u64);
    }

    Ok(boxes)
}

/// Collects every `pssh` box stored under the top-level `moov` box.
///
/// The returned slices are complete boxes, so concatenating them yields `cenc` init data.
pub fn extract_pssh_boxes(segment: &[u8]) -> io::Result<Vec<&[u8]>> {
    let mut result = Vec::new();
    for (box_type, data, header) in read_boxes(segment)? {
        if box_type != MOOV {
            continue;
        }
        for (child_type, child, _) in read_boxes(&data[header..])? {
            if child_type == PSSH {
                result.push(child);
            }
        }
    }
    Ok(result)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshBox {
    pub version: u8,
    pub system_id: [u8; 16],
    pub key_ids: Vec<[u8; 16]>,
    pub data: Vec<u8>,
}

impl PsshBox {
    /// Parses `cenc` init data, which may hold several boxes back to back.
    pub fn parse_all(init_data: &[u8]) -> io::Result<Vec<Self>> {
        read_boxes(init_data)?
            .into_iter()
            .filter(|(box_type, _, _)| *box_type == PSSH)
            .map(|(_, data, _)| Self::try_from(data))
            .collect()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut size = 8 + 4 + 16 + 4 + self.data.len();
        if self.version > 0 {
            size += 4 + 16 * self.key_ids.len();
        }

        let mut result = Vec::with_capacity(size);
        result.extend_from_slice(&(size as u32).to_be_bytes());
        result.extend_from_slice(&PSSH);
        result.push(self.version);
        result.extend_from_slice(&[0, 0, 0]);
        result.extend_from_slice(&self.system_id);
        if self.version > 0 {
            result.extend_from_slice(&(self.key_ids.len() as u32).to_be_bytes());
            for kid in &self.key_ids {
                result.extend_from_slice(kid);
            }
        }
        result.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        result.extend_from_slice(&self.data);
        result
    }
}

impl TryFrom<&[u8]> for PsshBox {
    type Error = io::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() < 32 || value[4..8] != PSSH {
            return Err(invalid("Invalid pssh header"));
        }

        let mut buf = Cursor::new(value);
        buf.set_position(8);
        let version = buf.read_u8()?;
        buf.set_position(12);

        let mut system_id = [0u8; 16];
        buf.read_exact(&mut system_id)?;

        let mut key_ids = Vec::new();
        if version > 0 {
            let kid_count = buf.read_u32::<BigEndian>()?;
            for _ in 0..kid_count {
                let mut kid = [0u8; 16];
                buf.read_exact(&mut kid)?;
                key_ids.push(kid);
            }
        }

        let data_length = buf.read_u32::<BigEndian>()? as usize;
        if data_length > value.len() - buf.position() as usize {
            return Err(invalid("pssh data exceeds box"));
        }
        let mut data = vec![0u8; data_length];
        buf.read_exact(&mut data)?;

        log::debug!(
            "pssh box v{version}, system id {}, {} key id(s)",
            hex::encode(system_id),
            key_ids.len()
        );
        Ok(Self {
            version,
            system_id,
            key_ids,
            data,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mp4_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(8 + payload.len());
        result.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
        result.extend_from_slice(box_type);
        result.extend_from_slice(payload);
        result
    }

    fn common_pssh() -> PsshBox {
        PsshBox {
            version: 1,
            system_id: COMMON_SYSTEM_ID,
            key_ids: vec![[0x11; 16], [0x22; 16]],
            data: Vec::new(),
        }
    }

    #[test]
    fn test_pssh_v1_roundtrip_fields() {
        let pssh = common_pssh();
        let parsed = PsshBox::try_from(pssh.to_bytes().as_slice()).unwrap();
        assert_eq!(parsed, pssh);
    }

    #[test]
    fn test_pssh_v0_has_no_key_ids() {
        let pssh = PsshBox {
            version: 0,
            system_id: WIDEVINE_SYSTEM_ID,
            key_ids: Vec::new(),
            data: vec![0x08, 0x01, 0x12, 0x10],
        };
        let bytes = pssh.to_bytes();
        assert_eq!(bytes.len(), 36);

        let parsed = PsshBox::try_from(bytes.as_slice()).unwrap();
        assert!(parsed.key_ids.is_empty());
        assert_eq!(parsed.data, vec![0x08, 0x01, 0x12, 0x10]);
    }

    #[test]
    fn test_invalid_pssh_header() {
        let data = mp4_box(b"free", &[0u8; 32]);
        assert!(PsshBox::try_from(data.as_slice()).is_err());
    }

    #[test]
    fn test_extract_pssh_from_moov() {
        let widevine = PsshBox {
            version: 0,
            system_id: WIDEVINE_SYSTEM_ID,
            key_ids: Vec::new(),
            data: vec![1, 2, 3],
        }
        .to_bytes();
        let common = common_pssh().to_bytes();

        let mut moov_payload = mp4_box(b"mvhd", &[0u8; 12]);
        moov_payload.extend_from_slice(&widevine);
        moov_payload.extend_from_slice(&common);

        let mut segment = mp4_box(b"ftyp", b"isom\0\0\0\0");
        segment.extend_from_slice(&mp4_box(b"moov", &moov_payload));

        let boxes = extract_pssh_boxes(&segment).unwrap();
        assert_eq!(boxes, vec![widevine.as_slice(), common.as_slice()]);

        let init_data = boxes.concat();
        let parsed = PsshBox::parse_all(&init_data).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].system_id, WIDEVINE_SYSTEM_ID);
        assert_eq!(parsed[1], common_pssh());
    }

    #[test]
    fn test_media_segment_has_no_pssh() {
        let mut segment = mp4_box(b"moof", &[0u8; 16]);
        segment.extend_from_slice(&mp4_box(b"mdat", &[0xff; 64]));
        assert!(extract_pssh_boxes(&segment).unwrap().is_empty());
    }

    #[test]
    fn test_oversized_largesize_is_rejected() {
        let mut segment = mp4_box(b"ftyp", b"isom\0\0\0\0");
        segment.extend_from_slice(&[0, 0, 0, 1]);
        segment.extend_from_slice(b"moov");
        segment.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(extract_pssh_boxes(&segment).is_err());

        let mut segment = mp4_box(b"ftyp", b"isom\0\0\0\0");
        segment.extend_from_slice(&[0, 0, 0, 1]);
        segment.extend_from_slice(b"moov");
        segment.extend_from_slice(&(segment.len() as u64 + 1024).to_be_bytes());
        assert!(extract_pssh_boxes(&segment).is_err());
    }

    #[test]
    fn test_pssh_data_length_beyond_box_is_rejected() {
        let mut bytes = PsshBox {
            version: 0,
            system_id: WIDEVINE_SYSTEM_ID,
            key_ids: Vec::new(),
            data: vec![1, 2, 3, 4],
        }
        .to_bytes();
        // data length is the last u32 before the payload
        let offset = bytes.len() - 8;
        bytes[offset..offset + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(PsshBox::try_from(bytes.as_slice()).is_err());
    }

    #[test]
    fn test_truncated_box_is_rejected() {
        let mut segment = mp4_box(b"moov", &[0u8; 16]);
        segment.truncate(12);
        assert!(extract_pssh_boxes(&segment).is_err());
    }
}
