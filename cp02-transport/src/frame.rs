//! Frame codec: the 9-byte header + variable payload wire format.
//!
//! Header layout, in order: `version, msg_id, service, sequence, flags,
//! size[3], checksum`. `size` is big-endian when `version == 0`, little-endian
//! otherwise. Every station observed in the wild is version 0, so that is the
//! only version this codec has ever been exercised against.
//!
//! `checksum` is the low byte of the sum of the first 8 header bytes.

use crate::error::Error;
use crate::protocol::Flags;

pub const HEADER_LEN: usize = 9;

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub msg_id: u8,
    /// Raw service byte. Requests carry the positive value; responses carry
    /// the same command reinterpreted with the sign bit set (`service < 0`
    /// as an `i8`).
    pub service: u8,
    pub sequence: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Whether this frame is a response (the service byte's sign bit is set
    /// when read as `i8`).
    pub fn is_response(&self) -> bool {
        (self.service as i8) < 0
    }
}

fn write_size(version: u8, size: u32, out: &mut [u8; 3]) {
    let bytes = size.to_be_bytes();
    // size is u24: the low 3 bytes of a u32 big-endian representation.
    let be = [bytes[1], bytes[2], bytes[3]];
    if version == 0 {
        *out = be;
    } else {
        out[0] = be[2];
        out[1] = be[1];
        out[2] = be[0];
    }
}

fn read_size(version: u8, bytes: [u8; 3]) -> u32 {
    let be = if version == 0 {
        bytes
    } else {
        [bytes[2], bytes[1], bytes[0]]
    };
    u32::from_be_bytes([0, be[0], be[1], be[2]])
}

fn checksum(header_first_8: &[u8; 8]) -> u8 {
    let sum: u32 = header_first_8.iter().map(|&b| b as u32).sum();
    (sum & 0xFF) as u8
}

/// Encode a frame. `size` is derived from `payload.len()`.
pub fn encode(
    version: u8,
    msg_id: u8,
    service: u8,
    sequence: u8,
    flags: Flags,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    let mut size_bytes = [0u8; 3];
    write_size(version, payload.len() as u32, &mut size_bytes);

    let mut first8 = [0u8; 8];
    first8[0] = version;
    first8[1] = msg_id;
    first8[2] = service;
    first8[3] = sequence;
    first8[4] = flags as u8;
    first8[5] = size_bytes[0];
    first8[6] = size_bytes[1];
    first8[7] = size_bytes[2];

    out.extend_from_slice(&first8);
    out.push(checksum(&first8));
    out.extend_from_slice(payload);
    out
}

/// Decode a frame from a byte buffer. Requires at least `HEADER_LEN` bytes
/// and `len(payload) == size`; checksum is validated.
pub fn decode(bytes: &[u8]) -> Result<Frame, Error> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::FrameTooShort(bytes.len()));
    }

    let mut first8 = [0u8; 8];
    first8.copy_from_slice(&bytes[0..8]);
    let expected = checksum(&first8);
    let actual = bytes[8];
    if expected != actual {
        return Err(Error::ChecksumError { expected, actual });
    }

    let version = bytes[0];
    let msg_id = bytes[1];
    let service = bytes[2];
    let sequence = bytes[3];
    let flags = bytes[4];
    let size = read_size(version, [bytes[5], bytes[6], bytes[7]]) as usize;

    let available = bytes.len() - HEADER_LEN;
    if available < size {
        return Err(Error::ParseError {
            declared: size,
            available,
        });
    }

    Ok(Frame {
        version,
        msg_id,
        service,
        sequence,
        flags,
        payload: bytes[HEADER_LEN..HEADER_LEN + size].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_frame_validation() {
        // GET_DEVICE_MODEL (0x1c), msg_id 1, flags ACK, version 0, one-byte
        // payload 0x2F.
        let encoded = encode(0x00, 0x01, 0x1c, 0x00, Flags::Ack, &[0x2F]);
        assert_eq!(
            encoded,
            vec![0x00, 0x01, 0x1c, 0x00, 0x02, 0x00, 0x00, 0x01, 0x20, 0x2F]
        );
    }

    #[test]
    fn round_trip() {
        let encoded = encode(0, 7, 0x4c, 3, Flags::Syn, b"hello");
        let frame = decode(&encoded).unwrap();
        assert_eq!(frame.version, 0);
        assert_eq!(frame.msg_id, 7);
        assert_eq!(frame.service, 0x4c);
        assert_eq!(frame.sequence, 3);
        assert_eq!(frame.flags, Flags::Syn as u8);
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn response_service_byte_has_sign_bit_set() {
        let encoded = encode(0, 1, 0x1c | 0x80, 0, Flags::Ack, &[]);
        let frame = decode(&encoded).unwrap();
        assert!(frame.is_response());
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(matches!(decode(&[0u8; 4]), Err(Error::FrameTooShort(4))));
    }

    #[test]
    fn checksum_bit_flip_detected() {
        let mut encoded = encode(0, 1, 0x1c, 0, Flags::Ack, &[0x2F]);
        encoded[3] ^= 0x01; // flip a bit in the sequence byte
        assert!(matches!(decode(&encoded), Err(Error::ChecksumError { .. })));
    }

    #[test]
    fn declared_size_larger_than_buffer_is_rejected() {
        let mut encoded = encode(0, 1, 0x1c, 0, Flags::Ack, &[0x2F, 0x30]);
        encoded.truncate(encoded.len() - 1); // drop the last payload byte
        assert!(matches!(decode(&encoded), Err(Error::ParseError { .. })));
    }

    #[cfg(test)]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn codec_round_trips(
                msg_id in any::<u8>(),
                service in any::<u8>(),
                sequence in any::<u8>(),
                flags_raw in 0u8..=5,
                payload in proptest::collection::vec(any::<u8>(), 0..512),
            ) {
                let flags = Flags::from_u8(flags_raw).unwrap();
                let encoded = encode(0, msg_id, service, sequence, flags, &payload);
                let decoded = decode(&encoded).unwrap();
                prop_assert_eq!(decoded.version, 0);
                prop_assert_eq!(decoded.msg_id, msg_id);
                prop_assert_eq!(decoded.service, service);
                prop_assert_eq!(decoded.sequence, sequence);
                prop_assert_eq!(decoded.flags, flags as u8);
                prop_assert_eq!(decoded.payload, payload);

                let re_encoded = encode(0, decoded.msg_id, decoded.service, decoded.sequence, flags, &decoded.payload);
                prop_assert_eq!(re_encoded, encoded);
            }
        }
    }
}
