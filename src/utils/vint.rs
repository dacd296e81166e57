// LEB128: the high bit of a byte is set when more bytes follow.

use crate::error::{CodecError, Result};

const CONTINUE_BIT: u8 = 128;
const PAYLOAD_MASK: u8 = 127;

const MAX_VINT32_LEN: usize = 5;
const MAX_VINT64_LEN: usize = 10;
// largest last byte that still fits the value
const MAX_VINT32_LAST: u8 = 0x0f;
const MAX_VINT64_LAST: u8 = 0x01;

pub fn encode_vint32(val: u32, mut w: impl std::io::Write) -> std::io::Result<()> {
    let mut buf = [0u8; MAX_VINT32_LEN];
    let len = encode_vint32_to(val, &mut buf);
    w.write_all(&buf[..len])
}

/// Encodes into `buf`, returning the number of bytes used.
pub fn encode_vint32_to(mut val: u32, buf: &mut [u8; MAX_VINT32_LEN]) -> usize {
    let mut i = 0;
    while val >= u32::from(CONTINUE_BIT) {
        buf[i] = (val as u8 & PAYLOAD_MASK) | CONTINUE_BIT;
        val >>= 7;
        i += 1;
    }
    buf[i] = val as u8;
    i + 1
}

pub fn decode_vint32(data: &mut &[u8]) -> Result<u32> {
    let mut result = 0u32;
    let mut shift = 0u32;
    for (i, &b) in data.iter().enumerate().take(MAX_VINT32_LEN) {
        if i == MAX_VINT32_LEN - 1 && b > MAX_VINT32_LAST {
            return Err(CodecError::corruption("invalid vint32"));
        }
        result |= u32::from(b & PAYLOAD_MASK) << shift;
        if b & CONTINUE_BIT == 0 {
            *data = &data[i + 1..];
            return Ok(result);
        }
        shift += 7;
    }
    if data.len() < MAX_VINT32_LEN {
        return Err(CodecError::UnexpectedEof {
            needed: data.len() + 1,
            remaining: data.len(),
        });
    }
    Err(CodecError::corruption("invalid vint32"))
}

pub fn encode_vint64(val: u64, mut w: impl std::io::Write) -> std::io::Result<()> {
    let mut buf = [0u8; MAX_VINT64_LEN];
    let len = encode_vint64_to(val, &mut buf);
    w.write_all(&buf[..len])
}

/// Encodes into `buf`, returning the number of bytes used.
pub fn encode_vint64_to(mut val: u64, buf: &mut [u8; MAX_VINT64_LEN]) -> usize {
    let mut i = 0;
    while val >= u64::from(CONTINUE_BIT) {
        buf[i] = (val as u8 & PAYLOAD_MASK) | CONTINUE_BIT;
        val >>= 7;
        i += 1;
    }
    buf[i] = val as u8;
    i + 1
}

pub fn decode_vint64(data: &mut &[u8]) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for (i, &b) in data.iter().enumerate().take(MAX_VINT64_LEN) {
        if i == MAX_VINT64_LEN - 1 && b > MAX_VINT64_LAST {
            return Err(CodecError::corruption("invalid vint64"));
        }
        result |= u64::from(b & PAYLOAD_MASK) << shift;
        if b & CONTINUE_BIT == 0 {
            *data = &data[i + 1..];
            return Ok(result);
        }
        shift += 7;
    }
    if data.len() < MAX_VINT64_LEN {
        return Err(CodecError::UnexpectedEof {
            needed: data.len() + 1,
            remaining: data.len(),
        });
    }
    Err(CodecError::corruption("invalid vint64"))
}

pub fn vint_len(val: u64) -> usize {
    let bits = 64 - val.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

pub fn zigzag_encode(val: i64) -> u64 {
    ((val << 1) ^ (val >> 63)) as u64
}

pub fn zigzag_decode(val: u64) -> i64 {
    ((val >> 1) as i64) ^ -((val & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vint32_known_bytes() {
        let mut buf = Vec::new();
        encode_vint32(0, &mut buf).unwrap();
        encode_vint32(127, &mut buf).unwrap();
        encode_vint32(128, &mut buf).unwrap();
        encode_vint32(300, &mut buf).unwrap();
        assert_eq!(buf, vec![0x00, 0x7f, 0x80, 0x01, 0xac, 0x02]);
    }

    #[test]
    fn test_vint32_1() {
        let mut buf = Vec::new();

        for _ in 0..100000 {
            let val = rand::random::<u32>();
            encode_vint32(val, &mut buf).unwrap();
            assert_eq!(buf.len(), vint_len(val as u64));
            let mut data = buf.as_slice();
            assert_eq!(val, decode_vint32(&mut data).unwrap());
            assert!(data.is_empty());
            buf.clear();
        }
    }

    #[test]
    fn test_vint32_2() {
        let mut buf = Vec::new();
        let mut reference = Vec::new();

        for _ in 0..100000 {
            let val = rand::random::<u32>() >> (rand::random::<u32>() % 32);
            encode_vint32(val, &mut buf).unwrap();
            reference.push(val);
        }
        let mut data = buf.as_slice();
        for &expected in &reference {
            assert_eq!(expected, decode_vint32(&mut data).unwrap());
        }
        assert!(data.is_empty());
    }

    #[test]
    fn test_vint64() {
        let mut buf = Vec::new();

        for _ in 0..100000 {
            let val = rand::random::<u64>() >> (rand::random::<u32>() % 64);
            encode_vint64(val, &mut buf).unwrap();
            assert_eq!(buf.len(), vint_len(val));
            let mut data = buf.as_slice();
            assert_eq!(val, decode_vint64(&mut data).unwrap());
            buf.clear();
        }
    }

    #[test]
    fn test_vint32_and_vint64_agree() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        for val in [0u32, 1, 127, 128, 16383, 16384, u32::MAX] {
            encode_vint32(val, &mut a).unwrap();
            encode_vint64(u64::from(val), &mut b).unwrap();
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_truncated_vint() {
        let mut buf = Vec::new();
        encode_vint32(1 << 20, &mut buf).unwrap();
        let mut data = &buf[..buf.len() - 1];
        assert!(matches!(
            decode_vint32(&mut data),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_overlong_vint32() {
        let bytes = [0xffu8; 6];
        let mut data = &bytes[..];
        assert!(matches!(
            decode_vint32(&mut data),
            Err(CodecError::Corruption(_))
        ));
    }

    #[test]
    fn test_vint_high_bits_rejected() {
        let mut data = &[0xffu8, 0xff, 0xff, 0xff, 0x1f][..];
        assert!(matches!(
            decode_vint32(&mut data),
            Err(CodecError::Corruption(_))
        ));
        let mut data = &[0xffu8, 0xff, 0xff, 0xff, 0x0f][..];
        assert_eq!(decode_vint32(&mut data).unwrap(), u32::MAX);

        let mut bytes = [0xffu8; 10];
        bytes[9] = 0x02;
        assert!(matches!(
            decode_vint64(&mut &bytes[..]),
            Err(CodecError::Corruption(_))
        ));
        bytes[9] = 0x01;
        assert_eq!(decode_vint64(&mut &bytes[..]).unwrap(), u64::MAX);
    }

    #[test]
    fn test_zigzag() {
        for v in [0i64, -1, 1, -2, 2, i64::MAX, i64::MIN, 12345, -12345] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
    }
}
