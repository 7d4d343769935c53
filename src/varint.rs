use crate::QueryErr;
use tokio::io::{AsyncRead, AsyncReadExt};

const SEGMENT_BITS: u32 = 0x7F;
const CHECKER_BIT: u8 = 0x80;
const MAX_VARINT_LEN: usize = 5;

/// Encode the given number as a [VarInt](https://wiki.vg/Protocol#VarInt_and_VarLong).
pub fn encode_varint(num: i32) -> Vec<u8> {
    // Negative values are encoded through their two's complement bits,
    // so they always take the full five bytes.
    let mut num = num as u32;
    let mut result = Vec::<u8>::with_capacity(MAX_VARINT_LEN);

    loop {
        if (num & !SEGMENT_BITS) == 0 {
            result.push(num as u8);

            return result;
        }

        result.push(((num & SEGMENT_BITS) as u8) | CHECKER_BIT);
        num >>= 7;
    }
}

/// Decode the given VarInt as a number.
pub fn decode_varint(arr: &[u8]) -> Result<i32, QueryErr> {
    if arr.len() > MAX_VARINT_LEN {
        return Err(QueryErr::Malformed(format!(
            "VarInts are never longer than 5 bytes, but got {}",
            arr.len()
        )));
    }

    match arr.last() {
        Some(&n) if n & CHECKER_BIT != 0 => Err(QueryErr::Malformed(format!(
            "Invalid VarInt data: {:02X?}",
            arr
        ))),
        Some(_) => {
            let mut result = 0u32;

            for (i, &n) in arr.iter().enumerate() {
                result |= ((n as u32) & SEGMENT_BITS) << (i * 7);
            }

            Ok(result as i32)
        }
        None => Err(QueryErr::Malformed("VarInt is empty".into())),
    }
}

/// Read one VarInt from a stream, returning `(bytes consumed, value)`.
pub async fn decode_varint_from_socket<R>(socket: &mut R) -> Result<(usize, i32), QueryErr>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::<u8>::with_capacity(MAX_VARINT_LEN);

    loop {
        let buf = socket.read_u8().await?;
        buffer.push(buf);

        if buf & CHECKER_BIT == 0 || buffer.len() > MAX_VARINT_LEN {
            break;
        }
    }

    Ok((buffer.len(), decode_varint(&buffer)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_encodings() {
        assert_eq!(encode_varint(0), vec![0x00]);
        assert_eq!(encode_varint(1), vec![0x01]);
        assert_eq!(encode_varint(127), vec![0x7F]);
        assert_eq!(encode_varint(128), vec![0x80, 0x01]);
        assert_eq!(encode_varint(25565), vec![0xDD, 0xC7, 0x01]);
        assert_eq!(encode_varint(i32::MAX), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
        assert_eq!(encode_varint(-1), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[test]
    fn round_trips_across_the_positive_range() {
        let mut num = 0i64;

        while num <= i32::MAX as i64 {
            let n = num as i32;
            assert_eq!(decode_varint(&encode_varint(n)).unwrap(), n);
            num = num * 3 + 1;
        }

        for n in [0, 1, 127, 128, 255, 2_097_151, 2_097_152, i32::MAX] {
            assert_eq!(decode_varint(&encode_varint(n)).unwrap(), n);
        }
        assert_eq!(decode_varint(&encode_varint(-1)).unwrap(), -1);
    }

    #[test]
    fn rejects_bad_varints() {
        assert!(decode_varint(&[]).is_err());
        assert!(decode_varint(&[0x80]).is_err());
        assert!(decode_varint(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]).is_err());
    }

    #[tokio::test]
    async fn reads_from_stream() {
        let bufs: &[u8] = &[0x80, 0x01, 0x2A];
        let mut stream = bufs;

        assert_eq!(decode_varint_from_socket(&mut stream).await.unwrap(), (2, 128));
        assert_eq!(decode_varint_from_socket(&mut stream).await.unwrap(), (1, 42));
        assert!(decode_varint_from_socket(&mut stream).await.is_err());
    }
}
