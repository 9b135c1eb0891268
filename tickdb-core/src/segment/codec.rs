//! Segment value encoding

use super::Segment;
use crate::{Point, Result, TickError, Timestamp};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Segment format version
pub const FORMAT_VERSION: u8 = 1;

/// Size of the trailing CRC32
const CHECKSUM_SIZE: usize = 4;

/// Segment value header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Segment format version
    pub version: u8,
    /// Number of points
    pub count: u32,
}

impl SegmentHeader {
    /// Header size in bytes
    pub const SIZE: usize = 5;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u32_le(self.count);
    }

    /// Deserialize from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(TickError::InvalidFormat("Segment header too short".into()));
        }

        let mut cursor = std::io::Cursor::new(data);
        Ok(Self {
            version: cursor.get_u8(),
            count: cursor.get_u32_le(),
        })
    }
}

impl Segment {
    /// Size of the encoded value for a segment holding `count` points
    pub fn encoded_len(count: usize) -> usize {
        SegmentHeader::SIZE + count * Point::SIZE + CHECKSUM_SIZE
    }

    /// Serialize to a store value
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::encoded_len(self.len()));
        SegmentHeader {
            version: FORMAT_VERSION,
            count: self.len() as u32,
        }
        .encode(&mut buf);

        for point in self.points() {
            buf.put_i64_le(point.timestamp.ticks());
            buf.put_u64_le(point.flags);
            buf.put_f64_le(point.value);
        }

        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);
        buf.freeze()
    }

    /// Deserialize a store value into a segment of the given capacity
    pub fn from_bytes(data: &[u8], capacity: usize) -> Result<Self> {
        let header = SegmentHeader::from_bytes(data)?;
        if header.version != FORMAT_VERSION {
            return Err(TickError::InvalidFormat(format!(
                "Unsupported segment version {}",
                header.version
            )));
        }

        let count = header.count as usize;
        if count == 0 || count > capacity {
            return Err(TickError::Corruption(format!(
                "Segment holds {} points, capacity is {}",
                count, capacity
            )));
        }
        if data.len() != Self::encoded_len(count) {
            return Err(TickError::Corruption(format!(
                "Segment of {} points has {} bytes",
                count,
                data.len()
            )));
        }

        let body_len = data.len() - CHECKSUM_SIZE;
        let expected = (&data[body_len..]).get_u32_le();
        let actual = crc32fast::hash(&data[..body_len]);
        if expected != actual {
            return Err(TickError::ChecksumMismatch { expected, actual });
        }

        let mut cursor = &data[SegmentHeader::SIZE..body_len];
        let mut points: Vec<Point> = Vec::with_capacity(count);
        for _ in 0..count {
            let timestamp = Timestamp::from_ticks(cursor.get_i64_le());
            let flags = cursor.get_u64_le();
            let value = cursor.get_f64_le();
            if let Some(prev) = points.last() {
                if prev.timestamp >= timestamp {
                    return Err(TickError::Corruption(format!(
                        "Segment points out of order at {}",
                        timestamp
                    )));
                }
            }
            points.push(Point {
                timestamp,
                flags,
                value,
            });
        }

        Ok(Segment::from_sorted(points, capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Segment {
        let mut seg = Segment::new(8);
        seg.insert(Point::with_flags(-5, 3, 1.5));
        seg.insert(Point::new(10, f64::NAN));
        seg.insert(Point::new(i64::MAX, -0.0));
        seg
    }

    #[test]
    fn test_encode_decode() {
        let seg = sample();
        let bytes = seg.to_bytes();
        assert_eq!(bytes.len(), Segment::encoded_len(3));

        let decoded = Segment::from_bytes(&bytes, 8).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.front().unwrap().flags, 3);
        assert!(decoded.get(1).unwrap().value.is_nan());
        assert_eq!(decoded.back().unwrap().timestamp, Timestamp::MAX);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = sample().to_bytes().to_vec();
        bytes[SegmentHeader::SIZE + 9] ^= 0xFF;

        let err = Segment::from_bytes(&bytes, 8).unwrap_err();
        assert!(matches!(err, TickError::ChecksumMismatch { .. }));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_rejects_bad_values() {
        let bytes = sample().to_bytes();

        assert!(matches!(
            Segment::from_bytes(&bytes[..3], 8),
            Err(TickError::InvalidFormat(_))
        ));
        assert!(matches!(
            Segment::from_bytes(&bytes[..bytes.len() - 1], 8),
            Err(TickError::Corruption(_))
        ));
        // more points than the engine capacity
        assert!(matches!(
            Segment::from_bytes(&bytes, 2),
            Err(TickError::Corruption(_))
        ));

        let mut versioned = bytes.to_vec();
        versioned[0] = 9;
        assert!(matches!(
            Segment::from_bytes(&versioned, 8),
            Err(TickError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rejects_unordered_points() {
        let mut buf = BytesMut::new();
        SegmentHeader {
            version: FORMAT_VERSION,
            count: 2,
        }
        .encode(&mut buf);
        for ts in [20i64, 10] {
            buf.put_i64_le(ts);
            buf.put_u64_le(0);
            buf.put_f64_le(0.0);
        }
        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        assert!(matches!(
            Segment::from_bytes(&buf, 8),
            Err(TickError::Corruption(_))
        ));
    }
}
