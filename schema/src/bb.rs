use crate::error::DecodeError;

/// Groups may nest; skipping them recurses, so bound the depth.
const GROUP_DEPTH_LIMIT: u32 = 100;

/// The low three bits of every field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Varint          = 0,
    Fixed64         = 1,
    LengthDelimited = 2,
    StartGroup      = 3,
    EndGroup        = 4,
    Fixed32         = 5,
}

impl TryFrom<u8> for WireType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::Fixed32),
            other => Err(DecodeError::InvalidWireType(other)),
        }
    }
}

pub fn encode_zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

pub fn encode_zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn decode_zigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

pub fn decode_zigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// A protobuf byte buffer meant for reading.
///
/// Example usage:
///
/// ```
/// use dynproto_schema::{ByteBuffer, WireType};
/// let mut bb = ByteBuffer::new(&[0x08, 0x96, 0x01]);
/// assert_eq!(bb.read_tag(), Ok((1, WireType::Varint)));
/// assert_eq!(bb.read_varint(), Ok(150));
/// assert!(bb.is_empty());
/// ```
///
pub struct ByteBuffer<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> ByteBuffer<'a> {
    /// Create a new ByteBuffer that wraps the provided byte slice.
    pub fn new(data: &'a [u8]) -> ByteBuffer<'a> {
        ByteBuffer { data, index: 0 }
    }

    /// Retrieves the underlying byte slice.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Retrieves the current index into the underlying byte slice. This starts
    /// off as 0 and ends up as `self.data().len()` when everything has been
    /// read.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    /// True once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.index >= self.data.len()
    }

    /// Try to read a byte starting at the current index.
    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        if self.index >= self.data.len() {
            Err(DecodeError::Truncated(self.index))
        } else {
            let value = self.data[self.index];
            self.index += 1;
            Ok(value)
        }
    }

    /// Try to read `len` raw bytes starting at the current index.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            Err(DecodeError::Truncated(self.data.len()))
        } else {
            let value = &self.data[self.index..self.index + len];
            self.index += len;
            Ok(value)
        }
    }

    /// Try to read a base-128 varint of up to ten bytes.
    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.index;
        let mut shift: u32 = 0;
        let mut result: u64 = 0;

        loop {
            let byte = self.read_byte()?;

            // The tenth byte may only carry the 64th bit.
            if shift == 63 && byte > 1 {
                return Err(DecodeError::VarintOverflow(start));
            }

            result |= ((byte & 0x7f) as u64) << shift;
            if (byte & 0x80) == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Try to read a little-endian 32-bit value.
    pub fn read_fixed32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Try to read a little-endian 64-bit value.
    pub fn read_fixed64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Try to read a varint length prefix followed by that many bytes. The
    /// returned slice aliases the underlying memory.
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(DecodeError::Truncated(self.data.len()));
        }
        self.read_bytes(len as usize)
    }

    /// Try to read a field tag, split into field number and wire type.
    pub fn read_tag(&mut self) -> Result<(u32, WireType), DecodeError> {
        let tag = self.read_varint()?;
        if tag > u32::MAX as u64 {
            return Err(DecodeError::InvalidTag(tag));
        }
        let wire_type = WireType::try_from((tag & 7) as u8)?;
        let number = (tag >> 3) as u32;
        if number == 0 {
            return Err(DecodeError::ZeroFieldNumber);
        }
        Ok((number, wire_type))
    }

    /// Skip over the payload of a field whose tag has already been read.
    pub fn skip_field(&mut self, number: u32, wire_type: WireType) -> Result<(), DecodeError> {
        self.skip_field_at_depth(number, wire_type, 0)
    }

    fn skip_field_at_depth(
        &mut self,
        number: u32,
        wire_type: WireType,
        depth: u32,
    ) -> Result<(), DecodeError> {
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Fixed64 => {
                self.read_bytes(8)?;
            }
            WireType::LengthDelimited => {
                self.read_length_delimited()?;
            }
            WireType::Fixed32 => {
                self.read_bytes(4)?;
            }
            WireType::StartGroup => {
                if depth >= GROUP_DEPTH_LIMIT {
                    return Err(DecodeError::RecursionLimit);
                }
                loop {
                    let (inner, inner_type) = self.read_tag()?;
                    if inner_type == WireType::EndGroup {
                        if inner == number {
                            return Ok(());
                        }
                        return Err(DecodeError::UnexpectedEndGroup(inner));
                    }
                    self.skip_field_at_depth(inner, inner_type, depth + 1)?;
                }
            }
            WireType::EndGroup => return Err(DecodeError::UnexpectedEndGroup(number)),
        }
        Ok(())
    }
}

#[test]
fn read_byte() {
    let read = |bytes| ByteBuffer::new(bytes).read_byte();
    assert_eq!(read(&[]), Err(DecodeError::Truncated(0)));
    assert_eq!(read(&[0]), Ok(0));
    assert_eq!(read(&[255]), Ok(255));
}

#[test]
fn read_bytes() {
    let mut bb = ByteBuffer::new(&[1, 2, 3, 4, 5]);
    assert_eq!(bb.read_bytes(3), Ok([1, 2, 3].as_slice()));
    assert_eq!(bb.read_bytes(2), Ok([4, 5].as_slice()));
    assert!(bb.read_bytes(1).is_err());
}

#[test]
fn read_varint() {
    let read = |bytes| ByteBuffer::new(bytes).read_varint();
    assert!(read(&[]).is_err());
    assert_eq!(read(&[0]), Ok(0));
    assert_eq!(read(&[1]), Ok(1));
    assert_eq!(read(&[127]), Ok(127));
    assert!(read(&[128]).is_err());
    assert_eq!(read(&[128, 1]), Ok(128));
    assert_eq!(read(&[0xac, 0x02]), Ok(300));
    assert_eq!(
        read(&[0xf2, 0xdf, 0xb8, 0x9e, 0xa7, 0xe7, 0x02]),
        Ok(12_345_678_901_234)
    );
    assert_eq!(
        read(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]),
        Ok(u64::MAX)
    );
    assert_eq!(
        read(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02]),
        Err(DecodeError::VarintOverflow(0))
    );
    assert_eq!(
        read(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x81, 0x00]),
        Err(DecodeError::VarintOverflow(0))
    );
}

#[test]
fn read_fixed() {
    assert_eq!(ByteBuffer::new(&[1, 0, 0, 0]).read_fixed32(), Ok(1));
    assert_eq!(
        ByteBuffer::new(&[0, 0, 0, 0, 0, 0, 0xf0, 0x3f]).read_fixed64(),
        Ok(1.0f64.to_bits())
    );
    assert!(ByteBuffer::new(&[1, 0, 0]).read_fixed32().is_err());
}

#[test]
fn read_length_delimited() {
    let mut bb = ByteBuffer::new(&[3, b'a', b'b', b'c', 5, b'x']);
    assert_eq!(bb.read_length_delimited(), Ok(b"abc".as_slice()));
    assert!(bb.read_length_delimited().is_err());
}

#[test]
fn read_tag() {
    let read = |bytes| ByteBuffer::new(bytes).read_tag();
    assert_eq!(read(&[0x08]), Ok((1, WireType::Varint)));
    assert_eq!(read(&[0x12]), Ok((2, WireType::LengthDelimited)));
    assert_eq!(read(&[0x7d]), Ok((15, WireType::Fixed32)));
    assert_eq!(read(&[0x80, 0x01]), Ok((16, WireType::Varint)));
    assert_eq!(read(&[0x00]), Err(DecodeError::ZeroFieldNumber));
    assert_eq!(read(&[0x0e]), Err(DecodeError::InvalidWireType(6)));
}

#[test]
fn skip_fields() {
    // varint, fixed64, bytes, fixed32, then a group holding a varint
    let data = [
        0x08, 0x96, 0x01,
        0x11, 1, 2, 3, 4, 5, 6, 7, 8,
        0x1a, 2, b'h', b'i',
        0x25, 1, 2, 3, 4,
        0x2b, 0x08, 0x01, 0x2c,
    ];
    let mut bb = ByteBuffer::new(&data);
    while !bb.is_empty() {
        let (number, wire_type) = bb.read_tag().unwrap();
        bb.skip_field(number, wire_type).unwrap();
    }
    assert_eq!(bb.index(), data.len());
}

#[test]
fn skip_mismatched_group() {
    let mut bb = ByteBuffer::new(&[0x2b, 0x34]);
    let (number, wire_type) = bb.read_tag().unwrap();
    assert_eq!(
        bb.skip_field(number, wire_type),
        Err(DecodeError::UnexpectedEndGroup(6))
    );
}

#[test]
fn zigzag() {
    assert_eq!(encode_zigzag32(0), 0);
    assert_eq!(encode_zigzag32(-1), 1);
    assert_eq!(encode_zigzag32(1), 2);
    assert_eq!(encode_zigzag32(i32::MIN), u32::MAX);
    assert_eq!(decode_zigzag32(u32::MAX), i32::MIN);
    assert_eq!(encode_zigzag64(-2), 3);
    assert_eq!(decode_zigzag64(3), -2);
    assert_eq!(decode_zigzag64(encode_zigzag64(i64::MAX)), i64::MAX);
}

/// A protobuf byte buffer meant for writing.
///
/// Example usage:
///
/// ```
/// use dynproto_schema::{ByteBufferMut, WireType};
/// let mut bb = ByteBufferMut::new();
/// bb.write_tag(1, WireType::Varint);
/// bb.write_varint(150);
/// assert_eq!(bb.data(), [0x08, 0x96, 0x01]);
/// ```
///
#[derive(Debug, Default)]
pub struct ByteBufferMut {
    data: Vec<u8>,
}

impl ByteBufferMut {
    /// Creates an empty ByteBufferMut ready for writing.
    pub fn new() -> ByteBufferMut {
        ByteBufferMut { data: vec![] }
    }

    /// Consumes this buffer and returns the underlying backing store. Use this
    /// to get the data out when you're done writing to the buffer.
    pub fn data(self) -> Vec<u8> {
        self.data
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write a byte to the end of the buffer.
    pub fn write_byte(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Write a raw byte slice to the end of the buffer.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.data.extend_from_slice(value);
    }

    /// Write a base-128 varint to the end of the buffer.
    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = value as u8 & 0x7f;
            value >>= 7;

            if value == 0 {
                self.write_byte(byte);
                return;
            }

            self.write_byte(byte | 0x80);
        }
    }

    /// Write a field tag.
    pub fn write_tag(&mut self, number: u32, wire_type: WireType) {
        self.write_varint(((number as u64) << 3) | wire_type as u64);
    }

    pub fn write_fixed32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a varint length prefix followed by `value`.
    pub fn write_length_delimited(&mut self, value: &[u8]) {
        self.write_varint(value.len() as u64);
        self.write_bytes(value);
    }
}

#[cfg(test)]
fn write_once(cb: fn(&mut ByteBufferMut)) -> Vec<u8> {
    let mut bb = ByteBufferMut::new();
    cb(&mut bb);
    bb.data()
}

#[test]
fn write_varint() {
    assert_eq!(write_once(|bb| bb.write_varint(0)), [0]);
    assert_eq!(write_once(|bb| bb.write_varint(1)), [1]);
    assert_eq!(write_once(|bb| bb.write_varint(127)), [127]);
    assert_eq!(write_once(|bb| bb.write_varint(128)), [128, 1]);
    assert_eq!(write_once(|bb| bb.write_varint(300)), [0xac, 0x02]);
    assert_eq!(
        write_once(|bb| bb.write_varint(12_345_678_901_234)),
        [0xf2, 0xdf, 0xb8, 0x9e, 0xa7, 0xe7, 0x02]
    );
    assert_eq!(
        write_once(|bb| bb.write_varint(-1i64 as u64)),
        [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]
    );
}

#[test]
fn write_tag() {
    assert_eq!(write_once(|bb| bb.write_tag(1, WireType::Varint)), [0x08]);
    assert_eq!(write_once(|bb| bb.write_tag(2, WireType::LengthDelimited)), [0x12]);
    assert_eq!(write_once(|bb| bb.write_tag(16, WireType::Varint)), [0x80, 0x01]);
}

#[test]
fn write_fixed() {
    assert_eq!(write_once(|bb| bb.write_fixed32(1)), [1, 0, 0, 0]);
    assert_eq!(
        write_once(|bb| bb.write_fixed64(1.0f64.to_bits())),
        [0, 0, 0, 0, 0, 0, 0xf0, 0x3f]
    );
}

#[test]
fn write_sequence() {
    let mut bb = ByteBufferMut::new();
    bb.write_tag(1, WireType::Varint);
    bb.write_varint(150);
    bb.write_tag(2, WireType::LengthDelimited);
    bb.write_length_delimited(b"testing");
    assert_eq!(
        bb.data(),
        [0x08, 0x96, 0x01, 0x12, 0x07, b't', b'e', b's', b't', b'i', b'n', b'g']
    );
}
