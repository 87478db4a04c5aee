//! Frame header and bounds-checked payload cursors.
//!
//! Frame layout (all fields big-endian):
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ length: u32   total bytes including header   │
//! │ type:   u32   FrameType tag                  │
//! │ from:   u32   sender's context id            │
//! ├──────────────────────────────────────────────┤
//! │ payload (type-specific, 4-byte aligned)      │
//! └──────────────────────────────────────────────┘
//! ```

use crate::error::PmError;

pub const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Error,
    Result,
    Profile,
    Fetch,
    DescReq,
    Desc,
    InstanceReq,
    Instance,
    Attr,
    HighResFetch,
    HighResResult,
    Store,
}

impl FrameType {
    pub fn tag(self) -> u32 {
        match self {
            FrameType::Error => 0x7000,
            FrameType::Result => 0x7001,
            FrameType::Profile => 0x7002,
            FrameType::Fetch => 0x7003,
            FrameType::DescReq => 0x7004,
            FrameType::Desc => 0x7005,
            FrameType::InstanceReq => 0x7006,
            FrameType::Instance => 0x7007,
            FrameType::Attr => 0x7011,
            FrameType::HighResFetch => 0x7016,
            FrameType::HighResResult => 0x7017,
            FrameType::Store => 0x7018,
        }
    }
}

impl TryFrom<u32> for FrameType {
    type Error = PmError;

    fn try_from(tag: u32) -> Result<Self, PmError> {
        Ok(match tag {
            0x7000 => FrameType::Error,
            0x7001 => FrameType::Result,
            0x7002 => FrameType::Profile,
            0x7003 => FrameType::Fetch,
            0x7004 => FrameType::DescReq,
            0x7005 => FrameType::Desc,
            0x7006 => FrameType::InstanceReq,
            0x7007 => FrameType::Instance,
            0x7011 => FrameType::Attr,
            0x7016 => FrameType::HighResFetch,
            0x7017 => FrameType::HighResResult,
            0x7018 => FrameType::Store,
            other => {
                return Err(PmError::protocol(format!(
                    "unknown frame type {other:#x}"
                )));
            }
        })
    }
}

/// Parsed fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub len: usize,
    pub frame_type: FrameType,
    pub from: u32,
}

/// Validates a header before any payload is read.
///
/// A declared length below the header size or above `max_len` is rejected.
pub fn parse_header(bytes: &[u8; HEADER_LEN], max_len: usize) -> Result<FrameHeader, PmError> {
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len < HEADER_LEN {
        return Err(PmError::protocol(format!(
            "declared frame length {len} shorter than header"
        )));
    }
    if len > max_len {
        return Err(PmError::protocol(format!(
            "declared frame length {len} exceeds limit {max_len}"
        )));
    }
    let tag = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let from = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    Ok(FrameHeader {
        len,
        frame_type: FrameType::try_from(tag)?,
        from,
    })
}

/// Rounds up to the next multiple of 4.
pub fn padded_len(len: usize) -> usize {
    len.saturating_add(3) & !3
}

/// Builds one frame, patching the length into the header on `finish`.
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn new(frame_type: FrameType, from: u32) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[0u8; 4]); // placeholder for length
        buf.extend_from_slice(&frame_type.tag().to_be_bytes());
        buf.extend_from_slice(&from.to_be_bytes());
        Self { buf }
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends raw bytes followed by zero padding to a 4-byte boundary.
    pub fn put_padded(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        let pad = padded_len(bytes.len()) - bytes.len();
        self.buf.extend(std::iter::repeat_n(0u8, pad));
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() == HEADER_LEN
    }

    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_be_bytes());
        self.buf
    }
}

/// Cursor over one complete frame. Never reads past the declared length.
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
    frame_type: FrameType,
    from: u32,
}

impl<'a> FrameReader<'a> {
    /// Wraps a complete frame; the declared length must equal `frame.len()`.
    pub fn new(frame: &'a [u8]) -> Result<Self, PmError> {
        let header: &[u8; HEADER_LEN] = frame
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                PmError::protocol(format!("frame of {} bytes has no header", frame.len()))
            })?;
        let parsed = parse_header(header, usize::MAX)?;
        if parsed.len != frame.len() {
            return Err(PmError::protocol(format!(
                "declared frame length {} but {} bytes present",
                parsed.len,
                frame.len()
            )));
        }
        Ok(Self {
            buf: frame,
            pos: HEADER_LEN,
            frame_type: parsed.frame_type,
            from: parsed.from,
        })
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn sender(&self) -> u32 {
        self.from
    }

    /// Total frame length as declared in the header.
    pub fn declared_len(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], PmError> {
        if n > self.remaining() {
            return Err(PmError::protocol(format!(
                "{:?} frame truncated: need {} bytes at offset {}, {} left",
                self.frame_type,
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads `n` bytes and skips the padding that follows them.
    pub fn take_padded(&mut self, n: usize) -> Result<&'a [u8], PmError> {
        let padded = padded_len(n);
        let slice = self.take(padded)?;
        Ok(&slice[..n])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PmError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn get_u32(&mut self) -> Result<u32, PmError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32, PmError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn get_u64(&mut self) -> Result<u64, PmError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64, PmError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    /// Reads a count and checks that `count * min_item_len` bytes remain.
    pub fn get_count(&mut self, what: &str, min_item_len: usize) -> Result<usize, PmError> {
        let raw = self.get_i32()?;
        if raw < 0 {
            return Err(PmError::protocol(format!("negative {what} count {raw}")));
        }
        let count = raw as usize;
        let needed = count.checked_mul(min_item_len).unwrap_or(usize::MAX);
        if needed > self.remaining() {
            return Err(PmError::protocol(format!(
                "{what} count {count} needs at least {needed} bytes, {} left",
                self.remaining()
            )));
        }
        Ok(count)
    }

    /// Requires that the whole declared length has been consumed.
    pub fn finish(self) -> Result<(), PmError> {
        if self.remaining() != 0 {
            return Err(PmError::protocol(format!(
                "{:?} frame has {} trailing bytes",
                self.frame_type,
                self.remaining()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_writer_patches_length() {
        let mut w = FrameWriter::new(FrameType::Error, 7);
        w.put_i32(-12345);
        let frame = w.finish();
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[0..4], &16u32.to_be_bytes());

        let mut r = FrameReader::new(&frame).unwrap();
        assert_eq!(r.frame_type(), FrameType::Error);
        assert_eq!(r.sender(), 7);
        assert_eq!(r.get_i32().unwrap(), -12345);
        r.finish().unwrap();
    }

    #[test]
    fn test_declared_length_mismatch_rejected() {
        let mut w = FrameWriter::new(FrameType::DescReq, 0);
        w.put_u32(1);
        let mut frame = w.finish();
        frame.extend_from_slice(&[0, 0, 0, 0]);

        let err = FrameReader::new(&frame).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

        frame.truncate(10);
        let err = FrameReader::new(&frame).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn test_reads_never_cross_declared_length() {
        let mut w = FrameWriter::new(FrameType::DescReq, 0);
        w.put_u32(1);
        let frame = w.finish();
        let mut r = FrameReader::new(&frame).unwrap();
        r.get_u32().unwrap();
        assert_eq!(
            r.get_u32().unwrap_err().kind(),
            ErrorKind::ProtocolViolation
        );
    }

    #[test]
    fn test_header_ceiling() {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&(1024u32 * 1024).to_be_bytes());
        header[4..8].copy_from_slice(&FrameType::Result.tag().to_be_bytes());
        assert!(parse_header(&header, 4096).is_err());
        assert!(parse_header(&header, 2 * 1024 * 1024).is_ok());

        header[0..4].copy_from_slice(&4u32.to_be_bytes());
        assert!(parse_header(&header, 4096).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(FrameType::try_from(0x1234).is_err());
        assert_eq!(FrameType::try_from(0x7011).unwrap(), FrameType::Attr);
    }

    #[test]
    fn test_count_sanity_check() {
        let mut w = FrameWriter::new(FrameType::Result, 0);
        w.put_i32(1000);
        w.put_u32(0);
        let frame = w.finish();
        let mut r = FrameReader::new(&frame).unwrap();
        assert!(r.get_count("value", 8).is_err());
    }
}
