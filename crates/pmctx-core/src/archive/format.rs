//! On-disk layout of an archive volume set.
//!
//! Three files share a base name: `<base>.label`, `<base>.index` and
//! `<base>.0` (data). Each begins with the same label record:
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ LABEL (big-endian)                                      │
//! │   len: u32               total label bytes              │
//! │   magic: [u8; 4]         = b"PMA1"                      │
//! │   version: u16           = 1                            │
//! │   file_kind: u16         0 label, 1 index, 2 data       │
//! │   pid: u32               creating process               │
//! │   start_sec: i64, start_nsec: u32                       │
//! │   host_len: u16, tz_len: u16                            │
//! │   host, timezone         UTF-8, unpadded                │
//! │   crc32: u32             over every preceding byte      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! The data file then holds records that can be walked in both directions:
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ len: u32                 total record bytes             │
//! │ kind: u16, flags: u16    flags bit 0 = zstd payload     │
//! │ sec: i64, nsec: u32      record time                    │
//! │ payload                  postcard, maybe zstd           │
//! │ crc32: u32               over the stored payload        │
//! │ len: u32                 trailer, equal to the header   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! The index file holds 20-byte entries `{sec: i64, nsec: u32, offset: u64}`
//! pointing at result records in the data file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, PmError};
use crate::model::{FetchResult, InDom, InstanceValue, Pmid, Timestamp, ValueSet};

pub const MAGIC: [u8; 4] = *b"PMA1";
pub const VERSION: u16 = 1;

pub const RECORD_HEADER_LEN: usize = 20;
pub const RECORD_TRAILER_LEN: usize = 8;
pub const INDEX_ENTRY_LEN: usize = 20;

/// Upper bound on a single record; larger lengths mean corruption.
pub const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

const LABEL_FIXED_LEN: usize = 4 + 4 + 2 + 2 + 4 + 8 + 4 + 2 + 2 + 4;
const FLAG_ZSTD: u16 = 0x1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Label,
    Index,
    Data,
}

impl FileKind {
    fn code(self) -> u16 {
        match self {
            FileKind::Label => 0,
            FileKind::Index => 1,
            FileKind::Data => 2,
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(FileKind::Label),
            1 => Some(FileKind::Index),
            2 => Some(FileKind::Data),
            _ => None,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            FileKind::Label => "label",
            FileKind::Index => "index",
            FileKind::Data => "0",
        }
    }

    /// `<base>.<suffix>`
    pub fn path(self, base: &Path) -> PathBuf {
        let mut name = base.as_os_str().to_owned();
        name.push(".");
        name.push(self.suffix());
        PathBuf::from(name)
    }
}

/// Identity of a volume set, repeated at the start of every file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveLabel {
    pub version: u16,
    pub pid: u32,
    pub start: Timestamp,
    pub host: String,
    pub timezone: String,
}

impl ArchiveLabel {
    pub fn encode(&self, kind: FileKind) -> Result<Vec<u8>, PmError> {
        let host = self.host.as_bytes();
        let tz = self.timezone.as_bytes();
        if host.len() > u16::MAX as usize || tz.len() > u16::MAX as usize {
            return Err(PmError::new(
                ErrorKind::InvalidArgument,
                "label host or timezone too long",
            ));
        }
        let len = LABEL_FIXED_LEN + host.len() + tz.len();

        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&kind.code().to_be_bytes());
        buf.extend_from_slice(&self.pid.to_be_bytes());
        buf.extend_from_slice(&self.start.sec.to_be_bytes());
        buf.extend_from_slice(&self.start.nsec.to_be_bytes());
        buf.extend_from_slice(&(host.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(tz.len() as u16).to_be_bytes());
        buf.extend_from_slice(host);
        buf.extend_from_slice(tz);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        Ok(buf)
    }

    /// Parses the label at the start of `bytes`; returns it, the file kind
    /// and the number of bytes it occupies.
    pub fn decode(bytes: &[u8]) -> Result<(Self, FileKind, usize), PmError> {
        let bad = |why: String| PmError::new(ErrorKind::BadLabel, why);

        if bytes.len() < LABEL_FIXED_LEN {
            return Err(bad(format!("label truncated at {} bytes", bytes.len())));
        }
        let len = be_u32(bytes, 0) as usize;
        if len < LABEL_FIXED_LEN || len > bytes.len() {
            return Err(bad(format!("label length {len} out of range")));
        }
        if bytes[4..8] != MAGIC {
            return Err(bad(format!(
                "invalid magic: expected PMA1, got {:?}",
                &bytes[4..8]
            )));
        }
        let version = be_u16(bytes, 8);
        if version != VERSION {
            return Err(bad(format!("unsupported version: {version}")));
        }
        let stored_crc = be_u32(bytes, len - 4);
        if crc32fast::hash(&bytes[..len - 4]) != stored_crc {
            return Err(bad("label checksum mismatch".to_string()));
        }

        let kind = FileKind::from_code(be_u16(bytes, 10))
            .ok_or_else(|| bad(format!("unknown file kind {}", be_u16(bytes, 10))))?;
        let pid = be_u32(bytes, 12);
        let sec = be_i64(bytes, 16);
        let nsec = be_u32(bytes, 24);
        let host_len = be_u16(bytes, 28) as usize;
        let tz_len = be_u16(bytes, 30) as usize;
        if LABEL_FIXED_LEN + host_len + tz_len != len {
            return Err(bad("label string lengths disagree with record".to_string()));
        }
        let host = std::str::from_utf8(&bytes[32..32 + host_len])
            .map_err(|_| bad("label host is not UTF-8".to_string()))?;
        let tz = std::str::from_utf8(&bytes[32 + host_len..32 + host_len + tz_len])
            .map_err(|_| bad("label timezone is not UTF-8".to_string()))?;

        Ok((
            ArchiveLabel {
                version,
                pid,
                start: Timestamp::new(sec, nsec),
                host: host.to_string(),
                timezone: tz.to_string(),
            },
            kind,
            len,
        ))
    }

    /// Labels of one volume set must agree on these fields.
    pub fn same_archive(&self, other: &ArchiveLabel) -> bool {
        self.host == other.host && self.pid == other.pid && self.start == other.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Desc,
    InDom,
    Result,
}

impl RecordKind {
    fn code(self) -> u16 {
        match self {
            RecordKind::Desc => 1,
            RecordKind::InDom => 2,
            RecordKind::Result => 3,
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(RecordKind::Desc),
            2 => Some(RecordKind::InDom),
            3 => Some(RecordKind::Result),
            _ => None,
        }
    }
}

/// Fixed part of a data record, read without touching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub len: usize,
    pub kind: RecordKind,
    pub compressed: bool,
    pub timestamp: Timestamp,
}

impl RecordHeader {
    pub fn parse(bytes: &[u8; RECORD_HEADER_LEN], offset: u64) -> Result<Self, PmError> {
        let len = be_u32(bytes, 0) as usize;
        if len < RECORD_HEADER_LEN + RECORD_TRAILER_LEN || len > MAX_RECORD_LEN {
            return Err(PmError::log_record(format!(
                "record at offset {offset} has length {len}"
            )));
        }
        let kind_code = be_u16(bytes, 4);
        let kind = RecordKind::from_code(kind_code).ok_or_else(|| {
            PmError::log_record(format!("record at offset {offset} has kind {kind_code}"))
        })?;
        let flags = be_u16(bytes, 6);
        let nsec = be_u32(bytes, 16);
        if nsec >= 1_000_000_000 {
            return Err(PmError::log_record(format!(
                "record at offset {offset} has nanoseconds {nsec}"
            )));
        }
        Ok(RecordHeader {
            len,
            kind,
            compressed: flags & FLAG_ZSTD != 0,
            timestamp: Timestamp {
                sec: be_i64(bytes, 8),
                nsec,
            },
        })
    }

    pub fn payload_len(&self) -> usize {
        self.len - RECORD_HEADER_LEN - RECORD_TRAILER_LEN
    }
}

/// Frames one record: header, stored payload, checksum, trailer.
pub fn encode_record(
    kind: RecordKind,
    timestamp: Timestamp,
    payload: &[u8],
    compress_level: Option<i32>,
) -> Result<Vec<u8>, PmError> {
    let (stored, flags) = match compress_level {
        Some(level) => (zstd::bulk::compress(payload, level)?, FLAG_ZSTD),
        None => (payload.to_vec(), 0),
    };
    let len = RECORD_HEADER_LEN + stored.len() + RECORD_TRAILER_LEN;
    if len > MAX_RECORD_LEN {
        return Err(PmError::new(
            ErrorKind::InvalidArgument,
            format!("record of {len} bytes exceeds limit"),
        ));
    }

    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&(len as u32).to_be_bytes());
    buf.extend_from_slice(&kind.code().to_be_bytes());
    buf.extend_from_slice(&flags.to_be_bytes());
    buf.extend_from_slice(&timestamp.sec.to_be_bytes());
    buf.extend_from_slice(&timestamp.nsec.to_be_bytes());
    buf.extend_from_slice(&stored);
    buf.extend_from_slice(&crc32fast::hash(&stored).to_be_bytes());
    buf.extend_from_slice(&(len as u32).to_be_bytes());
    Ok(buf)
}

/// Checks the trailer of a full record and returns its plain payload.
pub fn decode_record_body(
    header: &RecordHeader,
    record: &[u8],
    offset: u64,
) -> Result<Vec<u8>, PmError> {
    if record.len() != header.len {
        return Err(PmError::log_record(format!(
            "record at offset {offset} truncated: {} of {} bytes",
            record.len(),
            header.len
        )));
    }
    let payload_end = header.len - RECORD_TRAILER_LEN;
    let stored = &record[RECORD_HEADER_LEN..payload_end];
    let crc = be_u32(record, payload_end);
    let trailer = be_u32(record, payload_end + 4) as usize;
    if trailer != header.len {
        return Err(PmError::log_record(format!(
            "record at offset {offset}: trailer length {trailer} != header length {}",
            header.len
        )));
    }
    if crc32fast::hash(stored) != crc {
        return Err(PmError::log_record(format!(
            "record at offset {offset}: checksum mismatch"
        )));
    }
    if header.compressed {
        zstd::decode_all(stored).map_err(|e| {
            PmError::log_record(format!("record at offset {offset}: zstd: {e}"))
        })
    } else {
        Ok(stored.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: Timestamp,
    pub offset: u64,
}

impl IndexEntry {
    pub fn encode(&self) -> [u8; INDEX_ENTRY_LEN] {
        let mut buf = [0u8; INDEX_ENTRY_LEN];
        buf[0..8].copy_from_slice(&self.timestamp.sec.to_be_bytes());
        buf[8..12].copy_from_slice(&self.timestamp.nsec.to_be_bytes());
        buf[12..20].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Self {
        IndexEntry {
            timestamp: Timestamp::new(be_i64(bytes, 0), be_u32(bytes, 8)),
            offset: be_u64(bytes, 12),
        }
    }
}

/// InDom snapshot as stored: instance names are interned, and only names
/// not written before travel with the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredInDom {
    pub indom: InDom,
    pub new_names: Vec<(u64, String)>,
    pub instances: Vec<(i32, u64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredValueSet {
    pub pmid: Pmid,
    /// Negative status, or 0 when `values` is meaningful.
    pub status: i32,
    pub values: Vec<InstanceValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResult {
    pub vsets: Vec<StoredValueSet>,
}

impl StoredResult {
    pub fn from_result(result: &FetchResult) -> Self {
        let vsets = result
            .vsets
            .iter()
            .map(|vs| match &vs.values {
                Ok(values) => StoredValueSet {
                    pmid: vs.pmid,
                    status: 0,
                    values: values.clone(),
                },
                Err(kind) => StoredValueSet {
                    pmid: vs.pmid,
                    status: kind.code(),
                    values: Vec::new(),
                },
            })
            .collect();
        StoredResult { vsets }
    }

    pub fn is_mark(&self) -> bool {
        self.vsets.is_empty()
    }

    pub fn get(&self, pmid: Pmid) -> Option<&StoredValueSet> {
        self.vsets.iter().find(|vs| vs.pmid == pmid)
    }
}

impl StoredValueSet {
    pub fn to_value_set(&self) -> ValueSet {
        if self.status < 0 {
            ValueSet::error(self.pmid, ErrorKind::from_code(self.status))
        } else {
            ValueSet::new(self.pmid, self.values.clone())
        }
    }
}

pub fn to_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, PmError> {
    postcard::to_allocvec(value)
        .map_err(|e| PmError::new(ErrorKind::OutOfMemory, format!("postcard encode: {e}")))
}

pub fn from_payload<'a, T: Deserialize<'a>>(bytes: &'a [u8], offset: u64) -> Result<T, PmError> {
    postcard::from_bytes(bytes)
        .map_err(|e| PmError::log_record(format!("record at offset {offset}: {e}")))
}

fn be_u16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

fn be_u32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn be_i64(b: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[at..at + 8]);
    i64::from_be_bytes(raw)
}

fn be_u64(b: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[at..at + 8]);
    u64::from_be_bytes(raw)
}
