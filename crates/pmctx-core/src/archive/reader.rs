//! Random-access reader over one archive volume set.
//!
//! Only the label, the index and the metadata seen so far are kept in RAM.
//! Result records are parsed on demand through a small LRU keyed by file
//! offset. Metadata (descriptors, InDom snapshots) is resolved lazily by a
//! forward-only scan that resumes where the previous one stopped.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::format::{
    ArchiveLabel, FileKind, INDEX_ENTRY_LEN, IndexEntry, RECORD_HEADER_LEN, RECORD_TRAILER_LEN,
    RecordHeader, RecordKind, StoredInDom, StoredResult, decode_record_body, from_payload,
};
use super::interner::StringInterner;
use crate::error::{ErrorKind, PmError};
use crate::model::{Desc, FetchResult, InDom, InDomInstances, Pmid, Timestamp};

const RECORD_CACHE_SIZE: usize = 64;
const MAX_LABEL_LEN: usize = 2 * u16::MAX as usize + 64;

/// Location of one data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    pub start: u64,
    pub end: u64,
    pub kind: RecordKind,
    pub timestamp: Timestamp,
}

/// A fully decoded data record.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveRecord {
    Desc(Desc),
    InDom(InDomInstances),
    Result(FetchResult),
}

// ============================================================
// RecordCache: LRU of parsed result records
// ============================================================

struct CachedRecord {
    result: Arc<StoredResult>,
    last_accessed: Instant,
}

struct RecordCache {
    cache: HashMap<u64, CachedRecord>, // record offset → parsed result
    max_records: usize,
}

impl RecordCache {
    fn new(max_records: usize) -> Self {
        Self {
            cache: HashMap::new(),
            max_records,
        }
    }

    fn get(&mut self, offset: u64) -> Option<Arc<StoredResult>> {
        let cached = self.cache.get_mut(&offset)?;
        cached.last_accessed = Instant::now();
        Some(Arc::clone(&cached.result))
    }

    fn insert(&mut self, offset: u64, result: Arc<StoredResult>) {
        while self.cache.len() >= self.max_records {
            self.evict_oldest();
        }
        self.cache.insert(
            offset,
            CachedRecord {
                result,
                last_accessed: Instant::now(),
            },
        );
    }

    fn evict_oldest(&mut self) {
        if let Some((&oldest_key, _)) = self.cache.iter().min_by_key(|(_, v)| v.last_accessed) {
            self.cache.remove(&oldest_key);
        }
    }
}

// ============================================================
// ArchiveReader
// ============================================================

pub struct ArchiveReader {
    base: PathBuf,
    label: ArchiveLabel,
    data: File,
    /// First byte after the data file's label.
    data_start: u64,
    data_len: u64,
    index: Vec<IndexEntry>,

    descs: HashMap<Pmid, Desc>,
    indoms: HashMap<InDom, Vec<InDomInstances>>,
    interner: StringInterner,
    /// Where the forward metadata scan resumes.
    meta_offset: u64,

    cache: RecordCache,
    bounds: Option<(Timestamp, Timestamp)>,
}

impl ArchiveReader {
    /// Opens `<base>.label`, `<base>.index` and `<base>.0` and checks that
    /// their labels agree.
    pub fn open(base: impl AsRef<Path>) -> Result<Self, PmError> {
        let base = base.as_ref().to_path_buf();

        let label_bytes = read_whole(FileKind::Label, &base)?;
        let (label, kind, _) = ArchiveLabel::decode(&label_bytes)?;
        expect_kind(kind, FileKind::Label)?;

        let index_bytes = read_whole(FileKind::Index, &base)?;
        let (index_label, kind, index_start) = ArchiveLabel::decode(&index_bytes)?;
        expect_kind(kind, FileKind::Index)?;
        check_same(&label, &index_label, FileKind::Index)?;
        let entries = &index_bytes[index_start..];
        if entries.len() % INDEX_ENTRY_LEN != 0 {
            warn!(
                base = %base.display(),
                trailing = entries.len() % INDEX_ENTRY_LEN,
                "archive index has a partial trailing entry, ignoring it"
            );
        }
        let index: Vec<IndexEntry> = entries
            .chunks_exact(INDEX_ENTRY_LEN)
            .map(IndexEntry::decode)
            .collect();

        let data_path = FileKind::Data.path(&base);
        let mut data = File::open(&data_path).map_err(|e| no_archive(&data_path, e))?;
        let data_len = data.metadata()?.len();
        let mut head = vec![0u8; (data_len as usize).min(MAX_LABEL_LEN)];
        data.read_exact(&mut head)?;
        let (data_label, kind, data_start) = ArchiveLabel::decode(&head)?;
        expect_kind(kind, FileKind::Data)?;
        check_same(&label, &data_label, FileKind::Data)?;

        let mut reader = Self {
            base,
            label,
            data,
            data_start: data_start as u64,
            data_len,
            index,
            descs: HashMap::new(),
            indoms: HashMap::new(),
            interner: StringInterner::new(),
            meta_offset: data_start as u64,
            cache: RecordCache::new(RECORD_CACHE_SIZE),
            bounds: None,
        };

        let first = reader.next_result_ref(reader.data_start)?;
        let last = reader.prev_result_ref(reader.data_len)?;
        reader.bounds = match (first, last) {
            (Some(f), Some(l)) => Some((f.timestamp, l.timestamp)),
            _ => None,
        };

        debug!(
            base = %reader.base.display(),
            host = %reader.label.host,
            index_entries = reader.index.len(),
            data_bytes = data_len,
            "archive opened"
        );
        Ok(reader)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn label(&self) -> &ArchiveLabel {
        &self.label
    }

    pub fn start_offset(&self) -> u64 {
        self.data_start
    }

    pub fn end_offset(&self) -> u64 {
        self.data_len
    }

    /// Timestamps of the first and last result records.
    pub fn time_bounds(&self) -> Option<(Timestamp, Timestamp)> {
        self.bounds
    }

    // ---- raw record access ----

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), PmError> {
        self.data.seek(SeekFrom::Start(offset))?;
        self.data.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                PmError::log_record(format!("data file truncated at offset {offset}"))
            } else {
                e.into()
            }
        })
    }

    /// Header of the record starting at `offset`; `None` at end of file.
    pub fn read_header_at(&mut self, offset: u64) -> Result<Option<RecordRef>, PmError> {
        if offset >= self.data_len {
            return Ok(None);
        }
        if offset + RECORD_HEADER_LEN as u64 > self.data_len {
            return Err(PmError::log_record(format!(
                "partial record header at offset {offset}"
            )));
        }
        let mut raw = [0u8; RECORD_HEADER_LEN];
        self.read_at(offset, &mut raw)?;
        let header = RecordHeader::parse(&raw, offset)?;
        let end = offset + header.len as u64;
        if end > self.data_len {
            return Err(PmError::log_record(format!(
                "record at offset {offset} runs past end of file"
            )));
        }
        Ok(Some(RecordRef {
            start: offset,
            end,
            kind: header.kind,
            timestamp: header.timestamp,
        }))
    }

    /// Header of the record ending at `end`; `None` at start of data.
    pub fn read_header_before(&mut self, end: u64) -> Result<Option<RecordRef>, PmError> {
        if end <= self.data_start {
            return Ok(None);
        }
        if end < self.data_start + (RECORD_HEADER_LEN + RECORD_TRAILER_LEN) as u64 {
            return Err(PmError::log_record(format!(
                "partial record before offset {end}"
            )));
        }
        let mut raw = [0u8; 4];
        self.read_at(end - 4, &mut raw)?;
        let len = u32::from_be_bytes(raw) as u64;
        if len > end - self.data_start {
            return Err(PmError::log_record(format!(
                "trailer before offset {end} claims {len} bytes"
            )));
        }
        let start = end - len;
        match self.read_header_at(start)? {
            Some(rec) if rec.end == end => Ok(Some(rec)),
            _ => Err(PmError::log_record(format!(
                "record ending at offset {end}: header and trailer lengths disagree"
            ))),
        }
    }

    fn read_body(&mut self, rec: &RecordRef) -> Result<Vec<u8>, PmError> {
        let mut record = vec![0u8; (rec.end - rec.start) as usize];
        self.read_at(rec.start, &mut record)?;
        let mut raw = [0u8; RECORD_HEADER_LEN];
        raw.copy_from_slice(&record[..RECORD_HEADER_LEN]);
        let header = RecordHeader::parse(&raw, rec.start)?;
        decode_record_body(&header, &record, rec.start)
    }

    /// Parsed result record, served from the LRU when possible.
    pub fn result_at(&mut self, rec: &RecordRef) -> Result<Arc<StoredResult>, PmError> {
        if rec.kind != RecordKind::Result {
            return Err(PmError::log_record(format!(
                "record at offset {} is {:?}, not a result",
                rec.start, rec.kind
            )));
        }
        if let Some(hit) = self.cache.get(rec.start) {
            return Ok(hit);
        }
        let payload = self.read_body(rec)?;
        let result: StoredResult = from_payload(&payload, rec.start)?;
        let result = Arc::new(result);
        self.cache.insert(rec.start, Arc::clone(&result));
        trace!(offset = rec.start, vsets = result.vsets.len(), "result record loaded");
        Ok(result)
    }

    /// First result record starting at or after `offset`.
    pub fn next_result_ref(&mut self, mut offset: u64) -> Result<Option<RecordRef>, PmError> {
        while let Some(rec) = self.read_header_at(offset)? {
            if rec.kind == RecordKind::Result {
                return Ok(Some(rec));
            }
            offset = rec.end;
        }
        Ok(None)
    }

    /// Last result record ending at or before `end`.
    pub fn prev_result_ref(&mut self, mut end: u64) -> Result<Option<RecordRef>, PmError> {
        while let Some(rec) = self.read_header_before(end)? {
            if rec.kind == RecordKind::Result {
                return Ok(Some(rec));
            }
            end = rec.start;
        }
        Ok(None)
    }

    /// Decodes any record for inspection tools.
    pub fn read_record(&mut self, rec: &RecordRef) -> Result<ArchiveRecord, PmError> {
        match rec.kind {
            RecordKind::Result => {
                let stored = self.result_at(rec)?;
                Ok(ArchiveRecord::Result(FetchResult {
                    timestamp: rec.timestamp,
                    vsets: stored.vsets.iter().map(|v| v.to_value_set()).collect(),
                }))
            }
            RecordKind::Desc => {
                let payload = self.read_body(rec)?;
                Ok(ArchiveRecord::Desc(from_payload(&payload, rec.start)?))
            }
            RecordKind::InDom => {
                // names may have been introduced by earlier records
                if self.meta_offset < rec.end {
                    self.scan_metadata(|r| r.meta_offset >= rec.end)?;
                }
                let payload = self.read_body(rec)?;
                let stored: StoredInDom = from_payload(&payload, rec.start)?;
                Ok(ArchiveRecord::InDom(self.resolve_indom(stored, rec)?))
            }
        }
    }

    // ---- positioning ----

    /// Start offset of the first record whose time is `>= t`, or the end
    /// of the data when there is none.
    pub fn seek_forward(&mut self, t: Timestamp) -> Result<u64, PmError> {
        let idx = self.index.partition_point(|e| e.timestamp < t);
        let mut offset = self.data_start;
        for i in (0..idx).rev() {
            let entry = self.index[i];
            if self.index_entry_valid(&entry) {
                offset = entry.offset;
                break;
            }
        }
        while let Some(rec) = self.read_header_at(offset)? {
            if rec.timestamp >= t {
                return Ok(rec.start);
            }
            offset = rec.end;
        }
        Ok(self.data_len)
    }

    /// End offset of the last record whose time is `<= t`, or the start of
    /// the data when there is none.
    pub fn seek_backward(&mut self, t: Timestamp) -> Result<u64, PmError> {
        let idx = self.index.partition_point(|e| e.timestamp <= t);
        let mut end = self.data_len;
        for i in idx..self.index.len() {
            let entry = self.index[i];
            if self.index_entry_valid(&entry) {
                end = entry.offset;
                break;
            }
        }
        while let Some(rec) = self.read_header_before(end)? {
            if rec.timestamp <= t {
                return Ok(rec.end);
            }
            end = rec.start;
        }
        Ok(self.data_start)
    }

    /// An index entry is used only if it points at the start of a result
    /// record carrying the same timestamp.
    fn index_entry_valid(&mut self, entry: &IndexEntry) -> bool {
        let valid = entry.offset >= self.data_start
            && matches!(
                self.read_header_at(entry.offset),
                Ok(Some(rec)) if rec.kind == RecordKind::Result && rec.timestamp == entry.timestamp
            );
        if !valid {
            warn!(
                base = %self.base.display(),
                offset = entry.offset,
                timestamp = %entry.timestamp,
                "archive index entry does not match the data file, skipping it"
            );
        }
        valid
    }

    // ---- metadata ----

    /// Descriptor for `pmid`, scanning forward for it if not seen yet.
    pub fn desc(&mut self, pmid: Pmid) -> Result<Desc, PmError> {
        if let Some(desc) = self.descs.get(&pmid) {
            return Ok(*desc);
        }
        self.scan_metadata(|r| r.descs.contains_key(&pmid))?;
        self.descs.get(&pmid).copied().ok_or_else(|| {
            PmError::new(
                ErrorKind::UnknownMetric,
                format!("metric {pmid} not in archive {}", self.base.display()),
            )
        })
    }

    /// InDom membership in force at time `t`: the latest snapshot at or
    /// before `t`, else the earliest one logged.
    pub fn indom_at(&mut self, indom: InDom, t: Timestamp) -> Result<InDomInstances, PmError> {
        self.scan_metadata_through(t)?;
        if !self.indoms.contains_key(&indom) {
            self.scan_metadata(|r| r.indoms.contains_key(&indom))?;
        }
        let snapshots = self.indoms.get(&indom).ok_or_else(|| {
            PmError::new(
                ErrorKind::UnknownInstance,
                format!("instance domain {indom} not in archive"),
            )
        })?;
        let chosen = snapshots
            .iter()
            .rev()
            .find(|s| s.timestamp <= t)
            .or_else(|| snapshots.first());
        chosen.cloned().ok_or_else(|| {
            PmError::new(
                ErrorKind::UnknownInstance,
                format!("instance domain {indom} not in archive"),
            )
        })
    }

    /// Processes metadata records until `done` holds or the data ends.
    fn scan_metadata(&mut self, done: impl Fn(&Self) -> bool) -> Result<(), PmError> {
        while !done(self) {
            let Some(rec) = self.read_header_at(self.meta_offset)? else {
                break;
            };
            self.absorb_metadata(&rec)?;
        }
        Ok(())
    }

    /// Processes every record stamped at or before `t`.
    fn scan_metadata_through(&mut self, t: Timestamp) -> Result<(), PmError> {
        while let Some(rec) = self.read_header_at(self.meta_offset)? {
            if rec.timestamp > t {
                break;
            }
            self.absorb_metadata(&rec)?;
        }
        Ok(())
    }

    fn absorb_metadata(&mut self, rec: &RecordRef) -> Result<(), PmError> {
        match rec.kind {
            RecordKind::Desc => {
                let payload = self.read_body(rec)?;
                let desc: Desc = from_payload(&payload, rec.start)?;
                trace!(pmid = %desc.pmid, offset = rec.start, "descriptor found");
                self.descs.insert(desc.pmid, desc);
            }
            RecordKind::InDom => {
                let payload = self.read_body(rec)?;
                let stored: StoredInDom = from_payload(&payload, rec.start)?;
                for (hash, name) in &stored.new_names {
                    self.interner.insert(*hash, name.clone());
                }
                let snapshot = self.resolve_indom(stored, rec)?;
                trace!(indom = %snapshot.indom, offset = rec.start, "instance domain found");
                self.indoms.entry(snapshot.indom).or_default().push(snapshot);
            }
            RecordKind::Result => {}
        }
        self.meta_offset = rec.end;
        Ok(())
    }

    fn resolve_indom(
        &self,
        stored: StoredInDom,
        rec: &RecordRef,
    ) -> Result<InDomInstances, PmError> {
        let mut instances = Vec::with_capacity(stored.instances.len());
        for (inst, hash) in stored.instances {
            let name = self
                .interner
                .resolve(hash)
                .or_else(|| {
                    stored
                        .new_names
                        .iter()
                        .find(|(h, _)| *h == hash)
                        .map(|(_, n)| n.as_str())
                })
                .ok_or_else(|| {
                    PmError::log_record(format!(
                        "record at offset {}: unknown instance name {hash:#x}",
                        rec.start
                    ))
                })?;
            instances.push((inst, name.to_string()));
        }
        Ok(InDomInstances {
            indom: stored.indom,
            timestamp: rec.timestamp,
            instances,
        })
    }
}

fn read_whole(kind: FileKind, base: &Path) -> Result<Vec<u8>, PmError> {
    let path = kind.path(base);
    fs::read(&path).map_err(|e| no_archive(&path, e))
}

fn no_archive(path: &Path, e: io::Error) -> PmError {
    PmError::new(ErrorKind::NoSuchArchive, format!("{}: {e}", path.display()))
}

fn expect_kind(found: FileKind, expected: FileKind) -> Result<(), PmError> {
    if found != expected {
        return Err(PmError::new(
            ErrorKind::BadLabel,
            format!("expected {expected:?} label, found {found:?}"),
        ));
    }
    Ok(())
}

fn check_same(label: &ArchiveLabel, other: &ArchiveLabel, kind: FileKind) -> Result<(), PmError> {
    if !label.same_archive(other) {
        return Err(PmError::new(
            ErrorKind::BadLabel,
            format!(
                "{} label ({}, pid {}, {}) differs from volume label ({}, pid {}, {})",
                kind.suffix(),
                other.host,
                other.pid,
                other.start,
                label.host,
                label.pid,
                label.start
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testdata::{PMID_COUNT, PMID_DISK, build_sample_archive};
    use crate::archive::writer::{ArchiveWriter, WriterOptions};
    use crate::model::{InstanceValue, Value, ValueSet};
    use tempfile::tempdir;

    #[test]
    fn test_open_reads_label_and_bounds() {
        let dir = tempdir().unwrap();
        let base = build_sample_archive(dir.path(), WriterOptions::default());
        let reader = ArchiveReader::open(&base).unwrap();
        assert_eq!(reader.label().host, "sample-host");
        assert_eq!(
            reader.time_bounds(),
            Some((Timestamp::from_secs(100), Timestamp::from_secs(140)))
        );
    }

    #[test]
    fn test_missing_archive() {
        let dir = tempdir().unwrap();
        let err = ArchiveReader::open(dir.path().join("nope")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NoSuchArchive);
    }

    #[test]
    fn test_mismatched_labels_rejected() {
        let dir = tempdir().unwrap();
        let a = ArchiveWriter::create(dir.path().join("a"), "host-a", "UTC", Timestamp::ZERO)
            .unwrap()
            .finish()
            .unwrap();
        let b = ArchiveWriter::create(dir.path().join("b"), "host-b", "UTC", Timestamp::ZERO)
            .unwrap()
            .finish()
            .unwrap();
        fs::copy(FileKind::Index.path(&b), FileKind::Index.path(&a)).unwrap();

        let err = ArchiveReader::open(&a).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::BadLabel);
    }

    #[test]
    fn test_walks_records_both_ways() {
        let dir = tempdir().unwrap();
        let base = build_sample_archive(dir.path(), WriterOptions::default());
        let mut reader = ArchiveReader::open(&base).unwrap();

        let mut forward = Vec::new();
        let mut offset = reader.start_offset();
        while let Some(rec) = reader.read_header_at(offset).unwrap() {
            forward.push(rec);
            offset = rec.end;
        }
        let mut backward = Vec::new();
        let mut end = reader.end_offset();
        while let Some(rec) = reader.read_header_before(end).unwrap() {
            backward.push(rec);
            end = rec.start;
        }
        backward.reverse();
        assert_eq!(forward, backward);
        assert!(forward.iter().any(|r| r.kind == RecordKind::Desc));
        assert!(forward.iter().any(|r| r.kind == RecordKind::InDom));
    }

    #[test]
    fn test_lazy_metadata_lookup() {
        let dir = tempdir().unwrap();
        let base = build_sample_archive(dir.path(), WriterOptions::default());
        let mut reader = ArchiveReader::open(&base).unwrap();

        let desc = reader.desc(PMID_DISK).unwrap();
        assert_eq!(desc.pmid, PMID_DISK);
        let scanned = reader.meta_offset;
        assert!(scanned > reader.start_offset());
        assert!(scanned < reader.end_offset());

        reader.desc(PMID_COUNT).unwrap();
        assert_eq!(
            reader.desc(Pmid::new(99, 0, 0)).unwrap_err().kind(),
            ErrorKind::UnknownMetric
        );
        assert_eq!(reader.meta_offset, reader.end_offset());
    }

    #[test]
    fn test_indom_snapshot_by_time() {
        let dir = tempdir().unwrap();
        let base = build_sample_archive(dir.path(), WriterOptions::default());
        let mut reader = ArchiveReader::open(&base).unwrap();
        let indom = reader.desc(PMID_DISK).unwrap().indom;

        let early = reader.indom_at(indom, Timestamp::from_secs(100)).unwrap();
        assert_eq!(early.instances.len(), 2);
        let late = reader.indom_at(indom, Timestamp::from_secs(135)).unwrap();
        assert_eq!(late.instances.len(), 3);
        assert_eq!(late.name_of(2), Some("sdc"));
    }

    #[test]
    fn test_seek_uses_sparse_index() {
        let dir = tempdir().unwrap();
        let options = WriterOptions {
            index_every: 3,
            compress_level: Some(1),
        };
        let base = build_sample_archive(dir.path(), options);
        let mut reader = ArchiveReader::open(&base).unwrap();

        let start = reader.seek_forward(Timestamp::new(115, 1)).unwrap();
        let rec = reader.read_header_at(start).unwrap().unwrap();
        assert_eq!(rec.timestamp, Timestamp::from_secs(120));

        let end = reader.seek_backward(Timestamp::new(115, 1)).unwrap();
        let rec = reader.read_header_before(end).unwrap().unwrap();
        assert_eq!(rec.timestamp, Timestamp::from_secs(110));

        assert_eq!(
            reader.seek_forward(Timestamp::from_secs(1000)).unwrap(),
            reader.end_offset()
        );
        assert_eq!(
            reader.seek_backward(Timestamp::from_secs(0)).unwrap(),
            reader.start_offset()
        );
    }

    #[test]
    fn test_seek_skips_index_entry_past_end_of_data() {
        let dir = tempdir().unwrap();
        let base = build_sample_archive(dir.path(), WriterOptions::default());
        let mut reader = ArchiveReader::open(&base).unwrap();
        let expected_backward = reader.seek_backward(Timestamp::new(115, 1)).unwrap();

        let broken = reader
            .index
            .iter_mut()
            .find(|e| e.timestamp == Timestamp::from_secs(110))
            .unwrap();
        broken.offset = 1 << 40;

        let start = reader.seek_forward(Timestamp::from_secs(115)).unwrap();
        let rec = reader.read_header_at(start).unwrap().unwrap();
        assert_eq!(rec.timestamp, Timestamp::from_secs(120));

        let end = reader.seek_backward(Timestamp::new(115, 1)).unwrap();
        assert_eq!(end, expected_backward);
        let end = reader.seek_backward(Timestamp::new(105, 0)).unwrap();
        let rec = reader.read_header_before(end).unwrap().unwrap();
        assert_eq!(rec.timestamp, Timestamp::from_secs(100));
    }

    #[test]
    fn test_truncated_data_is_log_record_error() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("trunc");
        let mut writer = ArchiveWriter::create(&base, "h", "UTC", Timestamp::ZERO).unwrap();
        writer
            .write_result(&FetchResult::new(
                Timestamp::from_secs(1),
                vec![ValueSet::new(
                    Pmid::new(1, 0, 0),
                    vec![InstanceValue::new(-1, Value::I32(1))],
                )],
            ))
            .unwrap();
        writer.finish().unwrap();

        let data = FileKind::Data.path(&base);
        let len = fs::metadata(&data).unwrap().len();
        let file = fs::OpenOptions::new().write(true).open(&data).unwrap();
        file.set_len(len - 3).unwrap();

        let err = ArchiveReader::open(&base).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::LogRecordError);
    }
}
