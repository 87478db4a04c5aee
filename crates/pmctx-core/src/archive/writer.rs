//! Append-only producer of archive volume sets.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::format::{
    ArchiveLabel, FileKind, IndexEntry, RecordKind, StoredInDom, StoredResult, VERSION,
    encode_record, to_payload,
};
use super::interner::StringInterner;
use crate::error::{ErrorKind, PmError};
use crate::model::{Desc, FetchResult, InDomInstances, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Append an index entry every this many results (marks always get one).
    pub index_every: usize,
    /// zstd level for record payloads; `None` stores them plain.
    pub compress_level: Option<i32>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            index_every: 1,
            compress_level: None,
        }
    }
}

pub struct ArchiveWriter {
    base: PathBuf,
    label: ArchiveLabel,
    options: WriterOptions,
    data: BufWriter<File>,
    index: BufWriter<File>,
    offset: u64,
    interner: StringInterner,
    last_timestamp: Timestamp,
    results_since_index: usize,
    records: usize,
}

impl ArchiveWriter {
    pub fn create(
        base: impl AsRef<Path>,
        host: &str,
        timezone: &str,
        start: Timestamp,
    ) -> Result<Self, PmError> {
        Self::with_options(base, host, timezone, start, WriterOptions::default())
    }

    pub fn with_options(
        base: impl AsRef<Path>,
        host: &str,
        timezone: &str,
        start: Timestamp,
        options: WriterOptions,
    ) -> Result<Self, PmError> {
        let base = base.as_ref().to_path_buf();
        let label = ArchiveLabel {
            version: VERSION,
            pid: std::process::id(),
            start,
            host: host.to_string(),
            timezone: timezone.to_string(),
        };

        let create = |kind: FileKind| -> Result<File, PmError> {
            let path = kind.path(&base);
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .map_err(|e| PmError::new(ErrorKind::Io, format!("{}: {e}", path.display())))
        };

        let mut label_file = create(FileKind::Label)?;
        label_file.write_all(&label.encode(FileKind::Label)?)?;
        label_file.sync_all()?;

        let mut index = BufWriter::new(create(FileKind::Index)?);
        index.write_all(&label.encode(FileKind::Index)?)?;

        let mut data = BufWriter::new(create(FileKind::Data)?);
        let data_label = label.encode(FileKind::Data)?;
        data.write_all(&data_label)?;

        debug!(base = %base.display(), host, "archive created");

        Ok(Self {
            base,
            label,
            options,
            data,
            index,
            offset: data_label.len() as u64,
            interner: StringInterner::new(),
            last_timestamp: start,
            results_since_index: 0,
            records: 0,
        })
    }

    pub fn label(&self) -> &ArchiveLabel {
        &self.label
    }

    pub fn write_desc(&mut self, desc: &Desc) -> Result<(), PmError> {
        let payload = to_payload(desc)?;
        self.append(RecordKind::Desc, self.last_timestamp, &payload)?;
        Ok(())
    }

    pub fn write_indom(&mut self, instances: &InDomInstances) -> Result<(), PmError> {
        self.check_time(instances.timestamp)?;
        let mut new_names = Vec::new();
        let mut pairs = Vec::with_capacity(instances.instances.len());
        for (inst, name) in &instances.instances {
            let (hash, fresh) = self.interner.intern(name);
            if fresh {
                new_names.push((hash, name.clone()));
            }
            pairs.push((*inst, hash));
        }
        let stored = StoredInDom {
            indom: instances.indom,
            new_names,
            instances: pairs,
        };
        self.append(RecordKind::InDom, instances.timestamp, &to_payload(&stored)?)?;
        self.last_timestamp = instances.timestamp;
        Ok(())
    }

    /// Appends a result. A result with no value sets is written as a mark.
    pub fn write_result(&mut self, result: &FetchResult) -> Result<(), PmError> {
        self.check_time(result.timestamp)?;
        let stored = StoredResult::from_result(result);
        let offset = self.append(RecordKind::Result, result.timestamp, &to_payload(&stored)?)?;
        self.last_timestamp = result.timestamp;

        self.results_since_index += 1;
        if result.is_mark() || self.results_since_index >= self.options.index_every.max(1) {
            let entry = IndexEntry {
                timestamp: result.timestamp,
                offset,
            };
            self.index.write_all(&entry.encode())?;
            self.results_since_index = 0;
        }
        Ok(())
    }

    /// Records a gap in the data, e.g. a collector restart.
    pub fn write_mark(&mut self, timestamp: Timestamp) -> Result<(), PmError> {
        self.write_result(&FetchResult::mark(timestamp))
    }

    pub fn finish(mut self) -> Result<PathBuf, PmError> {
        self.data.flush()?;
        self.index.flush()?;
        self.data.get_ref().sync_all()?;
        self.index.get_ref().sync_all()?;
        debug!(
            base = %self.base.display(),
            records = self.records,
            bytes = self.offset,
            "archive finished"
        );
        Ok(self.base)
    }

    fn check_time(&self, ts: Timestamp) -> Result<(), PmError> {
        if ts < self.last_timestamp {
            return Err(PmError::new(
                ErrorKind::InvalidArgument,
                format!(
                    "timestamp {ts} precedes last written {}",
                    self.last_timestamp
                ),
            ));
        }
        Ok(())
    }

    /// Writes one framed record and returns its offset.
    fn append(&mut self, kind: RecordKind, ts: Timestamp, payload: &[u8]) -> Result<u64, PmError> {
        let record = encode_record(kind, ts, payload, self.options.compress_level)?;
        let offset = self.offset;
        self.data.write_all(&record)?;
        self.offset += record.len() as u64;
        self.records += 1;
        Ok(offset)
    }
}
