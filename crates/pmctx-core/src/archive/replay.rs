//! Replay cursor over an archive: forward, backward and interpolated modes.

use std::fmt;
use std::path::Path;

use tracing::debug;

use super::format::{ArchiveLabel, StoredResult};
use super::interp::interpolate;
use super::reader::{ArchiveReader, RecordRef};
use crate::error::{ErrorKind, PmError};
use crate::model::{
    Desc, FetchResult, InDom, InDomInstances, InstanceProfile, Pmid, Timestamp, ValueSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    Forward,
    Backward,
    /// Values synthesized at the origin, which then moves by `step_ns`
    /// (negative steps walk back in time).
    Interpolated { step_ns: i64 },
}

impl fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayMode::Forward => write!(f, "forward"),
            ReplayMode::Backward => write!(f, "backward"),
            ReplayMode::Interpolated { step_ns } => {
                write!(f, "interpolated ({:.3}s)", *step_ns as f64 / 1e9)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    mode: ReplayMode,
    /// Byte position between records; the next forward read starts here,
    /// the next backward read ends here.
    offset: u64,
    /// Target time in interpolated mode; time of the last record returned
    /// otherwise.
    origin: Timestamp,
}

pub struct ArchiveSession {
    reader: ArchiveReader,
    cursor: Cursor,
}

impl ArchiveSession {
    pub fn open(base: impl AsRef<Path>) -> Result<Self, PmError> {
        let reader = ArchiveReader::open(base)?;
        let origin = match reader.time_bounds() {
            Some((first, _)) => first,
            None => reader.label().start,
        };
        let cursor = Cursor {
            mode: ReplayMode::Forward,
            offset: reader.start_offset(),
            origin,
        };
        Ok(Self { reader, cursor })
    }

    pub fn reader(&self) -> &ArchiveReader {
        &self.reader
    }

    pub fn label(&self) -> &ArchiveLabel {
        self.reader.label()
    }

    pub fn mode(&self) -> ReplayMode {
        self.cursor.mode
    }

    pub fn position(&self) -> Timestamp {
        self.cursor.origin
    }

    /// Switches mode. With `Some(t)` replay is repositioned at `t`; with
    /// `None` it continues from where the previous mode left off.
    pub fn set_mode(&mut self, mode: ReplayMode, at: Option<Timestamp>) -> Result<(), PmError> {
        let from_interp = matches!(self.cursor.mode, ReplayMode::Interpolated { .. });
        let at = match (at, mode) {
            (Some(t), _) => Some(t),
            (None, ReplayMode::Forward | ReplayMode::Backward) if from_interp => {
                Some(self.cursor.origin)
            }
            (None, _) => None,
        };

        match (mode, at) {
            (ReplayMode::Forward, Some(t)) => {
                self.cursor.offset = self.reader.seek_forward(t)?;
                self.cursor.origin = t;
            }
            (ReplayMode::Backward, Some(t)) => {
                self.cursor.offset = self.reader.seek_backward(t)?;
                self.cursor.origin = t;
            }
            (ReplayMode::Interpolated { .. }, Some(t)) => self.cursor.origin = t,
            (_, None) => {}
        }
        self.cursor.mode = mode;
        debug!(
            archive = %self.reader.base().display(),
            mode = %mode,
            origin = %self.cursor.origin,
            offset = self.cursor.offset,
            "replay mode set"
        );
        Ok(())
    }

    /// Next result in the current mode. `EndOfLog` leaves the position
    /// untouched.
    pub fn fetch(
        &mut self,
        pmids: &[Pmid],
        profile: &InstanceProfile,
    ) -> Result<FetchResult, PmError> {
        if pmids.is_empty() {
            return Err(PmError::new(ErrorKind::InvalidArgument, "empty metric list"));
        }
        match self.cursor.mode {
            ReplayMode::Forward => self.fetch_stored(pmids, profile, true),
            ReplayMode::Backward => self.fetch_stored(pmids, profile, false),
            ReplayMode::Interpolated { step_ns } => {
                let result = interpolate(&mut self.reader, pmids, self.cursor.origin, profile)?;
                self.cursor.origin = self.cursor.origin.offset_by(step_ns);
                Ok(result)
            }
        }
    }

    fn fetch_stored(
        &mut self,
        pmids: &[Pmid],
        profile: &InstanceProfile,
        forward: bool,
    ) -> Result<FetchResult, PmError> {
        let mut offset = self.cursor.offset;
        loop {
            let next = if forward {
                self.reader.next_result_ref(offset)?
            } else {
                self.reader.prev_result_ref(offset)?
            };
            let Some(rec) = next else {
                return Err(PmError::new(
                    ErrorKind::EndOfLog,
                    format!(
                        "{} of archive {}",
                        if forward { "end" } else { "start" },
                        self.reader.base().display()
                    ),
                ));
            };
            offset = if forward { rec.end } else { rec.start };

            let stored = self.reader.result_at(&rec)?;
            if stored.is_mark() {
                self.commit(offset, &rec);
                return Ok(FetchResult::mark(rec.timestamp));
            }
            if !pmids.iter().any(|p| stored.get(*p).is_some()) {
                continue;
            }
            let result = self.select(&stored, &rec, pmids, profile)?;
            self.commit(offset, &rec);
            return Ok(result);
        }
    }

    fn commit(&mut self, offset: u64, rec: &RecordRef) {
        self.cursor.offset = offset;
        self.cursor.origin = rec.timestamp;
    }

    /// Requested value sets in requested order, filtered by the profile.
    fn select(
        &mut self,
        stored: &StoredResult,
        rec: &RecordRef,
        pmids: &[Pmid],
        profile: &InstanceProfile,
    ) -> Result<FetchResult, PmError> {
        let mut vsets = Vec::with_capacity(pmids.len());
        for &pmid in pmids {
            let Some(svs) = stored.get(pmid) else {
                vsets.push(ValueSet::empty(pmid));
                continue;
            };
            let mut vs = svs.to_value_set();
            let indom = match self.reader.desc(pmid) {
                Ok(desc) => desc.indom,
                Err(e) if e.kind() == ErrorKind::UnknownMetric => InDom::NULL,
                Err(e) => return Err(e),
            };
            if let Ok(values) = &mut vs.values {
                values.retain(|iv| profile.is_included(indom, iv.inst));
            }
            vsets.push(vs);
        }
        Ok(FetchResult {
            timestamp: rec.timestamp,
            vsets,
        })
    }

    pub fn desc(&mut self, pmid: Pmid) -> Result<Desc, PmError> {
        self.reader.desc(pmid)
    }

    /// InDom membership in force at the current position.
    pub fn indom(&mut self, indom: InDom) -> Result<InDomInstances, PmError> {
        self.reader.indom_at(indom, self.cursor.origin)
    }

    /// Independent session over the same files, at the same position.
    pub fn duplicate(&self) -> Result<Self, PmError> {
        let reader = ArchiveReader::open(self.reader.base())?;
        Ok(Self {
            reader,
            cursor: self.cursor,
        })
    }
}
